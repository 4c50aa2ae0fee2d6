use thiserror::Error;

/// Errors surfaced by listing adapters, filter discovery and the overlay compositor.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Malformed caller input. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Expected structure absent from a response.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("request cancelled")]
    Cancelled,

    /// Text could not be fitted even at the minimum font size.
    #[error("text does not fit its box at the minimum font size {font_size}px")]
    LayoutOverflow { font_size: f32 },

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("font error: {0}")]
    Font(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SourceError {
    pub fn network(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Transport-level failures: transport errors, non-2xx statuses and cancellation.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Status { .. } | Self::Cancelled
        )
    }

    /// Failures that filter discovery may retry on a later call.
    pub fn is_retryable(&self) -> bool {
        self.is_network() || matches!(self, Self::Parse(_) | Self::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;

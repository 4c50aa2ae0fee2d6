use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub http: HttpSettings,
    #[serde(default)]
    pub overlay: OverlaySettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpSettings {
    /// Timeout for HTTP requests in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum number of retry attempts for failed requests
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_initial_retry_delay")]
    pub initial_retry_delay_ms: u64,

    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_true")]
    pub enable_cookies: bool,

    /// Enable gzip/brotli compression
    #[serde(default = "default_true")]
    pub enable_compression: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OverlaySettings {
    /// Starting font size for dialogue text, in points
    #[serde(default = "default_font_size")]
    pub font_size_pt: u32,

    /// Render with the rasterizer default font only; never fetch remote fonts
    #[serde(default)]
    pub disable_custom_fonts: bool,

    /// Site root serving `/images/{role}.ttf`
    #[serde(default)]
    pub font_base_url: Option<String>,

    #[serde(default = "default_min_font_size")]
    pub min_font_size_pt: f32,

    #[serde(default = "default_shrink_step")]
    pub shrink_step_pt: f32,

    /// Outline width of the background pass
    #[serde(default = "default_stroke_width")]
    pub stroke_width_px: f32,

    /// Preferred language for multilingual dialogue text
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoverySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_true() -> bool { true }
fn default_max_retries() -> usize { 4 }
fn default_initial_retry_delay() -> u64 { 500 }
fn default_max_retry_delay() -> u64 { 8000 }
fn default_timeout() -> u64 { 30 }
fn default_font_size() -> u32 { 24 }
fn default_min_font_size() -> f32 { 4.0 }
fn default_shrink_step() -> f32 { 0.5 }
fn default_stroke_width() -> f32 { 5.0 }
fn default_max_attempts() -> u32 { 3 }
fn default_language() -> String { "en".to_string() }

/// Font sizes offered to users, in points.
pub const FONT_SIZES: &[u32] = &[24, 26, 28, 32, 36, 40, 42, 44, 48, 54, 60, 72, 80, 88, 96];

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay(),
            max_retry_delay_ms: default_max_retry_delay(),
            enable_cookies: true,
            enable_compression: true,
        }
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_size_pt: default_font_size(),
            disable_custom_fonts: false,
            font_base_url: None,
            min_font_size_pt: default_min_font_size(),
            shrink_step_pt: default_shrink_step(),
            stroke_width_px: default_stroke_width(),
            language: default_language(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Config {
    /// Loads `config.toml` from the working directory, or defaults.
    pub fn load() -> Self {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                log::warn!("Could not read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

impl HttpSettings {
    /// Create an enhanced HTTP client from this configuration
    pub fn create_http_client(&self) -> crate::error::Result<crate::http_client::EnhancedHttpClient> {
        use crate::http_client::{EnhancedHttpClient, HttpClientConfig};
        use std::time::Duration;

        let config = HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            initial_retry_delay_ms: self.initial_retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
            enable_cookies: self.enable_cookies,
            enable_gzip: self.enable_compression,
        };

        EnhancedHttpClient::with_config(config)
    }
}

impl OverlaySettings {
    /// Starting font size in pixels (1px = 0.75pt).
    pub fn font_size_px(&self) -> f32 {
        self.font_size_pt as f32 / crate::overlay::layout::PT_PER_PX
    }

    pub fn min_font_size_px(&self) -> f32 {
        self.min_font_size_pt / crate::overlay::layout::PT_PER_PX
    }

    pub fn shrink_step_px(&self) -> f32 {
        self.shrink_step_pt / crate::overlay::layout::PT_PER_PX
    }
}

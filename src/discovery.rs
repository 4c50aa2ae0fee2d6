//! Lazy, attempt-capped discovery of a site's filter options.
//!
//! State moves `NotFetched -> Fetching -> Fetched`, or back to `NotFetched`
//! when a fetch fails. After `max_attempts` failures discovery stays
//! `Unavailable`. Only one caller at a time can hold `Fetching`. Attempts
//! the caller cancelled do not count toward the cap.

use crate::error::{Result, SourceError};
use crate::filters::FilterSpec;
use crate::http_client::{CallContext, HttpExecutor, HttpRequest, HttpResponse};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

pub const PLACEHOLDER_TEXT: &str = "Press 'Reset' to attempt to load the filters";
pub const UNAVAILABLE_TEXT: &str = "Filters could not be loaded from the site";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStatus {
    NotFetched,
    Fetching,
    Fetched,
    Unavailable,
}

#[derive(Debug)]
enum State {
    NotFetched,
    Fetching,
    Fetched(Arc<Vec<FilterSpec>>),
    Unavailable,
}

#[derive(Debug)]
struct Inner {
    state: State,
    attempts: u32,
}

#[derive(Debug)]
pub struct FilterDiscovery {
    inner: Mutex<Inner>,
    max_attempts: u32,
}

/// Puts the state back to `NotFetched` if a fetch is abandoned midway.
struct FetchingGuard<'a> {
    discovery: &'a FilterDiscovery,
    armed: bool,
}

impl Drop for FetchingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.discovery.lock();
            if matches!(inner.state, State::Fetching) {
                inner.state = State::NotFetched;
            }
        }
    }
}

impl Default for FilterDiscovery {
    fn default() -> Self {
        Self::new(3)
    }
}

impl FilterDiscovery {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::NotFetched,
                attempts: 0,
            }),
            max_attempts,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another caller panicked mid-update;
        // the state itself is always consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> DiscoveryStatus {
        match self.lock().state {
            State::NotFetched => DiscoveryStatus::NotFetched,
            State::Fetching => DiscoveryStatus::Fetching,
            State::Fetched(_) => DiscoveryStatus::Fetched,
            State::Unavailable => DiscoveryStatus::Unavailable,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Cached filters, if discovery already succeeded.
    pub fn cached(&self) -> Option<Arc<Vec<FilterSpec>>> {
        match &self.lock().state {
            State::Fetched(filters) => Some(Arc::clone(filters)),
            _ => None,
        }
    }

    /// Returns the discovered filters, fetching them first if needed.
    ///
    /// Returns `None` while another caller is fetching, after a failed
    /// attempt, and once the attempt cap is spent. Fetch errors are logged
    /// and never propagated.
    pub async fn ensure_loaded<F, Fut>(&self, fetch: F) -> Option<Arc<Vec<FilterSpec>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<FilterSpec>>>,
    {
        let attempt = {
            let mut inner = self.lock();
            match &inner.state {
                State::Fetched(filters) => return Some(Arc::clone(filters)),
                State::Fetching | State::Unavailable => return None,
                State::NotFetched => {}
            }
            if inner.attempts >= self.max_attempts {
                inner.state = State::Unavailable;
                return None;
            }
            inner.state = State::Fetching;
            inner.attempts += 1;
            inner.attempts
        };

        let mut guard = FetchingGuard {
            discovery: self,
            armed: true,
        };
        let outcome = fetch().await;
        guard.armed = false;

        let mut inner = self.lock();
        match outcome {
            Err(SourceError::Cancelled) => {
                // abandoned by the caller; not the site's fault
                log::debug!("Filter discovery attempt {} cancelled", attempt);
                inner.attempts = inner.attempts.saturating_sub(1);
                inner.state = State::NotFetched;
                None
            }
            Ok(filters) => {
                log::info!("Discovered {} filters", filters.len());
                let filters = Arc::new(filters);
                inner.state = State::Fetched(Arc::clone(&filters));
                Some(filters)
            }
            Err(e) => {
                log::warn!(
                    "Filter discovery attempt {}/{} failed: {}",
                    attempt,
                    self.max_attempts,
                    e
                );
                inner.state = if attempt >= self.max_attempts {
                    State::Unavailable
                } else {
                    State::NotFetched
                };
                None
            }
        }
    }

    /// Fetches `request` through `client` and parses the response into filters.
    pub async fn load_from<P>(
        &self,
        client: &dyn HttpExecutor,
        request: HttpRequest,
        ctx: &CallContext,
        parse: P,
    ) -> Option<Arc<Vec<FilterSpec>>>
    where
        P: FnOnce(&HttpResponse) -> Result<Vec<FilterSpec>>,
    {
        self.ensure_loaded(|| async move {
            let outcome = match client.execute(request, ctx).await {
                Ok(response) => response.error_for_status().and_then(|response| parse(&response)),
                Err(e) => Err(e),
            };
            match outcome {
                Err(_) if ctx.is_cancelled() || ctx.is_expired() => Err(SourceError::Cancelled),
                other => other,
            }
        })
        .await
    }

    /// Starts discovery on the runtime without waiting for it.
    pub fn spawn_load<F, Fut>(self: &Arc<Self>, fetch: F) -> tokio::task::JoinHandle<Option<Arc<Vec<FilterSpec>>>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<FilterSpec>>> + Send + 'static,
    {
        let discovery = Arc::clone(self);
        tokio::spawn(async move { discovery.ensure_loaded(fetch).await })
    }

    /// What the host should show right now: the discovered filters, or a
    /// single header explaining why there are none.
    pub fn filters_or_placeholder(&self) -> Vec<FilterSpec> {
        match &self.lock().state {
            State::Fetched(filters) => filters.as_ref().clone(),
            State::Unavailable => vec![FilterSpec::Header(UNAVAILABLE_TEXT.to_string())],
            State::NotFetched | State::Fetching => vec![FilterSpec::Header(PLACEHOLDER_TEXT.to_string())],
        }
    }
}

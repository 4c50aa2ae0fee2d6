use crate::error::{Result, SourceError};
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use reqwest::{Client, ClientBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use url::Url;

/// User agents to rotate through to avoid bot detection
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully-formed outgoing request. Building one never touches the network.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// POST with an `application/x-www-form-urlencoded` body.
    pub fn post_form(url: Url, fields: &[(String, String)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        Self {
            method: Method::Post,
            url,
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(body.into_bytes()),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Decoded query pairs of the request URL, in order.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Decoded form fields of a POST body, in order.
    pub fn form_fields(&self) -> Vec<(String, String)> {
        self.body
            .as_deref()
            .map(|body| {
                url::form_urlencoded::parse(body)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turns a non-2xx response into `SourceError::Status`.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SourceError::Status {
                url: self.url.to_string(),
                status: self.status,
            })
        }
    }
}

/// Deadline and cancel flag threaded through every network call of one operation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fails fast when the caller already gave up on this operation.
    pub fn check(&self, url: &Url) -> Result<()> {
        if self.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        if self.is_expired() {
            return Err(SourceError::network(url.as_str(), "deadline exceeded"));
        }
        Ok(())
    }
}

/// Executes requests. Implemented by the reqwest client and by interceptor chains.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: HttpRequest, ctx: &CallContext) -> Result<HttpResponse>;
}

/// Sits in front of an executor and may rewrite the request, the response, or both.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        request: HttpRequest,
        ctx: &CallContext,
        next: &dyn HttpExecutor,
    ) -> Result<HttpResponse>;
}

/// An executor wrapped by an ordered list of interceptors (first added runs outermost).
pub struct InterceptedClient {
    inner: Arc<dyn HttpExecutor>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptedClient {
    pub fn new(inner: Arc<dyn HttpExecutor>) -> Self {
        Self {
            inner,
            interceptors: Vec::new(),
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }
}

struct Chain<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    inner: &'a dyn HttpExecutor,
}

#[async_trait]
impl HttpExecutor for Chain<'_> {
    async fn execute(&self, request: HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        match self.interceptors.split_first() {
            Some((head, rest)) => {
                let next = Chain {
                    interceptors: rest,
                    inner: self.inner,
                };
                head.intercept(request, ctx, &next).await
            }
            None => self.inner.execute(request, ctx).await,
        }
    }
}

#[async_trait]
impl HttpExecutor for InterceptedClient {
    async fn execute(&self, request: HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        let chain = Chain {
            interceptors: &self.interceptors,
            inner: self.inner.as_ref(),
        };
        chain.execute(request, ctx).await
    }
}

/// Configuration for HTTP client with bot detection bypass
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: usize,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub enable_cookies: bool,
    pub enable_gzip: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 4,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
            enable_cookies: true,
            enable_gzip: true,
        }
    }
}

/// reqwest-backed executor with browser-like headers and retry/backoff.
pub struct EnhancedHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl EnhancedHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
        );

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .user_agent(Self::random_user_agent())
            .cookie_store(config.enable_cookies)
            .gzip(config.enable_gzip)
            .brotli(config.enable_gzip)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .default_headers(headers)
            .build()
            .map_err(|e| SourceError::network("", e))?;

        Ok(Self { client, config })
    }

    fn random_user_agent() -> &'static str {
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }

    /// Exponential backoff with ±25% jitter.
    fn calculate_retry_delay(&self, attempt: usize) -> Duration {
        let base_delay = self.config.initial_retry_delay_ms;
        let max_delay = self.config.max_retry_delay_ms;
        let delay_ms = base_delay
            .saturating_mul(2u64.saturating_pow(attempt as u32))
            .min(max_delay);

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((delay_ms as f64 * jitter) as u64)
    }

    fn is_retryable_status(status: u16) -> bool {
        matches!(
            status,
            429 | 500 | 502 | 503 | 504 | 520 | 521 | 522 | 523 | 524 | 525 | 526 | 527
        )
    }

    fn to_reqwest(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
        };
        builder = builder.header(reqwest::header::USER_AGENT, Self::random_user_agent());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }

    async fn send_once(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, reqwest::Error> {
        let response = self.to_reqwest(request).send().await?;
        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await?;
        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }

    async fn sleep_within(&self, delay: Duration, ctx: &CallContext) {
        match ctx.deadline {
            Some(deadline) => tokio::time::sleep_until((Instant::now() + delay).min(deadline)).await,
            None => sleep(delay).await,
        }
    }

    /// Fetch a URL and return the body as text, failing on non-2xx.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let url = Url::parse(url).map_err(|e| SourceError::InvalidArgument(e.to_string()))?;
        let response = self
            .execute(HttpRequest::get(url), &CallContext::new())
            .await?
            .error_for_status()?;
        Ok(response.text())
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl HttpExecutor for EnhancedHttpClient {
    async fn execute(&self, request: HttpRequest, ctx: &CallContext) -> Result<HttpResponse> {
        let url = request.url.as_str().to_string();
        let mut attempt = 0;

        loop {
            ctx.check(&request.url)?;

            let outcome = match ctx.deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.send_once(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => return Err(SourceError::network(url, "deadline exceeded")),
                },
                None => self.send_once(&request).await,
            };

            match outcome {
                Ok(response) => {
                    if Self::is_retryable_status(response.status) && attempt < self.config.max_retries {
                        log::warn!(
                            "Received retryable status {} for {}, attempt {}/{}",
                            response.status,
                            url,
                            attempt + 1,
                            self.config.max_retries + 1
                        );
                        self.sleep_within(self.calculate_retry_delay(attempt), ctx).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let should_retry = e.is_timeout() || e.is_connect() || e.is_request();
                    if should_retry && attempt < self.config.max_retries {
                        log::warn!(
                            "Request failed for {}, attempt {}/{}: {}",
                            url,
                            attempt + 1,
                            self.config.max_retries + 1,
                            e
                        );
                        self.sleep_within(self.calculate_retry_delay(attempt), ctx).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SourceError::network(url, e));
                }
            }
        }
    }
}

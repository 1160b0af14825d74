//! # ShellCache Net
//!
//! Request/response model and the network capability used by the ShellCache
//! worker.
//!
//! ## Design Goals
//!
//! 1. **Fetch-shaped requests**: every option a page can put on a `Request`
//!    (mode, credentials, redirect, referrer policy, integrity, cache mode,
//!    keep-alive) survives cloning and normalization
//! 2. **Resolved responses**: bodies are always fully buffered, so a response
//!    can be cloned into a cache and handed to the page at the same time
//! 3. **Injected network**: the worker only sees the [`Fetch`] trait, so tests
//!    can script the network and the CLI can plug in [`ResourceLoader`]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;

pub use url::{Origin, Url};

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Body is not valid UTF-8: {0}")]
    InvalidBody(#[from] std::string::FromUtf8Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page load or SPA route change.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// Credentials mode for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CredentialsMode {
    /// Never send cookies.
    Omit,
    /// Send cookies only for same-origin requests.
    #[default]
    SameOrigin,
    /// Always send cookies.
    Include,
}

/// Redirect handling requested by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

/// Referrer policy carried on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferrerPolicy {
    /// Empty string policy: defer to the document's policy.
    #[default]
    Unset,
    NoReferrer,
    NoReferrerWhenDowngrade,
    Origin,
    OriginWhenCrossOrigin,
    SameOrigin,
    StrictOrigin,
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

/// HTTP cache directive of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
    pub credentials: CredentialsMode,
    pub redirect: RedirectMode,
    pub referrer: Option<Url>,
    pub referrer_policy: ReferrerPolicy,
    /// Subresource integrity metadata, empty when absent.
    pub integrity: String,
    pub cache: CacheMode,
    pub keepalive: bool,
}

impl Request {
    /// Create a request with the given method and default options.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::default(),
            credentials: CredentialsMode::default(),
            redirect: RedirectMode::default(),
            referrer: None,
            referrer_policy: ReferrerPolicy::default(),
            integrity: String::new(),
            cache: CacheMode::default(),
            keepalive: false,
        }
    }

    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        let mut request = Self::new(Method::POST, url);
        request.body = Some(body);
        request
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).mode(RequestMode::Navigate)
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, NetError> {
        Url::parse(url)
            .map(Self::get)
            .map_err(|e| NetError::InvalidUrl(format!("{url}: {e}")))
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the credentials mode.
    pub fn credentials(mut self, credentials: CredentialsMode) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the cache directive.
    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Set referrer.
    pub fn referrer(mut self, referrer: Url) -> Self {
        self.referrer = Some(referrer);
        self
    }

    /// Whether this is a full page navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Origin of the request URL.
    pub fn origin(&self) -> Origin {
        self.url.origin()
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// Built locally (offline placeholder, network error).
    Synthesized,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSource::Network => write!(f, "network"),
            ResponseSource::Cache => write!(f, "cache"),
            ResponseSource::Synthesized => write!(f, "synthesized"),
        }
    }
}

/// Reason phrase and body of synthesized offline responses.
pub const OFFLINE_REASON: &str = "Offline";

/// HTTP response with a fully buffered body.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after redirects; `None` for synthesized responses.
    pub url: Option<Url>,
    /// Status code, `0` for network errors.
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl Response {
    /// Create a network response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            url: Some(url),
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            source: ResponseSource::Network,
        }
    }

    /// The 503 "Offline" placeholder used whenever nothing better is available.
    pub fn offline() -> Self {
        Self {
            url: None,
            status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
            status_text: OFFLINE_REASON.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(OFFLINE_REASON.as_bytes()),
            source: ResponseSource::Synthesized,
        }
    }

    /// A network error response (status 0).
    pub fn network_error() -> Self {
        Self {
            url: None,
            status: 0,
            status_text: String::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            source: ResponseSource::Synthesized,
        }
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether this is the synthesized offline placeholder.
    pub fn is_offline(&self) -> bool {
        self.source == ResponseSource::Synthesized
            && self.status == StatusCode::SERVICE_UNAVAILABLE.as_u16()
            && self.status_text == OFFLINE_REASON
    }

    /// Parsed `Content-Type` header.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, NetError> {
        Ok(String::from_utf8(self.body.to_vec())?)
    }
}

/// The network capability injected into the worker.
///
/// Implementations must resolve to `Err` only for transport failures; HTTP
/// error statuses are ordinary responses.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let url = Url::parse("https://example.com/app/").unwrap();
        let request = Request::navigate(url.clone())
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("text/html"),
            )
            .credentials(CredentialsMode::Include)
            .cache(CacheMode::NoCache);

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(request.is_navigation());
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.credentials, CredentialsMode::Include);
        assert_eq!(request.cache, CacheMode::NoCache);
    }

    #[test]
    fn test_request_parse_rejects_garbage() {
        assert!(matches!(
            Request::parse("not a url"),
            Err(NetError::InvalidUrl(_))
        ));
        assert_eq!(
            Request::parse("https://example.com/a").unwrap().method,
            Method::GET
        );
    }

    #[test]
    fn test_request_id_uniqueness() {
        let id1 = RequestId::new();
        let id2 = RequestId::new();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn test_defaults_match_fetch() {
        let request = Request::get(Url::parse("https://example.com/").unwrap());
        assert_eq!(request.mode, RequestMode::Cors);
        assert_eq!(request.credentials, CredentialsMode::SameOrigin);
        assert_eq!(request.redirect, RedirectMode::Follow);
        assert_eq!(request.cache, CacheMode::Default);
        assert!(!request.keepalive);
    }

    #[test]
    fn test_offline_response() {
        let response = Response::offline();
        assert_eq!(response.status, 503);
        assert_eq!(response.status_text, "Offline");
        assert_eq!(response.text().unwrap(), "Offline");
        assert!(!response.ok());
        assert!(response.is_offline());
    }

    #[test]
    fn test_network_response() {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/css; charset=utf-8"),
        );
        let response = Response::new(
            Url::parse("https://example.com/app.css").unwrap(),
            StatusCode::OK,
            headers,
            Bytes::from_static(b"body{}"),
        );

        assert!(response.ok());
        assert!(!response.is_offline());
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.content_type().unwrap().subtype(), mime::CSS);
    }

    #[test]
    fn test_network_error_response() {
        let response = Response::network_error();
        assert_eq!(response.status, 0);
        assert!(!response.ok());
        assert!(!response.is_offline());
    }
}

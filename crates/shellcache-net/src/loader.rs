//! `reqwest`-backed implementation of [`Fetch`].

use std::time::Duration;

use futures::future::BoxFuture;
use http::header::{ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, REFERER};
use http::HeaderValue;
use reqwest::Client;
use tracing::{debug, info, trace};

use crate::{CacheMode, Fetch, NetError, RedirectMode, Request, Response};

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Timeout applied to every request.
    pub timeout: Duration,
    /// Maximum redirects followed for `RedirectMode::Follow`.
    pub max_redirects: usize,
    /// Enable the cookie store.
    pub cookies_enabled: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("ShellCache/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
            cookies_enabled: true,
        }
    }
}

/// Fetches requests over HTTP.
pub struct ResourceLoader {
    client: Client,
    /// Used for `RedirectMode::Error` / `Manual`, where redirects must not be followed.
    no_redirect_client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let builder = || {
            Client::builder()
                .user_agent(&config.user_agent)
                .timeout(config.timeout)
                .cookie_store(config.cookies_enabled)
        };

        let client = builder()
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;
        let no_redirect_client = builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        info!(user_agent = %config.user_agent, timeout = ?config.timeout, "ResourceLoader initialized");

        Ok(Self {
            client,
            no_redirect_client,
            config,
        })
    }

    /// Loader configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    async fn send(&self, request: Request) -> Result<Response, NetError> {
        let request_id = request.id.raw();
        debug!(request_id, url = %request.url, method = %request.method, mode = ?request.mode, "Fetching resource");

        let client = match request.redirect {
            RedirectMode::Follow => &self.client,
            RedirectMode::Error | RedirectMode::Manual => &self.no_redirect_client,
        };

        let mut req_builder = client.request(request.method.clone(), request.url.clone());

        for (name, value) in request.headers.iter() {
            req_builder = req_builder.header(name, value);
        }

        if !request.headers.contains_key(ACCEPT_LANGUAGE) {
            req_builder = req_builder.header(ACCEPT_LANGUAGE, &self.config.accept_language);
        }

        if let Some(ref referrer) = request.referrer {
            req_builder = req_builder.header(REFERER, referrer.as_str());
        }

        match request.cache {
            CacheMode::NoCache | CacheMode::Reload | CacheMode::NoStore => {
                req_builder = req_builder
                    .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                    .header(PRAGMA, HeaderValue::from_static("no-cache"));
            }
            _ => {}
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetError::Timeout(self.config.timeout)
            } else {
                NetError::HttpError(e)
            }
        })?;

        let status = response.status();
        if request.redirect == RedirectMode::Error && status.is_redirection() {
            return Err(NetError::RequestFailed(format!(
                "redirect from {} not allowed",
                request.url
            )));
        }

        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;

        trace!(
            request_id,
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(Response::new(url, status, headers, body))
    }
}

impl Fetch for ResourceLoader {
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response, NetError>> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("ShellCache/"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.cookies_enabled);
    }

    #[test]
    fn test_loader_builds() {
        let loader = ResourceLoader::new(LoaderConfig::default()).unwrap();
        assert_eq!(loader.config().max_redirects, 10);
    }
}

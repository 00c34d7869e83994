//! HTTP fetcher backing the agent's network primitive.
//!
//! ### Behaviour
//! - Redirects are never followed; 3xx responses reach the engine, which
//!   follows them itself where it needs to.
//! - HTTP error statuses are returned as responses. Only transport failures
//!   (DNS, refused connections, timeouts) are errors.
//! - `no-cors` requests to another origin come back opaque.
//! - Max body bytes: 20MB (configurable)

pub mod url;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

pub use url::{UrlError, canonicalize, same_origin};

use outpost_core::net::{RequestMode, ResponseKind};
use outpost_core::{AgentConfig, Error, Fetcher, Request, Response};

/// Configuration for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "outpost/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 20MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Origin of the agent's scope. `no-cors` requests elsewhere are opaque.
    pub origin: Option<::url::Url>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "outpost/0.1".to_string(),
            max_bytes: 20 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            origin: None,
        }
    }
}

impl FetchConfig {
    /// Settings taken from the agent configuration.
    pub fn from_agent(config: &AgentConfig) -> Result<Self, Error> {
        let origin = canonicalize(&config.scope_url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        Ok(Self { user_agent: config.user_agent.clone(), timeout: config.timeout(), origin: Some(origin), ..Self::default() })
    }
}

/// Reqwest-backed [`Fetcher`].
pub struct FetchClient {
    http: Client,
    config: FetchConfig,
}

impl FetchClient {
    /// Create a new fetch client with the given configuration.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn is_opaque(&self, req: &Request, url: &::url::Url) -> bool {
        if req.mode != RequestMode::NoCors {
            return false;
        }
        match &self.config.origin {
            Some(origin) => !same_origin(url, origin),
            None => false,
        }
    }
}

#[async_trait]
impl Fetcher for FetchClient {
    async fn fetch(&self, req: &Request) -> Result<Response, Error> {
        let start = Instant::now();
        let url = canonicalize(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let mut request = self
            .http
            .request(req.method.clone(), url.clone())
            .headers(req.headers.clone());
        if let Some(body) = &req.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Network(format!("request to {url} timed out: {e}"))
            } else {
                Error::Network(format!("network error: {e}"))
            }
        })?;

        let status = response.status();
        if let Some(len) = response.content_length() {
            if len as usize > self.config.max_bytes {
                return Err(Error::Network(format!("{len} bytes exceeds {}", self.config.max_bytes)));
            }
        }

        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("failed to read response: {e}")))?;
        if body.len() > self.config.max_bytes {
            return Err(Error::Network(format!("{} bytes exceeds {}", body.len(), self.config.max_bytes)));
        }

        let kind = if self.is_opaque(req, &url) { ResponseKind::Opaque } else { ResponseKind::Basic };

        tracing::debug!(
            "fetched {} {} -> {} in {}ms ({} bytes)",
            req.method,
            url,
            status.as_u16(),
            start.elapsed().as_millis(),
            body.len()
        );

        Ok(Response { status, headers, body, url: Some(final_url), kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Method, StatusCode, header};
    use wiremock::matchers::{body_string, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(origin: Option<&str>) -> FetchClient {
        let config = FetchConfig {
            user_agent: "outpost-test/1".to_string(),
            timeout: Duration::from_millis(200),
            origin: origin.map(|o| canonicalize(o).unwrap()),
            ..FetchConfig::default()
        };
        FetchClient::new(config).unwrap()
    }

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "outpost/0.1");
        assert_eq!(config.max_bytes, 20 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert!(config.origin.is_none());
    }

    #[test]
    fn test_fetch_config_from_agent() {
        let agent = AgentConfig { scope_url: "https://app.example.com/shop/".into(), timeout_ms: 1500, ..AgentConfig::default() };
        let config = FetchConfig::from_agent(&agent).unwrap();
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.origin.unwrap().host_str(), Some("app.example.com"));
    }

    #[tokio::test]
    async fn test_get_returns_buffered_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/main.js"))
            .and(header_is("user-agent", "outpost-test/1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("console.log(1)", "application/javascript"),
            )
            .mount(&server)
            .await;

        let url = format!("{}/main.js", server.uri());
        let res = client(None).fetch(&Request::get(url.clone())).await.unwrap();
        assert!(res.ok());
        assert_eq!(res.text(), "console.log(1)");
        assert_eq!(res.header_str(&header::CONTENT_TYPE), Some("application/javascript"));
        assert_eq!(res.url.as_deref(), Some(url.as_str()));
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let res = client(None)
            .fetch(&Request::get(format!("{}/gone", server.uri())))
            .await
            .unwrap();
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert!(!res.ok());
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
            .mount(&server)
            .await;

        let res = client(None)
            .fetch(&Request::get(format!("{}/old", server.uri())))
            .await
            .unwrap();
        assert_eq!(res.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(res.redirect_location(), Some("/new"));
    }

    #[tokio::test]
    async fn test_request_body_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/items"))
            .and(body_string("{\"name\":\"pen\"}"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let req = Request::get(format!("{}/api/items", server.uri()))
            .with_method(Method::POST)
            .with_body("{\"name\":\"pen\"}");
        let res = client(None).fetch(&req).await.unwrap();
        assert_eq!(res.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_cross_origin_no_cors_is_opaque() {
        let server = MockServer::start().await;
        Mock::given(path("/font.woff2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("font"))
            .mount(&server)
            .await;
        let url = format!("{}/font.woff2", server.uri());

        let mut req = Request::get(url.clone());
        req.mode = RequestMode::NoCors;

        let foreign = client(Some("https://app.example.com/")).fetch(&req).await.unwrap();
        assert!(foreign.is_opaque());
        assert!(!foreign.ok());

        let local = client(Some(&server.uri())).fetch(&req).await.unwrap();
        assert!(local.ok());

        let cors = client(Some("https://app.example.com/")).fetch(&Request::get(url)).await.unwrap();
        assert!(!cors.is_opaque());
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let err = client(None)
            .fetch(&Request::get(format!("{}/slow", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(path("/big"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 64]))
            .mount(&server)
            .await;

        let config = FetchConfig { max_bytes: 16, ..FetchConfig::default() };
        let err = FetchClient::new(config)
            .unwrap()
            .fetch(&Request::get(format!("{}/big", server.uri())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let err = client(None).fetch(&Request::get("ftp://example.com/x")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }
}

//! Request and response values exchanged with the host, and the network
//! primitive the engine fetches through.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::Error;

/// The network primitive.
///
/// `Err` means the request never produced a response (offline, DNS failure,
/// connection reset); HTTP error statuses are returned as `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, req: &Request) -> Result<Response, Error>;
}

/// Fetch, mapping network failure to a synthetic 504.
pub async fn safe_fetch(fetcher: &dyn Fetcher, req: &Request) -> Response {
    match fetcher.fetch(req).await {
        Ok(res) => res,
        Err(err) => {
            tracing::debug!(url = %req.url, "network fetch failed: {err}");
            Response::gateway_timeout()
        }
    }
}

/// How the host issued a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

/// The host's HTTP-cache directive for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestCache {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

/// An intercepted request. `url` is always absolute.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub cache: RequestCache,
    /// Browsing context that issued the request, if any.
    pub client_id: Option<String>,
    pub body: Option<Bytes>,
}

impl Request {
    /// A plain GET issued by the agent itself.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::Cors,
            cache: RequestCache::Default,
            client_id: None,
            body: None,
        }
    }

    /// A top-level navigation accepting HTML.
    pub fn navigate(url: impl Into<String>) -> Self {
        let mut req = Self::get(url);
        req.mode = RequestMode::Navigate;
        req.headers
            .insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        req
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// A copy of this request pointed at another URL, keeping only the method.
    pub fn redirect_to(&self, url: impl Into<String>) -> Self {
        Self::get(url).with_method(self.method.clone())
    }

    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the `Accept` header lists `text/html` explicitly.
    pub fn accepts_text_html(&self) -> bool {
        self.header_str(&header::ACCEPT)
            .map(|accept| {
                accept
                    .split(',')
                    .any(|v| v.trim().eq_ignore_ascii_case("text/html"))
            })
            .unwrap_or(false)
    }
}

/// Response tainting as seen by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Basic,
    /// Cross-origin no-cors response; status and body are hidden.
    Opaque,
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Final URL the response was served from.
    pub url: Option<String>,
    pub kind: ResponseKind,
}

impl Response {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into(), url: None, kind: ResponseKind::Basic }
    }

    /// 200 response with a content type.
    pub fn with_content(body: impl Into<Bytes>, content_type: &'static str) -> Self {
        let mut res = Self::new(StatusCode::OK, body);
        res.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        res
    }

    /// Synthetic answer used whenever the network could not be reached.
    pub fn gateway_timeout() -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, Bytes::new())
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// 2xx status on a response whose status is visible.
    pub fn ok(&self) -> bool {
        self.kind == ResponseKind::Basic && self.status.is_success()
    }

    pub fn is_opaque(&self) -> bool {
        self.kind == ResponseKind::Opaque
    }

    /// Location of a 3xx response, if present.
    pub fn redirect_location(&self) -> Option<&str> {
        if !self.status.is_redirection() {
            return None;
        }
        self.header_str(&header::LOCATION)
    }

    pub fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Headers as name/value pairs, for persistence.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect()
    }

    /// Rebuild a header map from persisted pairs, skipping invalid entries.
    pub fn headers_from_pairs(pairs: &[(String, String)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
                headers.append(name, value);
            }
        }
        headers
    }
}

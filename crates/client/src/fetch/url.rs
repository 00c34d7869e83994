//! URL checks applied before a request leaves the agent.

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize an absolute request URL.
///
/// The host is lowercased by the parser and the fragment, which never
/// reaches the server, is dropped. Only http and https are accepted.
pub fn canonicalize(input: &str) -> Result<url::Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = url::Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }
    parsed.set_fragment(None);
    Ok(parsed)
}

/// Whether `url` is served from `origin` (scheme, host and port).
pub fn same_origin(url: &url::Url, origin: &url::Url) -> bool {
    url.origin() == origin.origin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_lowercases_host_and_drops_fragment() {
        let url = canonicalize("https://EXAMPLE.com/app/main.js?v=2#top").unwrap();
        assert_eq!(url.as_str(), "https://example.com/app/main.js?v=2");
    }

    #[test]
    fn test_canonicalize_requires_absolute_url() {
        assert!(matches!(canonicalize("/main.js"), Err(UrlError::InvalidUrl(_))));
        assert!(matches!(canonicalize("   "), Err(UrlError::Empty)));
    }

    #[test]
    fn test_canonicalize_unsupported_scheme() {
        let result = canonicalize("file:///etc/passwd");
        assert!(matches!(result, Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_same_origin_compares_port() {
        let origin = canonicalize("https://example.com/").unwrap();
        assert!(same_origin(&canonicalize("https://example.com/a/b").unwrap(), &origin));
        assert!(!same_origin(&canonicalize("https://example.com:8443/").unwrap(), &origin));
        assert!(!same_origin(&canonicalize("http://example.com/").unwrap(), &origin));
        assert!(!same_origin(&canonicalize("https://cdn.example.com/").unwrap(), &origin));
    }
}

use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors raised when an operator-supplied source URL is rejected.
///
/// Sources are fetched by the server itself, so a URL pointing at loopback or
/// an internal network would turn the registry into an SSRF primitive.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a source endpoint before it is stored in the registry.
///
/// Rejects non-HTTP(S) schemes, hostless URLs, `localhost`, loopback
/// addresses and private/link-local ranges (RFC 1918, fc00::/7, fe80::/10).
///
/// # Examples
///
/// ```
/// use newsdesk::util::validate_url;
///
/// let url = validate_url("https://techcrunch.com/feed/").unwrap();
/// assert_eq!(url.host_str(), Some("techcrunch.com"));
///
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost") {
        return Err(UrlValidationError::Localhost);
    }

    // IPv6 hosts come back bracketed from host_str()
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_internal_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
    }
}

/// Resolve a link found on a scraped page against the page URL.
///
/// Absolute links pass through, relative ones are joined. Anything that does
/// not resolve to http(s) (`javascript:`, `mailto:`, bare fragments) yields `None`.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let joined = base.join(href).ok()?;
    matches!(joined.scheme(), "http" | "https").then(|| joined.to_string())
}

/// True when `s` is an absolute http(s) URL. Used to filter url-list exports.
pub fn is_http_url(s: &str) -> bool {
    Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_urls() {
        assert!(validate_url("https://news.ycombinator.com/rss").is_ok());
        assert!(validate_url("https://www.reddit.com/r/programming").is_ok());
        assert!(validate_url("https://example.com:443/feed.xml").is_ok());
    }

    #[test]
    fn test_invalid_schemes() {
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
        assert!(validate_url("ftp://example.com").is_err());
    }

    #[test]
    fn test_unparseable_rejected() {
        assert!(matches!(
            validate_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_localhost_rejected() {
        assert!(matches!(
            validate_url("http://localhost/feed"),
            Err(UrlValidationError::Localhost)
        ));
        assert!(validate_url("http://LOCALHOST:8080/feed").is_err());
        assert!(validate_url("http://127.0.0.1/feed").is_err());
        assert!(validate_url("http://[::1]/feed").is_err());
    }

    #[test]
    fn test_private_ips_rejected() {
        for url in [
            "http://192.168.1.1/feed",
            "http://10.0.0.1:3000/feed",
            "http://172.16.0.1/feed",
            "http://169.254.1.1/feed",
            "http://0.0.0.0/feed",
            "http://[fe80::1]/feed",
            "http://[fd00::1]/feed",
        ] {
            assert!(validate_url(url).is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn test_resolve_link_relative_and_absolute() {
        let base = Url::parse("https://blog.example.com/news/index.html").unwrap();
        assert_eq!(
            resolve_link(&base, "/posts/1").as_deref(),
            Some("https://blog.example.com/posts/1")
        );
        assert_eq!(
            resolve_link(&base, "story-2").as_deref(),
            Some("https://blog.example.com/news/story-2")
        );
        assert_eq!(
            resolve_link(&base, "https://other.example.org/a").as_deref(),
            Some("https://other.example.org/a")
        );
    }

    #[test]
    fn test_resolve_link_rejects_non_http() {
        let base = Url::parse("https://blog.example.com/").unwrap();
        assert_eq!(resolve_link(&base, "javascript:void(0)"), None);
        assert_eq!(resolve_link(&base, "mailto:tips@example.com"), None);
        assert_eq!(resolve_link(&base, "#top"), None);
        assert_eq!(resolve_link(&base, "   "), None);
    }

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://example.com/a"));
        assert!(is_http_url("http://example.com"));
        assert!(!is_http_url("/relative/path"));
        assert!(!is_http_url("ftp://example.com/file"));
    }
}

use url::Url;

/// Extracts the lowercase hostname from a URL
///
/// Ports are not part of the hostname: `example.com:8080` and `example.com`
/// share one domain admission key.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_scrape::url::extract_domain;
///
/// let url = Url::parse("https://EXAMPLE.COM:8080/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns true if both URLs share a hostname, ignoring a leading `www.`
pub fn same_domain(a: &Url, b: &Url) -> bool {
    fn bare(url: &Url) -> Option<String> {
        extract_domain(url).map(|host| match host.strip_prefix("www.") {
            Some(stripped) => stripped.to_string(),
            None => host,
        })
    }

    match (bare(a), bare(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

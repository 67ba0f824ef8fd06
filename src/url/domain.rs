use url::Url;

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use vid_harvest::url::extract_domain;
///
/// let url = Url::parse("https://WWW.Example.COM:8080/clip/").unwrap();
/// assert_eq!(extract_domain(&url), Some("www.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Strips a single leading `www.` label
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Returns the site key of a URL: its host without `www.`
///
/// Seeds given as `https://www.site.test/` and links on `site.test` share a key.
pub fn site_key(url: &Url) -> Option<String> {
    extract_domain(url).map(|h| strip_www(&h).to_string())
}

use crate::url::domain::strip_www;

/// Checks if a host matches a domain pattern
///
/// Patterns come from the extraction tables and from crawl seeds:
/// - `"example.com"` matches `example.com` and `www.example.com`
/// - `"*.example.com"` additionally matches any subdomain, nested or not
///
/// Comparison ignores ASCII case and a leading `www.` on either side.
///
/// # Examples
///
/// ```
/// use vid_harvest::url::matches_domain;
///
/// assert!(matches_domain("example.com", "WWW.Example.com"));
/// assert!(matches_domain("*.example.com", "cdn.media.example.com"));
/// assert!(!matches_domain("example.com", "cdn.example.com"));
/// assert!(!matches_domain("*.example.com", "notexample.com"));
/// ```
pub fn matches_domain(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    let host = host.trim().to_ascii_lowercase();
    let host = strip_www(&host);

    if host.is_empty() {
        return false;
    }

    match pattern.strip_prefix("*.") {
        Some(base) => {
            let base = strip_www(base);
            !base.is_empty() && (host == base || host.ends_with(&format!(".{}", base)))
        }
        None => host == strip_www(&pattern),
    }
}

/// Returns true if `host` matches any of `patterns`
pub fn matches_any_domain<S: AsRef<str>>(patterns: &[S], host: &str) -> bool {
    patterns.iter().any(|p| matches_domain(p.as_ref(), host))
}

//! URL shape classification
//!
//! Decides from a URL alone whether it is a candidate asset page, a listing
//! page worth crawling, or noise. No I/O happens here.

use crate::url::domain::strip_www;
use crate::url::matcher::matches_domain;
use url::Url;

/// Classification of a discovered URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlClass {
    /// Candidate page hosting one media item
    Asset,
    /// Category, listing or pagination page linking to assets
    Hub,
    /// Off-site, static resource, or administrative noise
    Reject,
}

/// Static resources never worth a visit
const STATIC_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "bmp", "css", "js", "json", "xml", "txt",
    "pdf", "zip", "rar", "woff", "woff2", "ttf", "eot", "mp3", "mp4", "m3u8", "webm", "avi",
    "mov", "mkv", "flv",
];

/// Extensions an asset page may carry
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "php"];

/// Administrative, legal, search and auth path segments
const BLACKLISTED_SEGMENTS: &[&str] = &[
    "tag",
    "tags",
    "author",
    "search",
    "login",
    "logout",
    "register",
    "signup",
    "contact",
    "contact-us",
    "dmca",
    "terms",
    "terms-of-service",
    "privacy",
    "privacy-policy",
    "about",
    "about-us",
    "feed",
    "cart",
    "checkout",
    "account",
    "user",
    "users",
    "profile",
    "wp-admin",
    "wp-login.php",
    "wp-json",
    "cdn-cgi",
];

/// Query keys that mark a search results page
const SEARCH_QUERY_KEYS: &[&str] = &["s", "q", "search"];

/// Segments that mark category or pagination listings anywhere in the path
const HUB_SEGMENTS: &[&str] = &["category", "categories", "page"];

/// Final segments naming a listing rather than an item
const LISTING_SEGMENTS: &[&str] = &[
    "videos",
    "latest",
    "popular",
    "trending",
    "most-viewed",
    "top-rated",
    "new",
];

/// Query keys carrying a page index
const PAGINATION_QUERY_KEYS: &[&str] = &["page", "paged"];

/// Prefix segments that may precede an asset slug
const ASSET_PREFIXES: &[&str] = &["video", "videos", "watch", "v"];

/// Classifies a URL relative to the site being crawled
///
/// A URL without a scheme is read as `https://`.
///
/// # Examples
///
/// ```
/// use vid_harvest::url::{classify, UrlClass};
///
/// assert_eq!(classify("example.com/category/foo/", "example.com"), UrlClass::Hub);
/// assert_eq!(classify("example.com/my-video-title/", "example.com"), UrlClass::Asset);
/// assert_eq!(classify("example.com/search/?q=x", "example.com"), UrlClass::Reject);
/// assert_eq!(classify("example.com/video.jpg", "example.com"), UrlClass::Reject);
/// ```
pub fn classify(url: &str, site_domain: &str) -> UrlClass {
    match parse_lenient(url) {
        Some(parsed) => classify_url(&parsed, site_domain),
        None => UrlClass::Reject,
    }
}

/// Classifies an already parsed URL
pub fn classify_url(url: &Url, site_domain: &str) -> UrlClass {
    if url.scheme() != "http" && url.scheme() != "https" {
        return UrlClass::Reject;
    }

    let on_site = url
        .host_str()
        .map(|host| matches_domain(&format!("*.{}", strip_www(site_domain)), host))
        .unwrap_or(false);
    if !on_site {
        return UrlClass::Reject;
    }

    let segments: Vec<String> = url
        .path_segments()
        .map(|s| {
            s.filter(|seg| !seg.is_empty())
                .map(|seg| seg.to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    if let Some(last) = segments.last() {
        if let Some(ext) = extension(last) {
            if STATIC_EXTENSIONS.contains(&ext) || !PAGE_EXTENSIONS.contains(&ext) {
                return UrlClass::Reject;
            }
        }
    }

    if segments
        .iter()
        .any(|seg| BLACKLISTED_SEGMENTS.contains(&seg.as_str()))
    {
        return UrlClass::Reject;
    }

    let query_keys: Vec<String> = url.query_pairs().map(|(k, _)| k.to_lowercase()).collect();
    if query_keys
        .iter()
        .any(|k| SEARCH_QUERY_KEYS.contains(&k.as_str()))
    {
        return UrlClass::Reject;
    }

    if segments.is_empty() {
        return UrlClass::Hub;
    }

    let is_hub = segments
        .iter()
        .any(|seg| HUB_SEGMENTS.contains(&seg.as_str()))
        || segments
            .last()
            .map(|seg| LISTING_SEGMENTS.contains(&seg.as_str()))
            .unwrap_or(false)
        || query_keys
            .iter()
            .any(|k| PAGINATION_QUERY_KEYS.contains(&k.as_str()));
    if is_hub {
        return UrlClass::Hub;
    }

    if is_asset_shape(&segments) {
        UrlClass::Asset
    } else {
        UrlClass::Reject
    }
}

fn parse_lenient(url: &str) -> Option<Url> {
    let url = url.trim();
    match Url::parse(url) {
        Ok(parsed) => Some(parsed),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("https://{}", url)).ok()
        }
        Err(_) => None,
    }
}

/// Lowercased file extension of a path segment, if it has one
fn extension(segment: &str) -> Option<&str> {
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

/// One slug, optionally preceded by numeric (date/id) or video prefix segments
fn is_asset_shape(segments: &[String]) -> bool {
    let Some((last, prefix)) = segments.split_last() else {
        return false;
    };

    if prefix.len() > 3 {
        return false;
    }

    let prefix_ok = prefix.iter().all(|seg| {
        seg.chars().all(|c| c.is_ascii_digit()) || ASSET_PREFIXES.contains(&seg.as_str())
    });

    prefix_ok && (is_slug(last) || is_numeric_id(last))
}

fn is_slug(segment: &str) -> bool {
    let stem = match extension(segment) {
        Some(ext) => &segment[..segment.len() - ext.len() - 1],
        None => segment,
    };

    stem.chars().any(|c| c.is_ascii_alphabetic())
        && stem
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '%' | '+' | '.'))
}

fn is_numeric_id(segment: &str) -> bool {
    segment.len() >= 4 && segment.chars().all(|c| c.is_ascii_digit())
}

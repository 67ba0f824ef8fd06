//! Link and sitemap extraction
//!
//! HTML pages yield `<a href>` targets resolved against the page URL;
//! sitemaps yield their `<loc>` entries.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

/// Extracts all followable links from an HTML page
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - Fragment-only anchors
///
/// # Example
///
/// ```
/// use url::Url;
/// use vid_harvest::crawler::extract_links;
///
/// let html = r#"<html><body><a href="/clip-one/">One</a></body></html>"#;
/// let base = Url::parse("https://site.test/").unwrap();
/// let links = extract_links(html, &base);
/// assert_eq!(links[0].as_str(), "https://site.test/clip-one/");
/// ```
pub fn extract_links(html: &str, base_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(url) = element.value().attr("href").and_then(|h| resolve_link(h, base_url)) {
                links.push(url);
            }
        }
    }

    if let Ok(canonical) = Selector::parse("link[rel='canonical'][href]") {
        links.extend(
            document
                .select(&canonical)
                .filter_map(|el| el.value().attr("href"))
                .filter_map(|href| resolve_link(href, base_url)),
        );
    }

    links
}

/// Resolves an href against the page URL, dropping non-HTTP targets
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}

static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc>\s*(?:<!\[CDATA\[)?\s*(.*?)\s*(?:\]\]>)?\s*</loc>")
        .expect("sitemap loc regex is valid")
});

/// Extracts `<loc>` entries from a sitemap or sitemap index
///
/// Entities `&amp;`, `&lt;`, `&gt;`, `&quot;` and `&apos;` are decoded.
pub fn extract_sitemap_locs(xml: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(xml)
        .filter_map(|cap| cap.get(1))
        .map(|m| decode_xml_entities(m.as_str()))
        .filter(|loc| !loc.is_empty())
        .collect()
}

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// True when a sitemap entry points to another sitemap rather than a page
pub fn is_nested_sitemap(loc: &Url) -> bool {
    let path = loc.path().to_ascii_lowercase();
    path.ends_with(".xml") || path.ends_with(".xml.gz")
}

//! Payload-decode extraction
//!
//! Some players are embedded as `<iframe src="player-x.php?q=...">` where `q`
//! is a base64 encoded HTML fragment holding the `<source>` tags. The page is
//! fetched directly, the payload decoded and the first MP4 source taken.

use super::ExtractedMedia;
use crate::{HarvestError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use url::Url;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Player script preferred when several iframes carry a payload
const PREFERRED_PLAYER: &str = "player-x.php";

/// Extracts media by decoding the embedded player payload
#[derive(Debug, Clone)]
pub struct PayloadDecoder {
    client: Client,
}

impl PayloadDecoder {
    pub fn new(timeout_secs: u64, proxy: Option<&str>) -> std::result::Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(timeout_secs))
            .gzip(true)
            .brotli(true);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            client: builder.build()?,
        })
    }

    pub async fn extract(&self, url: &str) -> Result<ExtractedMedia> {
        tracing::info!("Decoding player payload for {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarvestError::extraction(url, format!("Page fetch failed: {}", e)))?;
        let page_url = response.url().clone();
        let html = response
            .text()
            .await
            .map_err(|e| HarvestError::extraction(url, format!("Page read failed: {}", e)))?;

        let title = page_title(&html);
        let iframe_src = find_player_payload(&html).map_err(|m| HarvestError::extraction(url, m))?;
        let iframe_url = page_url
            .join(&iframe_src)
            .map_err(|e| HarvestError::extraction(url, format!("Bad player iframe URL: {}", e)))?;

        let payload = iframe_url
            .query_pairs()
            .find(|(k, _)| k == "q")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| HarvestError::extraction(url, "No 'q' parameter in iframe"))?;

        let fragment = decode_payload(&payload)
            .ok_or_else(|| HarvestError::extraction(url, "Player payload is not valid base64"))?;

        let media_url = find_media_source(&fragment, &iframe_url).ok_or_else(|| {
            HarvestError::extraction(url, "No MP4 source found in decoded content")
        })?;

        tracing::debug!("Decoded media source {}", media_url);
        Ok(ExtractedMedia { media_url, title })
    }
}

fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Finds the `src` of the player iframe carrying a `q=` payload
///
/// An iframe pointing at `player-x.php` wins; otherwise the first iframe with
/// a payload is used. The error lists the iframes that were seen.
pub fn find_player_payload(html: &str) -> std::result::Result<String, String> {
    let document = Html::parse_document(html);
    let selector =
        Selector::parse("iframe").map_err(|e| format!("Invalid iframe selector: {:?}", e))?;

    let sources: Vec<&str> = document
        .select(&selector)
        .filter_map(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
        .collect();

    let carries_payload = |src: &str| src.contains("q=");
    if let Some(preferred) = sources
        .iter()
        .find(|src| carries_payload(src) && src.contains(PREFERRED_PLAYER))
    {
        return Ok(preferred.to_string());
    }
    if let Some(first) = sources.iter().find(|src| carries_payload(src)) {
        return Ok(first.to_string());
    }

    let seen: Vec<String> = sources
        .iter()
        .take(3)
        .map(|s| s.chars().take(50).collect())
        .collect();
    Err(format!(
        "No player iframe found: scanned {} iframes, none had a 'q=' param [{}]",
        sources.len(),
        seen.join(", ")
    ))
}

/// Decodes a base64 player payload into its HTML fragment
///
/// Tolerates the damage payloads take in transit: `+` turned into spaces by
/// form decoding, URL-safe alphabet and missing padding.
pub fn decode_payload(payload: &str) -> Option<String> {
    // Spaces are mangled '+' signs, so only other whitespace is trimmed
    let cleaned: String = payload
        .trim_matches(|c: char| c.is_whitespace() && c != ' ')
        .chars()
        .filter_map(|c| match c {
            ' ' | '-' => Some('+'),
            '_' => Some('/'),
            '=' => None,
            c if c.is_whitespace() => None,
            c => Some(c),
        })
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let mut padded = cleaned;
    while padded.len() % 4 != 0 {
        padded.push('=');
    }

    let bytes = STANDARD.decode(padded.as_bytes()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Returns the first MP4 `<source>` in a decoded fragment, made absolute
pub fn find_media_source(fragment: &str, base: &Url) -> Option<String> {
    let document = Html::parse_fragment(fragment);
    let selector = Selector::parse("source").ok()?;

    document
        .select(&selector)
        .filter_map(|el| {
            let src = el.value().attr("src")?.trim();
            let mime = el.value().attr("type").unwrap_or("");
            let is_mp4 = src.to_ascii_lowercase().contains(".mp4")
                || mime.to_ascii_lowercase().contains("video/mp4");
            (is_mp4 && !src.is_empty()).then_some(src)
        })
        .find_map(|src| base.join(src).ok())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(fragment: &str) -> String {
        STANDARD.encode(fragment)
    }

    fn base() -> Url {
        Url::parse("https://site.test/player-x.php?q=abc").unwrap()
    }

    #[test]
    fn test_prefers_player_x_iframe() {
        let html = r#"
            <iframe src="https://ads.test/banner?q=zzz"></iframe>
            <iframe src="/player-x.php?q=abcd"></iframe>
        "#;
        assert_eq!(find_player_payload(html).unwrap(), "/player-x.php?q=abcd");
    }

    #[test]
    fn test_falls_back_to_first_payload_iframe() {
        let html = r#"
            <iframe src="https://comments.test/embed"></iframe>
            <iframe src="/embed.php?q=abcd"></iframe>
        "#;
        assert_eq!(find_player_payload(html).unwrap(), "/embed.php?q=abcd");
    }

    #[test]
    fn test_no_payload_iframe() {
        let err = find_player_payload(r#"<iframe src="/embed"></iframe>"#).unwrap_err();
        assert!(err.contains("scanned 1 iframes"));
    }

    #[test]
    fn test_decode_unpadded_payload() {
        let encoded = encode("<video><source src=\"a.mp4\"></video>");
        let trimmed = encoded.trim_end_matches('=');
        assert_eq!(
            decode_payload(trimmed).unwrap(),
            "<video><source src=\"a.mp4\"></video>"
        );
    }

    #[test]
    fn test_decode_restores_plus_signs() {
        let encoded = STANDARD.encode(b"<p>\xfb\xef\xbe</p>");
        assert_eq!(encoded, "PHA+++++PC9wPg==");

        let form_decoded = encoded.replace('+', " ");
        assert_eq!(decode_payload(&form_decoded), decode_payload(&encoded));
        assert!(decode_payload(&form_decoded).unwrap().starts_with("<p>"));
    }

    #[test]
    fn test_decode_url_safe_alphabet() {
        let url_safe = "PHA-----PC9wPg";
        assert_eq!(decode_payload(url_safe), decode_payload("PHA+++++PC9wPg=="));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_payload("").is_none());
        assert!(decode_payload("!!!!").is_none());
    }

    #[test]
    fn test_find_mp4_source_by_extension_or_type() {
        let fragment = r#"
            <video>
                <source src="https://cdn.test/clip.webm" type="video/webm">
                <source src="/media/clip-720.mp4" type="video/mp4">
                <source src="/media/clip-480.mp4" type="video/mp4">
            </video>
        "#;
        assert_eq!(
            find_media_source(fragment, &base()).unwrap(),
            "https://site.test/media/clip-720.mp4"
        );

        let typed_only = r#"<video><source src="https://cdn.test/stream?id=9" type="video/mp4"></video>"#;
        assert_eq!(
            find_media_source(typed_only, &base()).unwrap(),
            "https://cdn.test/stream?id=9"
        );
    }

    #[test]
    fn test_no_mp4_source() {
        let fragment = r#"<video><source src="clip.webm" type="video/webm"></video>"#;
        assert!(find_media_source(fragment, &base()).is_none());
    }
}

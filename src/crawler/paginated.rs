//! Paginated-sweep strategy
//!
//! Walks numbered listing pages built from the seed URL. Listings rarely have
//! a reliable end marker, so the sweep stops on its own once consecutive pages
//! stop producing new assets.

use crate::crawler::fetcher::{PageClient, PageFetch};
use crate::crawler::parser::extract_links;
use crate::crawler::DiscoveredAssets;
use crate::url::{classify_url, UrlClass};
use url::Url;

/// Consecutive pages without a new asset that end the sweep
pub const EMPTY_PAGE_LIMIT: u32 = 2;

/// Query keys recognised as an existing page index on the seed
const PAGE_QUERY_KEYS: &[&str] = &["page", "paged", "p"];

/// How page numbers are written into listing URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// `?page=N`, reusing the seed's own key when it has one
    Query { key: String },
    /// `/page/N/` appended to the listing path
    Path,
}

impl Pagination {
    /// Picks query pagination when the seed already carries a query string
    pub fn detect(seed: &Url) -> Self {
        if seed.query().map(|q| !q.is_empty()).unwrap_or(false) {
            let key = seed
                .query_pairs()
                .map(|(k, _)| k.to_lowercase())
                .find(|k| PAGE_QUERY_KEYS.contains(&k.as_str()))
                .unwrap_or_else(|| "page".to_string());
            Pagination::Query { key }
        } else {
            Pagination::Path
        }
    }

    /// Builds the URL of listing page `page` (1-based)
    pub fn page_url(&self, seed: &Url, page: u32) -> Url {
        let mut url = seed.clone();
        url.set_fragment(None);

        match self {
            Pagination::Query { key } => {
                let mut pairs: Vec<(String, String)> = seed
                    .query_pairs()
                    .filter(|(k, _)| !k.eq_ignore_ascii_case(key))
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                pairs.push((key.clone(), page.to_string()));
                url.query_pairs_mut().clear().extend_pairs(pairs);
            }
            Pagination::Path => {
                let mut segments: Vec<&str> = seed
                    .path_segments()
                    .map(|s| s.filter(|seg| !seg.is_empty()).collect())
                    .unwrap_or_default();

                // Seeds given as `/listing/page/3/` restart from the listing itself
                if segments.len() >= 2
                    && segments[segments.len() - 2].eq_ignore_ascii_case("page")
                    && segments[segments.len() - 1].chars().all(|c| c.is_ascii_digit())
                {
                    segments.truncate(segments.len() - 2);
                }

                let mut path = String::from("/");
                for segment in segments {
                    path.push_str(segment);
                    path.push('/');
                }
                if page > 1 {
                    path.push_str(&format!("page/{}/", page));
                }
                url.set_path(&path);
            }
        }

        url
    }
}

/// Sweeps `budget` listing pages starting at `start_page`
pub async fn discover(
    pages: &PageClient,
    seed: &Url,
    site: &str,
    start_page: u32,
    budget: u32,
    found: &mut DiscoveredAssets,
) {
    let pagination = Pagination::detect(seed);
    let start_page = start_page.max(1);
    let mut empty_streak = 0;

    tracing::info!(
        "Sweeping {} pages of {} from page {} ({:?})",
        budget,
        seed,
        start_page,
        pagination
    );

    for page in start_page..start_page.saturating_add(budget) {
        let page_url = pagination.page_url(seed, page);
        found.pages_scanned += 1;

        match pages.fetch(&page_url).await {
            PageFetch::Page { final_url, body } => {
                let new_assets = extract_links(&body, &final_url)
                    .iter()
                    .filter(|link| classify_url(link, site) == UrlClass::Asset)
                    .filter(|link| found.add(link))
                    .count();

                tracing::info!(
                    "Page {}: {} new assets ({} total)",
                    page,
                    new_assets,
                    found.len()
                );

                if new_assets == 0 {
                    empty_streak += 1;
                    if empty_streak >= EMPTY_PAGE_LIMIT {
                        tracing::info!(
                            "Stopping after page {}: {} consecutive pages without new assets",
                            page,
                            empty_streak
                        );
                        break;
                    }
                } else {
                    empty_streak = 0;
                }
            }
            PageFetch::NotFound => {
                tracing::info!("Page {} not found, pagination ended", page);
                break;
            }
            PageFetch::HttpError { status } => {
                tracing::warn!("Skipping page {} ({}): HTTP {}", page, page_url, status);
            }
            PageFetch::NetworkError { error } => {
                tracing::warn!("Skipping page {} ({}): {}", page, page_url, error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_detect_path_pagination() {
        assert_eq!(Pagination::detect(&url("https://site.test/videos/")), Pagination::Path);
    }

    #[test]
    fn test_detect_query_pagination() {
        assert_eq!(
            Pagination::detect(&url("https://site.test/list?sort=new")),
            Pagination::Query {
                key: "page".to_string()
            }
        );
        assert_eq!(
            Pagination::detect(&url("https://site.test/?paged=4")),
            Pagination::Query {
                key: "paged".to_string()
            }
        );
    }

    #[test]
    fn test_path_page_urls() {
        let seed = url("https://site.test/videos/");
        let pagination = Pagination::Path;

        assert_eq!(pagination.page_url(&seed, 1).as_str(), "https://site.test/videos/");
        assert_eq!(
            pagination.page_url(&seed, 3).as_str(),
            "https://site.test/videos/page/3/"
        );
    }

    #[test]
    fn test_path_seed_already_paginated() {
        let seed = url("https://site.test/videos/page/7/");
        assert_eq!(
            Pagination::Path.page_url(&seed, 2).as_str(),
            "https://site.test/videos/page/2/"
        );
    }

    #[test]
    fn test_root_path_page_urls() {
        let seed = url("https://site.test");
        assert_eq!(
            Pagination::Path.page_url(&seed, 2).as_str(),
            "https://site.test/page/2/"
        );
    }

    #[test]
    fn test_query_page_urls_replace_existing_index() {
        let seed = url("https://site.test/list?sort=new&page=9");
        let pagination = Pagination::detect(&seed);

        assert_eq!(
            pagination.page_url(&seed, 2).as_str(),
            "https://site.test/list?sort=new&page=2"
        );
    }
}

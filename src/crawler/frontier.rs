//! Priority frontier strategy
//!
//! Breadth-first traversal from the seed. Asset links are recorded as soon as
//! they are seen and never fetched; hub links join the back of the queue.

use crate::crawler::fetcher::{PageClient, PageFetch};
use crate::crawler::parser::extract_links;
use crate::crawler::DiscoveredAssets;
use crate::url::{classify_url, normalize_url, UrlClass};
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Crawls hubs breadth-first until the frontier drains or the budget runs out
pub async fn discover(
    pages: &PageClient,
    seed: &Url,
    site: &str,
    budget: u32,
    found: &mut DiscoveredAssets,
) {
    let mut frontier: VecDeque<Url> = VecDeque::from([seed.clone()]);
    let mut seen: HashSet<String> = HashSet::from([frontier_key(seed)]);
    let mut visited = 0u32;

    tracing::info!("Starting frontier crawl from {} (budget {})", seed, budget);

    while let Some(page_url) = frontier.pop_front() {
        if visited >= budget {
            tracing::info!(
                "Page budget of {} reached with {} hubs queued",
                budget,
                frontier.len() + 1
            );
            break;
        }
        visited += 1;
        found.pages_scanned += 1;

        tracing::info!("Crawling page {}/{}: {}", visited, budget, page_url);

        let (final_url, body) = match pages.fetch(&page_url).await {
            PageFetch::Page { final_url, body } => (final_url, body),
            other => {
                tracing::warn!("Error crawling {}: {:?}", page_url, other);
                continue;
            }
        };

        let mut hubs_queued = 0;
        for link in extract_links(&body, &final_url) {
            match classify_url(&link, site) {
                UrlClass::Asset => {
                    found.add(&link);
                }
                UrlClass::Hub => {
                    if seen.insert(frontier_key(&link)) {
                        frontier.push_back(link);
                        hubs_queued += 1;
                    }
                }
                UrlClass::Reject => {}
            }
        }

        tracing::debug!(
            "{}: {} assets so far, {} new hubs queued",
            page_url,
            found.len(),
            hubs_queued
        );
    }

    tracing::info!(
        "Frontier crawl complete: {} asset URLs from {} pages",
        found.len(),
        visited
    );
}

fn frontier_key(url: &Url) -> String {
    normalize_url(url.as_str())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

//! Sitemap strategy
//!
//! Probes the well-known sitemap locations in order. The first location that
//! answers with a success status is read; sitemap indexes are followed into
//! their child sitemaps while the page budget lasts.

use crate::crawler::fetcher::{PageClient, PageFetch};
use crate::crawler::parser::{extract_sitemap_locs, is_nested_sitemap};
use crate::crawler::DiscoveredAssets;
use crate::url::{classify_url, matches_domain, UrlClass};
use std::collections::{HashSet, VecDeque};
use url::Url;

/// Reads the site's sitemap into `found`
///
/// Returns false when none of `paths` answered with a success status, in
/// which case the caller falls back to the frontier strategy.
pub async fn discover(
    pages: &PageClient,
    seed: &Url,
    site: &str,
    paths: &[String],
    budget: u32,
    found: &mut DiscoveredAssets,
) -> bool {
    tracing::info!("Trying sitemap discovery for {}", site);

    for path in paths {
        let Ok(sitemap_url) = seed.join(path) else {
            continue;
        };

        found.pages_scanned += 1;
        match pages.fetch(&sitemap_url).await {
            PageFetch::Page { final_url, body } => {
                tracing::info!("Found sitemap: {}", final_url);
                read_sitemap_tree(pages, site, &final_url, &body, budget, found).await;
                return true;
            }
            PageFetch::NotFound => {
                tracing::debug!("Sitemap {} not found", sitemap_url);
            }
            PageFetch::HttpError { status } => {
                tracing::debug!("Sitemap {} failed with HTTP {}", sitemap_url, status);
            }
            PageFetch::NetworkError { error } => {
                tracing::debug!("Sitemap {} failed: {}", sitemap_url, error);
            }
        }
    }

    false
}

async fn read_sitemap_tree(
    pages: &PageClient,
    site: &str,
    root_url: &Url,
    root_body: &str,
    budget: u32,
    found: &mut DiscoveredAssets,
) {
    let mut visited: HashSet<String> = HashSet::from([root_url.to_string()]);
    let mut nested: VecDeque<Url> = VecDeque::new();

    collect_locs(root_body, site, found, &mut visited, &mut nested);

    while let Some(child) = nested.pop_front() {
        if found.pages_scanned >= budget {
            tracing::info!(
                "Page budget of {} reached with {} child sitemaps unread",
                budget,
                nested.len() + 1
            );
            break;
        }

        found.pages_scanned += 1;
        match pages.fetch(&child).await {
            PageFetch::Page { body, .. } => {
                collect_locs(&body, site, found, &mut visited, &mut nested);
            }
            other => {
                tracing::warn!("Skipping child sitemap {}: {:?}", child, other);
            }
        }
    }

    tracing::info!("Sitemap yielded {} asset URLs", found.len());
}

fn collect_locs(
    body: &str,
    site: &str,
    found: &mut DiscoveredAssets,
    visited: &mut HashSet<String>,
    nested: &mut VecDeque<Url>,
) {
    let site_pattern = format!("*.{}", site);

    for loc in extract_sitemap_locs(body) {
        let Ok(url) = Url::parse(&loc) else {
            continue;
        };

        if is_nested_sitemap(&url) {
            let on_site = url
                .host_str()
                .map(|host| matches_domain(&site_pattern, host))
                .unwrap_or(false);
            if on_site && visited.insert(url.to_string()) {
                nested.push_back(url);
            }
            continue;
        }

        if classify_url(&url, site) == UrlClass::Asset {
            found.add(&url);
        }
    }
}

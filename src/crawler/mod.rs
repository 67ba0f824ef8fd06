//! Discovery crawler
//!
//! This module finds candidate asset pages on a site and seeds them into the
//! asset store:
//! - Page fetching with pacing and identity rotation
//! - Link and sitemap parsing
//! - Sitemap, paginated-sweep and frontier strategies
//! - Manual seeding from a links file

mod fetcher;
mod frontier;
mod paginated;
mod parser;
mod politeness;
mod sitemap;

pub use fetcher::{build_http_client, fetch_page, PageClient, PageFetch};
pub use paginated::{Pagination, EMPTY_PAGE_LIMIT};
pub use parser::{extract_links, extract_sitemap_locs, resolve_link};
pub use politeness::Politeness;

use crate::config::Config;
use crate::storage::{lock_storage, AssetStore, SharedStorage};
use crate::url::{normalize_url, site_key};
use crate::{HarvestError, Result, UrlError};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use url::Url;

/// Traversal strategy for one discovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryStrategy {
    /// Sitemap, then a frontier crawl if the sitemap is missing or yields nothing
    #[default]
    Auto,
    /// Sitemap, then a frontier crawl only if no sitemap answers
    Sitemap,
    /// Numbered listing pages with auto-stop
    Paginated,
    /// Breadth-first crawl over hub pages
    Frontier,
}

impl DiscoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryStrategy::Auto => "auto",
            DiscoveryStrategy::Sitemap => "sitemap",
            DiscoveryStrategy::Paginated => "paginated",
            DiscoveryStrategy::Frontier => "frontier",
        }
    }
}

impl fmt::Display for DiscoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DiscoveryStrategy::Auto),
            "sitemap" => Ok(DiscoveryStrategy::Sitemap),
            "paginated" | "pagination" => Ok(DiscoveryStrategy::Paginated),
            "frontier" | "generic" | "crawl" => Ok(DiscoveryStrategy::Frontier),
            other => Err(format!(
                "unknown strategy '{}' (expected auto, sitemap, paginated or frontier)",
                other
            )),
        }
    }
}

/// Counts reported for one discovery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub pages_scanned: u32,
    /// Distinct asset URLs the run found
    pub links_found: usize,
    /// Of those, how many were new to the store
    pub links_added: usize,
}

/// Deduplicated asset URLs gathered during one run, in discovery order
#[derive(Debug, Default)]
pub struct DiscoveredAssets {
    seen: HashSet<String>,
    urls: Vec<String>,
    pub pages_scanned: u32,
}

impl DiscoveredAssets {
    /// Records an asset URL; returns false if it was already recorded
    pub fn add(&mut self, url: &Url) -> bool {
        let key = match normalize_url(url.as_str()) {
            Ok(normalized) => normalized.to_string(),
            Err(e) => {
                tracing::debug!("Dropping unnormalizable link {}: {}", url, e);
                return false;
            }
        };

        if self.seen.insert(key.clone()) {
            self.urls.push(key);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }
}

/// Discovers asset pages reachable from `seed_url` and seeds them as PENDING
///
/// All found URLs go to the store in a single bulk insert that ignores URLs
/// already present, so re-running discovery never duplicates or regresses a
/// record.
///
/// # Arguments
///
/// * `storage` - Shared asset store
/// * `config` - Loaded configuration
/// * `seed_url` - Homepage, listing or category page to start from
/// * `strategy` - Traversal strategy
/// * `page_budget` - Page limit; `discovery.default-page-budget` when `None`
/// * `start_page` - First listing page for the paginated sweep (default 1)
pub async fn discover_and_seed(
    storage: &SharedStorage,
    config: &Config,
    seed_url: &str,
    strategy: DiscoveryStrategy,
    page_budget: Option<u32>,
    start_page: Option<u32>,
) -> Result<DiscoveryStats> {
    let seed = normalize_url(seed_url)?;
    let site = site_key(&seed).ok_or(UrlError::MissingDomain)?;
    let budget = page_budget
        .unwrap_or(config.discovery.default_page_budget)
        .max(1);

    let pages = PageClient::new(&config.discovery, config.proxy.as_deref()).map_err(|source| {
        HarvestError::Http {
            url: seed.to_string(),
            source,
        }
    })?;

    tracing::info!(
        "Starting {} discovery of {} (budget {} pages)",
        strategy,
        seed,
        budget
    );

    let mut found = DiscoveredAssets::default();
    match strategy {
        DiscoveryStrategy::Auto | DiscoveryStrategy::Sitemap => {
            let sitemap_found = sitemap::discover(
                &pages,
                &seed,
                &site,
                &config.discovery.sitemap_paths,
                budget,
                &mut found,
            )
            .await;

            let fall_back = !sitemap_found
                || (strategy == DiscoveryStrategy::Auto && found.is_empty());
            if fall_back {
                tracing::warn!("No usable sitemap for {}, falling back to frontier crawl", site);
                frontier::discover(&pages, &seed, &site, budget, &mut found).await;
            }
        }
        DiscoveryStrategy::Paginated => {
            paginated::discover(
                &pages,
                &seed,
                &site,
                start_page.unwrap_or(1),
                budget,
                &mut found,
            )
            .await;
        }
        DiscoveryStrategy::Frontier => {
            frontier::discover(&pages, &seed, &site, budget, &mut found).await;
        }
    }

    let links_added = if found.is_empty() {
        0
    } else {
        lock_storage(storage).bulk_insert_new(found.urls())?
    };

    let stats = DiscoveryStats {
        pages_scanned: found.pages_scanned,
        links_found: found.len(),
        links_added,
    };

    tracing::info!(
        "Discovery complete: {} pages scanned, {} assets found, {} new",
        stats.pages_scanned,
        stats.links_found,
        stats.links_added
    );

    Ok(stats)
}

/// Seeds asset URLs from a links file, one URL per line
///
/// Blank lines and lines starting with `#` are skipped. Returns the number of
/// URLs that were new to the store.
pub fn seed_from_file(storage: &SharedStorage, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let urls = parse_links_file(&content);

    if urls.is_empty() {
        tracing::warn!("No URLs found in {}", path.display());
        return Ok(0);
    }

    let added = lock_storage(storage).bulk_insert_new(&urls)?;
    tracing::info!(
        "Seeded {} new URLs from {} ({} listed)",
        added,
        path.display(),
        urls.len()
    );
    Ok(added)
}

fn parse_links_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

//! URL handling module
//!
//! This module provides URL normalization, domain extraction, domain pattern
//! matching and the asset/hub/reject classifier used by discovery.

mod classifier;
mod domain;
mod matcher;
mod normalize;

pub use classifier::{classify, classify_url, UrlClass};
pub use domain::{extract_domain, site_key, strip_www};
pub use matcher::{matches_any_domain, matches_domain};
pub use normalize::normalize_url;

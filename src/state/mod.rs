//! State module for tracking asset progress
//!
//! `AssetStatus` is the lifecycle of one asset record: pending, the three
//! in-flight stages, and the completed/failed outcomes.

mod asset_status;

pub use asset_status::AssetStatus;

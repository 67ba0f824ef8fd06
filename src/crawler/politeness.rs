//! Request pacing and client identity rotation
//!
//! Every discovery request waits a randomized delay drawn from the configured
//! range and presents the next identity string from the rotation pool.

use crate::config::{default_user_agents, DiscoveryConfig};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Per-run pacing state shared by all requests of one discovery run
#[derive(Debug)]
pub struct Politeness {
    user_agents: Vec<String>,
    delay_min_ms: u64,
    delay_max_ms: u64,
    next_agent: AtomicUsize,
    started: AtomicBool,
}

impl Politeness {
    pub fn new(user_agents: Vec<String>, delay_min_ms: u64, delay_max_ms: u64) -> Self {
        let mut user_agents: Vec<String> = user_agents
            .into_iter()
            .filter(|ua| !ua.trim().is_empty())
            .collect();
        if user_agents.is_empty() {
            user_agents = default_user_agents();
        }

        // Random starting point so separate runs do not open with the same identity
        let offset = rand::thread_rng().gen_range(0..user_agents.len());

        Self {
            user_agents,
            delay_min_ms: delay_min_ms.min(delay_max_ms),
            delay_max_ms,
            next_agent: AtomicUsize::new(offset),
            started: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(
            config.user_agents.clone(),
            config.delay_min_ms,
            config.delay_max_ms,
        )
    }

    /// Returns the identity string for the next request
    pub fn user_agent(&self) -> &str {
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        &self.user_agents[index]
    }

    /// Draws a delay from the configured range
    pub fn next_delay(&self) -> Duration {
        let ms = if self.delay_max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(self.delay_min_ms..=self.delay_max_ms)
        };
        Duration::from_millis(ms)
    }

    /// Sleeps before a request; the first request of a run goes out immediately
    pub async fn pause(&self) {
        if !self.started.swap(true, Ordering::Relaxed) {
            return;
        }

        let delay = self.next_delay();
        if !delay.is_zero() {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Pacing next request");
            tokio::time::sleep(delay).await;
        }
    }
}

//! Concurrency planning for batch remux jobs
//!
//! Derives how many remux jobs of one batch may run at once from the
//! request's hint, the configured default and the number of eligible items.

use crate::config::{Config, MAX_BATCH_CONCURRENCY, MIN_BATCH_CONCURRENCY};

/// Concurrency plan for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    /// Number of items that will be remuxed
    pub eligible: usize,
    /// Maximum number of jobs in flight at once
    pub max_in_flight: usize,
}

impl BatchPlan {
    /// Derive a batch plan
    ///
    /// Uses the following rules:
    /// - Uses `hint` when given, otherwise `default`
    /// - Clamps the result to [1, 16]
    /// - Clamps again to at most `eligible` (but never below 1)
    pub fn derive(hint: Option<u32>, default: u32, eligible: usize) -> Self {
        let requested = clamp_concurrency(hint.unwrap_or(default)) as usize;
        Self {
            eligible,
            max_in_flight: requested.min(eligible).max(1),
        }
    }
}

/// Clamp a requested concurrency to [1, 16]
pub fn clamp_concurrency(requested: u32) -> u32 {
    requested.clamp(MIN_BATCH_CONCURRENCY, MAX_BATCH_CONCURRENCY)
}

/// Derive a batch plan using the configured default concurrency
pub fn derive_plan(cfg: &Config, hint: Option<u32>, eligible: usize) -> BatchPlan {
    BatchPlan::derive(hint, cfg.transform.batch_concurrency, eligible)
}

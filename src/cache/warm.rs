//! Cache Warm-Up
//!
//! Loads a list of identifiers through a [`Fetch`] implementation with
//! bounded concurrency. Run explicitly by the composition root.

use crate::cache::events::CacheEvent;
use crate::cache::fetch::Fetch;
use crate::cache::key::{CacheKey, Identifier};
use crate::cache::manager::{FetchOptions, TieredCache};
use crate::cache::storage::CacheValue;
use crate::cache::tier::Priority;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Default number of warm-up fetches in flight
pub const DEFAULT_WARM_CONCURRENCY: usize = 4;

/// One identifier to load ahead of demand
#[derive(Debug, Clone)]
pub struct WarmRequest {
    pub identifier: Identifier,
    pub options: FetchOptions,
}

impl WarmRequest {
    pub fn new(identifier: impl Into<Identifier>, priority: Priority) -> Self {
        Self {
            identifier: identifier.into(),
            options: FetchOptions::new(priority),
        }
    }
}

/// Outcome of a warm-up run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub requested: usize,
    /// Fetched and stored
    pub loaded: usize,
    /// Already present, no fetch made
    pub already_cached: usize,
    pub failed: usize,
}

enum WarmOutcome {
    Loaded,
    Cached,
    Failed,
}

impl<T: CacheValue> TieredCache<T> {
    /// Load every request that is not already cached. Each request is one
    /// counted lookup; the fetcher only runs on a miss.
    pub async fn warm_cache(
        &self,
        fetcher: &dyn Fetch<T>,
        requests: Vec<WarmRequest>,
        concurrency: usize,
    ) -> WarmReport {
        let requested = requests.len();

        let outcomes: Vec<WarmOutcome> = stream::iter(requests)
            .map(|request| async move {
                let key = CacheKey::derive(request.identifier.clone(), request.options.params.as_ref());
                let identifier = request.identifier.clone();
                let fetched = AtomicBool::new(false);

                let result = self
                    .cached_fetch(
                        request.identifier,
                        || {
                            fetched.store(true, Ordering::Relaxed);
                            fetcher.fetch(&identifier)
                        },
                        request.options,
                    )
                    .await;

                match result {
                    Ok(_) if fetched.load(Ordering::Relaxed) => WarmOutcome::Loaded,
                    Ok(_) => WarmOutcome::Cached,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Warm-up fetch failed");
                        WarmOutcome::Failed
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = WarmReport {
            requested,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                WarmOutcome::Loaded => report.loaded += 1,
                WarmOutcome::Cached => report.already_cached += 1,
                WarmOutcome::Failed => report.failed += 1,
            }
        }

        info!(
            requested = report.requested,
            loaded = report.loaded,
            already_cached = report.already_cached,
            failed = report.failed,
            "Cache warm-up finished"
        );
        self.emit(CacheEvent::WarmComplete {
            requested: report.requested,
            loaded: report.loaded,
            failed: report.failed,
        });
        report
    }
}

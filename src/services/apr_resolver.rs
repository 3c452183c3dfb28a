use crate::models::{AprOrigin, AprQueryResult, AprStatus, Freshness, TokenRegistry};
use crate::repositories::apr_cache_repository::AprCacheStore;
use crate::services::scrape_coordinator::ScrapeCoordinator;
use crate::utils::clock::Clock;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Answers APR queries from the best data on hand:
/// fresh cache, then stale cache, then configured fallback, then zero.
pub struct AprResolver {
    store: Arc<AprCacheStore>,
    coordinator: ScrapeCoordinator,
    tokens: Arc<TokenRegistry>,
    clock: Arc<dyn Clock>,
    background: Mutex<Option<JoinHandle<()>>>,
}

impl AprResolver {
    pub fn new(
        store: Arc<AprCacheStore>,
        coordinator: ScrapeCoordinator,
        tokens: Arc<TokenRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            coordinator,
            tokens,
            clock,
            background: Mutex::new(None),
        }
    }

    /// Waits for the last background refresh started by `resolve`, if any.
    /// A one-shot run calls this before tearing the browser down.
    pub async fn wait_for_background_refresh(&self) {
        let handle = self.background.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Background APR refresh aborted: {}", e);
            }
        }
    }

    /// Returns one result per requested symbol (keys upper-cased). Waits on a
    /// scrape only for symbols with no usable value at all; stale symbols are
    /// refreshed in the background.
    pub async fn resolve(&self, symbols: &[String]) -> HashMap<String, AprQueryResult> {
        let now = self.clock.now();
        let mut results = HashMap::new();
        let mut stale: Vec<(String, DateTime<Utc>)> = Vec::new();
        let mut missing: Vec<(String, Option<DateTime<Utc>>)> = Vec::new();

        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            if results.contains_key(&symbol) || missing.iter().any(|(s, _)| *s == symbol) {
                continue;
            }
            let record = self.store.get(&symbol);
            let freshness = record
                .as_ref()
                .map(|r| self.store.windows().classify(r.age(now)));
            match (record, freshness) {
                (Some(record), Some(Freshness::Fresh)) => {
                    results.insert(symbol.clone(), cached(&symbol, record.value, AprStatus::Fresh));
                }
                (Some(record), Some(Freshness::Stale)) => {
                    warn!("{}: Using stale cache ({}s old)", symbol, record.age(now).num_seconds());
                    results.insert(symbol.clone(), cached(&symbol, record.value, AprStatus::Stale));
                    stale.push((symbol, record.observed_at));
                }
                (record, _) => {
                    if let Some(result) = self.fallback(&symbol, now) {
                        results.insert(symbol, result);
                    } else {
                        missing.push((symbol, record.map(|r| r.observed_at)));
                    }
                }
            }
        }

        if missing.is_empty() {
            if stale.is_empty() {
                return results;
            }
            if self.coordinator.is_refreshing() {
                debug!("Refresh already running, not starting another for stale tokens");
            } else {
                let coordinator = self.coordinator.clone();
                let stale: Vec<String> = stale.into_iter().map(|(s, _)| s).collect();
                let handle = tokio::spawn(async move { coordinator.refresh(&stale).await });
                *self.background.lock() = Some(handle);
            }
            return results;
        }

        let mut pending: Vec<String> = missing.iter().map(|(s, _)| s.clone()).collect();
        pending.extend(stale.iter().map(|(s, _)| s.clone()));
        self.coordinator.refresh(&pending).await;

        let now = self.clock.now();
        for (symbol, before) in stale {
            if let Some(result) = self.reread(&symbol, Some(before), now) {
                results.insert(symbol, result);
            }
        }
        for (symbol, before) in missing {
            let result = self.reread(&symbol, before, now).unwrap_or_else(|| {
                error!("{}: No cache available, returning 0", symbol);
                AprQueryResult::unavailable(&symbol)
            });
            results.insert(symbol, result);
        }
        results
    }

    /// Seeds the cache from configuration for symbols that never scrape.
    fn fallback(&self, symbol: &str, now: DateTime<Utc>) -> Option<AprQueryResult> {
        let token = self.tokens.token(symbol).filter(|t| t.skip_scraping)?;
        info!("{}: Using config fallback APR: {}%", symbol, token.fallback_apr);
        if let Err(e) = self.store.put(symbol, token.fallback_apr, now) {
            error!("{}: Failed to persist fallback APR: {}", symbol, e);
        }
        Some(AprQueryResult {
            symbol: symbol.to_string(),
            value: token.fallback_apr,
            status: AprStatus::Fallback,
            source: AprOrigin::Config,
        })
    }

    /// Reads a symbol after a refresh; `before` is its pre-refresh observation time.
    fn reread(
        &self,
        symbol: &str,
        before: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<AprQueryResult> {
        let record = self.store.get(symbol)?;
        match self.store.windows().classify(record.age(now)) {
            Freshness::Fresh => {
                let newly_written = before.map_or(true, |t| record.observed_at > t);
                let source = match (newly_written, self.tokens.skips_scraping(symbol)) {
                    (false, _) => AprOrigin::Cache,
                    (true, true) => AprOrigin::Config,
                    (true, false) => AprOrigin::Scrape,
                };
                Some(AprQueryResult {
                    symbol: symbol.to_string(),
                    value: record.value,
                    status: AprStatus::Fresh,
                    source,
                })
            }
            Freshness::Stale => Some(cached(symbol, record.value, AprStatus::Stale)),
            Freshness::Expired => None,
        }
    }
}

fn cached(symbol: &str, value: f64, status: AprStatus) -> AprQueryResult {
    AprQueryResult {
        symbol: symbol.to_string(),
        value,
        status,
        source: AprOrigin::Cache,
    }
}

use crate::errors::ScrapeError;
use crate::models::TokenRegistry;
use crate::repositories::apr_cache_repository::AprCacheStore;
use crate::services::apr_scraper::AprSource;
use crate::utils::clock::Clock;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

type BatchDone = Shared<BoxFuture<'static, ()>>;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Wall-clock budget for one symbol, retries included.
    pub symbol_timeout: Duration,
    pub inter_symbol_delay: Duration,
    pub scraping_enabled: bool,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            symbol_timeout: Duration::from_secs(30),
            inter_symbol_delay: Duration::from_millis(500),
            scraping_enabled: true,
        }
    }
}

#[derive(Default)]
struct BatchSlot {
    started: u64,
    done: Option<BatchDone>,
}

struct Inner {
    store: Arc<AprCacheStore>,
    source: Arc<dyn AprSource>,
    tokens: Arc<TokenRegistry>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
    slot: Mutex<BatchSlot>,
    completed: AtomicU64,
}

/// Runs at most one scrape batch at a time across the process. Callers that
/// arrive while a batch is running wait for it instead of starting another.
#[derive(Clone)]
pub struct ScrapeCoordinator {
    inner: Arc<Inner>,
}

impl ScrapeCoordinator {
    pub fn new(
        store: Arc<AprCacheStore>,
        source: Arc<dyn AprSource>,
        tokens: Arc<TokenRegistry>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                tokens,
                clock,
                settings,
                slot: Mutex::new(BatchSlot::default()),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.running_batch(&self.inner.slot.lock()).is_some()
    }

    /// Brings every non-fresh symbol up to date, or leaves its cache entry
    /// untouched if scraping fails. Never returns an error.
    pub async fn refresh(&self, symbols: &[String]) {
        let now = self.inner.clock.now();
        let mut needs_work: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = symbol.to_uppercase();
            if !needs_work.contains(&symbol) && !self.inner.store.is_fresh(&symbol, now) {
                needs_work.push(symbol);
            }
        }
        if needs_work.is_empty() {
            debug!("All tokens have fresh cache");
            return;
        }

        let done = {
            let mut slot = self.inner.slot.lock();
            match self.inner.running_batch(&slot) {
                Some(done) => {
                    info!("Another scraping operation in progress, waiting for it to finish...");
                    done
                }
                None => {
                    slot.started += 1;
                    let id = slot.started;
                    info!(
                        "Scraping {} tokens sequentially: {}",
                        needs_work.len(),
                        needs_work.join(", ")
                    );
                    let inner = Arc::clone(&self.inner);
                    let handle = tokio::spawn(async move {
                        inner.run_batch(&needs_work).await;
                        inner.completed.fetch_max(id, Ordering::SeqCst);
                    });
                    let done = handle
                        .map(|result| {
                            if let Err(e) = result {
                                error!("Scrape batch aborted: {}", e);
                            }
                        })
                        .boxed()
                        .shared();
                    slot.done = Some(done.clone());
                    done
                }
            }
        };
        done.await;
    }
}

impl Inner {
    fn running_batch(&self, slot: &BatchSlot) -> Option<BatchDone> {
        let done = slot.done.as_ref()?;
        let finished = self.completed.load(Ordering::SeqCst) >= slot.started;
        if finished || done.peek().is_some() {
            None
        } else {
            Some(done.clone())
        }
    }

    async fn run_batch(&self, symbols: &[String]) {
        for (index, symbol) in symbols.iter().enumerate() {
            if index > 0 {
                sleep(self.settings.inter_symbol_delay).await;
            }
            self.refresh_symbol(symbol).await;
        }
        self.source.shutdown().await;
    }

    async fn refresh_symbol(&self, symbol: &str) {
        let now = self.clock.now();
        if self.store.is_fresh(symbol, now) {
            debug!("{}: refreshed by an earlier batch, skipping", symbol);
            return;
        }

        if let Some(token) = self.tokens.token(symbol).filter(|t| t.skip_scraping) {
            info!("{}: Skipping scraping (configured), using {}%", symbol, token.fallback_apr);
            self.write(symbol, token.fallback_apr);
            return;
        }

        if !self.settings.scraping_enabled {
            warn!("{}: {}, keeping previous cache value", symbol, ScrapeError::Disabled);
            return;
        }

        let budget = self.settings.symbol_timeout;
        let outcome = match timeout(budget, self.source.scrape(symbol)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ScrapeError::BatchTimeout {
                symbol: symbol.to_string(),
                budget,
            }),
        };
        match outcome {
            Ok(value) => self.write(symbol, value),
            Err(e) => warn!("{}: Scrape failed, keeping previous cache value: {}", symbol, e),
        }
    }

    fn write(&self, symbol: &str, value: f64) {
        if let Err(e) = self.store.put(symbol, value, self.clock.now()) {
            error!("{}: Failed to persist APR cache: {}", symbol, e);
        }
    }
}

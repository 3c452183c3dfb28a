use crate::errors::ScrapeError;
use crate::models::TokenRegistry;
use crate::services::browser::{BrowserPage, BrowserSession, Selector};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

static PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.?\d*)%").unwrap());

const PRIMARY_APR_XPATH: &str =
    "//*[@id='__next']/div[2]/div[2]/div/div[1]/div/div[2]/div/div/div/div[1]/div[2]/p";

/// Produces one APR reading per call.
#[async_trait]
pub trait AprSource: Send + Sync {
    async fn scrape(&self, symbol: &str) -> Result<f64, ScrapeError>;
    /// Frees whatever the source holds between batches.
    async fn shutdown(&self);
}

/// One way of locating the APR on a page.
#[derive(Debug, Clone)]
pub struct ExtractionStrategy {
    pub selector: Selector,
    /// Only the first match is considered.
    pub first_only: bool,
    /// Exclusive upper bound on accepted values.
    pub max_plausible: Option<f64>,
}

impl ExtractionStrategy {
    pub fn extract(&self, texts: &[String]) -> Option<f64> {
        let candidates = if self.first_only {
            &texts[..texts.len().min(1)]
        } else {
            texts
        };
        candidates.iter().find_map(|text| {
            let value = parse_percentage(text)?;
            match self.max_plausible {
                Some(max) if value >= max => None,
                _ => Some(value),
            }
        })
    }
}

/// First positive `NN.NN%` in `text`.
pub fn parse_percentage(text: &str) -> Option<f64> {
    let captures = PERCENT.captures(text)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;
    (value > 0.0).then_some(value)
}

/// The structural locator first, then text and attribute based fallbacks.
pub fn default_strategies() -> Vec<ExtractionStrategy> {
    let mut strategies = vec![ExtractionStrategy {
        selector: Selector::XPath(PRIMARY_APR_XPATH.to_string()),
        first_only: true,
        max_plausible: None,
    }];
    let fallbacks = [
        Selector::Text("% APR".to_string()),
        Selector::Css("[data-testid*='apr']".to_string()),
        Selector::Css(".apr-value".to_string()),
        Selector::Css(".staking-apr".to_string()),
    ];
    strategies.extend(fallbacks.into_iter().map(|selector| ExtractionStrategy {
        selector,
        first_only: false,
        max_plausible: Some(100.0),
    }));
    strategies
}

#[derive(Debug, Clone)]
pub struct ScraperSettings {
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles each retry.
    pub backoff_base: Duration,
    pub navigation_timeout: Duration,
    /// Wait after navigation for client-side rendering.
    pub settle_delay: Duration,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            navigation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// Scrapes the APR shown on each token's staking page in a headless browser.
pub struct BrowserAprSource {
    session: BrowserSession,
    tokens: Arc<TokenRegistry>,
    strategies: Vec<ExtractionStrategy>,
    settings: ScraperSettings,
}

impl BrowserAprSource {
    pub fn new(
        session: BrowserSession,
        tokens: Arc<TokenRegistry>,
        settings: ScraperSettings,
    ) -> Self {
        Self {
            session,
            tokens,
            strategies: default_strategies(),
            settings,
        }
    }

    async fn attempt(&self, symbol: &str, url: &str) -> Result<f64, ScrapeError> {
        let guard = self.session.open_page().await?;
        let outcome = self.read_page(guard.page(), symbol, url).await;
        guard.release().await;
        outcome
    }

    async fn read_page(
        &self,
        page: &dyn BrowserPage,
        symbol: &str,
        url: &str,
    ) -> Result<f64, ScrapeError> {
        match timeout(self.settings.navigation_timeout, page.goto(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScrapeError::Navigation {
                    url: url.to_string(),
                    reason: format!(
                        "timed out after {}s",
                        self.settings.navigation_timeout.as_secs()
                    ),
                })
            }
        }
        sleep(self.settings.settle_delay).await;

        for (index, strategy) in self.strategies.iter().enumerate() {
            let texts = match page.texts(&strategy.selector).await {
                Ok(texts) => texts,
                Err(e) => {
                    debug!("{}: selector {:?} failed: {}", symbol, strategy.selector, e);
                    continue;
                }
            };
            if let Some(value) = strategy.extract(&texts) {
                if index == 0 {
                    info!("{}: Scraped {}% APR", symbol, value);
                } else {
                    info!(
                        "{}: Scraped {}% APR (alt selector {:?})",
                        symbol, value, strategy.selector
                    );
                }
                return Ok(value);
            }
        }
        Err(ScrapeError::Extraction {
            symbol: symbol.to_string(),
        })
    }
}

#[async_trait]
impl AprSource for BrowserAprSource {
    async fn scrape(&self, symbol: &str) -> Result<f64, ScrapeError> {
        let url = self
            .tokens
            .token(symbol)
            .and_then(|t| t.scrape_target_url.clone())
            .ok_or_else(|| ScrapeError::MissingTarget {
                symbol: symbol.to_string(),
            })?;

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.attempt(symbol, &url).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        error!(
                            "{}: Failed to scrape after {} attempts: {}",
                            symbol, max_attempts, e
                        );
                        return Err(e);
                    }
                    let delay = self.settings.backoff_base * 2u32.pow(attempt - 1);
                    warn!(
                        "{}: Attempt {} failed ({}), retrying in {:?}",
                        symbol, attempt, e, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn shutdown(&self) {
        self.session.teardown().await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenConfig;
    use crate::services::browser::fake::{FakeLauncher, FakeWeb};
    use std::sync::atomic::Ordering;
    use tokio::time::Instant;

    const ATOM_URL: &str = "https://wallet.keplr.app/chains/cosmos-hub";

    fn token(symbol: &str, url: Option<&str>) -> TokenConfig {
        TokenConfig {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            chain_name: symbol.to_lowercase(),
            enabled: true,
            bech32_prefix: symbol.to_lowercase(),
            decimals: 6,
            rest_endpoints: vec![],
            skip_scraping: false,
            fallback_apr: 10.0,
            scrape_target_url: url.map(str::to_string),
        }
    }

    fn source(web: &Arc<FakeWeb>) -> BrowserAprSource {
        let tokens =
            TokenRegistry::from_tokens(vec![token("ATOM", Some(ATOM_URL)), token("OSMO", None)]);
        BrowserAprSource::new(
            BrowserSession::new(Arc::new(FakeLauncher(Arc::clone(web)))),
            Arc::new(tokens),
            ScraperSettings::default(),
        )
    }

    fn primary() -> Selector {
        Selector::XPath(PRIMARY_APR_XPATH.to_string())
    }

    #[test]
    fn percentage_parsing() {
        assert_eq!(parse_percentage("16.8%"), Some(16.8));
        assert_eq!(parse_percentage("Staking APR 7% / year"), Some(7.0));
        assert_eq!(parse_percentage("0%"), None);
        assert_eq!(parse_percentage("APR unavailable"), None);
    }

    #[test]
    fn only_fallbacks_reject_implausible_values() {
        let strategies = default_strategies();
        let texts = vec!["150.2%".to_string()];
        assert_eq!(strategies[0].extract(&texts), Some(150.2));
        assert_eq!(strategies[1].extract(&texts), None);
    }

    #[test]
    fn fallbacks_scan_every_candidate_but_primary_reads_first() {
        let strategies = default_strategies();
        let texts = vec!["Total staked".to_string(), "18.25% APR".to_string()];
        assert_eq!(strategies[0].extract(&texts), None);
        assert_eq!(strategies[1].extract(&texts), Some(18.25));
    }

    #[tokio::test(start_paused = true)]
    async fn primary_selector_wins() {
        let web = Arc::new(FakeWeb::default());
        web.set_page(
            ATOM_URL,
            vec![
                (primary(), "16.8%"),
                (Selector::Text("% APR".to_string()), "99% APR"),
            ],
        );
        assert_eq!(source(&web).scrape("ATOM").await, Ok(16.8));
        assert_eq!(web.open_pages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_semantic_selectors() {
        let web = Arc::new(FakeWeb::default());
        web.set_page(
            ATOM_URL,
            vec![(Selector::Css(".staking-apr".to_string()), "Earn 14.2%")],
        );
        assert_eq!(source(&web).scrape("ATOM").await, Ok(14.2));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_navigation_failures_with_backoff() {
        let web = Arc::new(FakeWeb::default());
        web.set_page(ATOM_URL, vec![(primary(), "16.8%")]);
        web.fail_navigation(ATOM_URL, 2);

        let started = Instant::now();
        assert_eq!(source(&web).scrape("ATOM").await, Ok(16.8));

        // 1s + 2s of backoff, then one settle delay on the good attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_secs(7));
        assert_eq!(web.navigations.load(Ordering::SeqCst), 3);
        assert_eq!(web.opened.load(Ordering::SeqCst), 3);
        assert_eq!(web.open_pages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_attempts() {
        let web = Arc::new(FakeWeb::default());
        web.set_page(ATOM_URL, vec![(primary(), "n/a")]);

        let result = source(&web).scrape("ATOM").await;
        assert_eq!(
            result,
            Err(ScrapeError::Extraction {
                symbol: "ATOM".to_string()
            })
        );
        assert_eq!(web.navigations.load(Ordering::SeqCst), 3);
        assert_eq!(web.open_pages(), 0);
        assert_eq!(web.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_target_is_not_retried() {
        let web = Arc::new(FakeWeb::default());
        let result = source(&web).scrape("OSMO").await;
        assert!(matches!(result, Err(ScrapeError::MissingTarget { .. })));
        assert_eq!(web.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_tears_down_the_browser() {
        let web = Arc::new(FakeWeb::default());
        web.set_page(ATOM_URL, vec![(primary(), "16.8%")]);
        let source = source(&web);
        source.scrape("ATOM").await.unwrap();
        source.shutdown().await;
        assert_eq!(web.shutdowns.load(Ordering::SeqCst), 1);
    }
}

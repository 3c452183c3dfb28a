use dotenv::dotenv;
use futures::stream::{self, StreamExt};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::sleep;

mod config;
mod errors;
mod models;
mod repositories;
mod services;
mod utils;

use crate::config::Config;
use crate::models::{AprQueryResult, IncomeProjection, WalletBalance};
use crate::repositories::apr_cache_repository::AprCacheStore;
use crate::services::apr_resolver::AprResolver;
use crate::services::apr_scraper::{AprSource, BrowserAprSource};
use crate::services::browser::{BrowserSession, WebDriverLauncher};
use crate::services::cosmos_rest::{BalanceFetcher, HttpRestClient};
use crate::services::scrape_coordinator::ScrapeCoordinator;
use crate::utils::clock::{Clock, SystemClock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    info!("Starting Cosmos APR tracker");
    let config = Arc::new(Config::from_env()?);
    let symbols = config.tokens.enabled_symbols();
    info!(
        "Loaded {} enabled tokens from {}",
        symbols.len(),
        config.token_config_path
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(AprCacheStore::open(config.cache_path.clone(), config.windows));

    info!("Using WebDriver at {}", config.webdriver_url);
    let session = BrowserSession::new(Arc::new(WebDriverLauncher::new(&config.webdriver_url)));
    let source: Arc<dyn AprSource> = Arc::new(BrowserAprSource::new(
        session,
        Arc::clone(&config.tokens),
        config.scraper_settings(),
    ));
    let coordinator = ScrapeCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&source),
        Arc::clone(&config.tokens),
        Arc::clone(&clock),
        config.coordinator_settings(),
    );
    let resolver = AprResolver::new(
        Arc::clone(&store),
        coordinator,
        Arc::clone(&config.tokens),
        Arc::clone(&clock),
    );

    info!("Resolving APRs...");
    let aprs = resolver.resolve(&symbols).await;
    log_aprs(&symbols, &aprs);

    if !config.wallet_addresses.is_empty() {
        let fetcher = BalanceFetcher::new(
            Arc::new(HttpRestClient::new(config.balance_timeout)?),
            Arc::clone(&config.tokens),
            config.balance_timeout,
        );
        info!("Fetching balances for {} addresses...", config.wallet_addresses.len());
        let balances = fetch_balances(&config, &fetcher).await;
        report_income(&balances, &aprs);
    }

    if config.watch {
        watch(&config, &resolver, &symbols).await;
    } else {
        resolver.wait_for_background_refresh().await;
    }

    source.shutdown().await;
    info!("Done.");
    Ok(())
}

async fn fetch_balances(config: &Config, fetcher: &BalanceFetcher) -> Vec<WalletBalance> {
    let targets: Vec<(String, String)> = config
        .wallet_addresses
        .iter()
        .filter_map(|address| match config.tokens.chain_for_address(address) {
            Some(token) => Some((address.clone(), token.chain_name.clone())),
            None => {
                warn!("No enabled chain matches address {}", address);
                None
            }
        })
        .collect();

    stream::iter(targets)
        .map(|(address, chain)| async move { fetcher.fetch_balance(&address, &chain).await })
        .buffer_unordered(config.parallel_limit)
        .filter_map(|balance| async move { balance })
        .collect()
        .await
}

fn log_aprs(symbols: &[String], aprs: &HashMap<String, AprQueryResult>) {
    for symbol in symbols {
        match aprs.get(symbol) {
            Some(apr) if apr.is_usable() => info!(
                "{}: {:.2}% ({:?}, from {:?})",
                symbol, apr.value, apr.status, apr.source
            ),
            _ => warn!("{}: APR unavailable", symbol),
        }
    }
}

fn report_income(balances: &[WalletBalance], aprs: &HashMap<String, AprQueryResult>) {
    for balance in balances {
        let projection = aprs
            .get(&balance.token_symbol.to_uppercase())
            .and_then(|apr| IncomeProjection::project(balance, apr));
        match projection {
            Some(p) => info!(
                "{} {}: {:.6} staked at {:.2}% -> {:.6}/year, {:.6}/month, {:.6}/day",
                balance.address,
                p.token_symbol,
                balance.delegated_balance,
                p.apr,
                p.yearly,
                p.monthly,
                p.daily
            ),
            None => warn!(
                "{} {}: no usable APR, excluded from income projection",
                balance.address, balance.token_symbol
            ),
        }
    }
}

async fn watch(config: &Config, resolver: &AprResolver, symbols: &[String]) {
    info!(
        "Watching APRs every {}s, press Ctrl-C to stop",
        config.refresh_interval.as_secs()
    );
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, stopping");
                break;
            }
            _ = sleep(config.refresh_interval) => {
                let aprs = resolver.resolve(symbols).await;
                log_aprs(symbols, &aprs);
            }
        }
    }
}

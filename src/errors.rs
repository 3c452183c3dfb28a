use std::time::Duration;
use thiserror::Error;

/// Why a single scrape of one token did not produce an APR.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("no APR found on page for {symbol}")]
    Extraction { symbol: String },

    #[error("scrape of {symbol} exceeded {}s wall-clock budget", .budget.as_secs())]
    BatchTimeout { symbol: String, budget: Duration },

    #[error("no scrape target configured for {symbol}")]
    MissingTarget { symbol: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("scraping is disabled")]
    Disabled,
}

impl ScrapeError {
    /// Failures that another attempt may fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ScrapeError::MissingTarget { .. } | ScrapeError::Disabled)
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("endpoint {endpoint} failed: {reason}")]
    Endpoint { endpoint: String, reason: String },

    #[error("all endpoints exhausted for chain {chain}")]
    AllEndpointsExhausted { chain: String },

    #[error("unsupported chain: {0}")]
    UnknownChain(String),

    #[error("balance lookup for {chain} timed out after {}s", .after.as_secs())]
    Timeout { chain: String, after: Duration },
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to replace cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },

    #[error("failed to read token config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid token config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

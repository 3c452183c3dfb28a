use crate::errors::ConfigError;
use crate::models::{FreshnessWindows, TokenRegistry};
use crate::services::apr_scraper::ScraperSettings;
use crate::services::scrape_coordinator::CoordinatorSettings;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub struct Config {
    pub token_config_path: String,
    pub tokens: Arc<TokenRegistry>,
    pub cache_path: PathBuf,
    pub webdriver_url: String,
    pub windows: FreshnessWindows,
    pub scrape_timeout: Duration,
    pub navigation_timeout: Duration,
    pub balance_timeout: Duration,
    pub refresh_interval: Duration,
    pub parallel_limit: usize,
    pub wallet_addresses: Vec<String>,
    pub watch: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token_config_path =
            lookup("TOKEN_CONFIG_PATH").unwrap_or_else(|| "config.json".to_string());
        let tokens = load_tokens(&token_config_path)?;

        let cache_settings = &tokens.settings.apr_cache;
        let fresh_secs = match parse_var::<i64, _>(&lookup, "APR_FRESH_SECS")? {
            Some(secs) => Some(secs),
            None => cache_settings.fresh_seconds,
        };
        let stale_secs = match parse_var::<i64, _>(&lookup, "APR_STALE_SECS")? {
            Some(secs) => Some(secs),
            None => cache_settings.stale_seconds,
        };
        let windows = freshness_windows(fresh_secs, stale_secs)?;

        let parallel_limit: usize = parse_var(&lookup, "PARALLEL_LIMIT")?.unwrap_or(5);
        if parallel_limit == 0 {
            return Err(ConfigError::InvalidVar {
                name: "PARALLEL_LIMIT",
                value: "0".to_string(),
            });
        }

        let wallet_addresses = lookup("WALLET_ADDRESSES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            token_config_path,
            tokens: Arc::new(tokens),
            cache_path: lookup("APR_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/cache/apr_cache.json")),
            webdriver_url: lookup("WEBDRIVER_URL")
                .unwrap_or_else(|| "http://localhost:4444".to_string()),
            windows,
            scrape_timeout: secs_var(&lookup, "SCRAPE_TIMEOUT_SECS", 30)?,
            navigation_timeout: secs_var(&lookup, "NAVIGATION_TIMEOUT_SECS", 30)?,
            balance_timeout: secs_var(&lookup, "BALANCE_TIMEOUT_SECS", 15)?,
            refresh_interval: secs_var(&lookup, "REFRESH_INTERVAL_SECS", 300)?,
            parallel_limit,
            wallet_addresses,
            watch: parse_bool(&lookup, "WATCH")?.unwrap_or(false),
        })
    }

    pub fn scraper_settings(&self) -> ScraperSettings {
        ScraperSettings {
            navigation_timeout: self.navigation_timeout,
            ..ScraperSettings::default()
        }
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            symbol_timeout: self.scrape_timeout,
            scraping_enabled: self.tokens.settings.scraping.enabled,
            ..CoordinatorSettings::default()
        }
    }
}

fn load_tokens(path: &str) -> Result<TokenRegistry, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    TokenRegistry::from_json(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

fn freshness_windows(
    fresh_secs: Option<i64>,
    stale_secs: Option<i64>,
) -> Result<FreshnessWindows, ConfigError> {
    let defaults = FreshnessWindows::default();
    let fresh = fresh_secs.map(chrono::Duration::seconds).unwrap_or(defaults.fresh);
    let stale = stale_secs.map(chrono::Duration::seconds).unwrap_or(defaults.stale);
    if fresh <= chrono::Duration::zero() || stale < fresh {
        return Err(ConfigError::InvalidVar {
            name: "APR_STALE_SECS",
            value: format!("fresh={}s stale={}s", fresh.num_seconds(), stale.num_seconds()),
        });
    }
    Ok(FreshnessWindows { fresh, stale })
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidVar { name, value: raw }),
    }
}

fn secs_var<F>(lookup: &F, name: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(Duration::from_secs(parse_var(lookup, name)?.unwrap_or(default)))
}

fn parse_bool<F>(lookup: &F, name: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidVar { name, value: raw }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TOKENS: &str = r#"{
        "tokens": {
            "atom": {
                "name": "Cosmos Hub",
                "chain_name": "cosmoshub",
                "enabled": true,
                "bech32_prefix": "cosmos",
                "rest_endpoints": ["https://lcd.example"],
                "keplr_url": "https://wallet.keplr.app/chains/cosmos-hub"
            }
        },
        "settings": {
            "apr_cache": {"fresh_seconds": 120, "stale_seconds": 900},
            "scraping": {"enabled": false}
        }
    }"#;

    fn config_with(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, TOKENS).unwrap();

        let mut env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.insert("TOKEN_CONFIG_PATH".to_string(), path.display().to_string());
        Config::from_lookup(|name| env.get(name).cloned())
    }

    #[test]
    fn defaults_and_json_settings() {
        let config = config_with(&[]).unwrap();

        assert_eq!(config.cache_path, PathBuf::from("data/cache/apr_cache.json"));
        assert_eq!(config.webdriver_url, "http://localhost:4444");
        assert_eq!(config.windows.fresh, chrono::Duration::seconds(120));
        assert_eq!(config.windows.stale, chrono::Duration::seconds(900));
        assert_eq!(config.balance_timeout, Duration::from_secs(15));
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert_eq!(config.parallel_limit, 5);
        assert!(config.wallet_addresses.is_empty());
        assert!(!config.watch);
        assert!(!config.coordinator_settings().scraping_enabled);
        assert_eq!(config.tokens.enabled_symbols(), vec!["ATOM".to_string()]);
    }

    #[test]
    fn environment_overrides() {
        let config = config_with(&[
            ("APR_FRESH_SECS", "60"),
            ("SCRAPE_TIMEOUT_SECS", "45"),
            ("NAVIGATION_TIMEOUT_SECS", "20"),
            ("WALLET_ADDRESSES", "cosmos1abc, ,osmo1def"),
            ("WATCH", "true"),
        ])
        .unwrap();

        assert_eq!(config.windows.fresh, chrono::Duration::seconds(60));
        assert_eq!(config.windows.stale, chrono::Duration::seconds(900));
        assert_eq!(config.coordinator_settings().symbol_timeout, Duration::from_secs(45));
        assert_eq!(config.scraper_settings().navigation_timeout, Duration::from_secs(20));
        assert_eq!(config.scraper_settings().max_attempts, 3);
        assert_eq!(config.wallet_addresses, vec!["cosmos1abc", "osmo1def"]);
        assert!(config.watch);
    }

    #[test]
    fn invalid_values_are_errors() {
        assert!(matches!(
            config_with(&[("PARALLEL_LIMIT", "many")]),
            Err(ConfigError::InvalidVar { name: "PARALLEL_LIMIT", .. })
        ));
        assert!(matches!(
            config_with(&[("PARALLEL_LIMIT", "0")]),
            Err(ConfigError::InvalidVar { .. })
        ));
        assert!(matches!(
            config_with(&[("WATCH", "sometimes")]),
            Err(ConfigError::InvalidVar { name: "WATCH", .. })
        ));
        assert!(matches!(
            config_with(&[("APR_FRESH_SECS", "1000")]),
            Err(ConfigError::InvalidVar { .. })
        ));
    }

    #[test]
    fn missing_token_file_is_a_read_error() {
        let result = Config::from_lookup(|name| match name {
            "TOKEN_CONFIG_PATH" => Some("/nonexistent/tokens.json".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}

use serde::Deserialize;
use std::collections::HashMap;

fn default_decimals() -> u32 {
    6
}

fn default_fallback_apr() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}

/// Static per-token settings loaded from the token config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenConfig {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub chain_name: String,
    #[serde(default)]
    pub enabled: bool,
    pub bech32_prefix: String,
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    #[serde(default)]
    pub rest_endpoints: Vec<String>,
    #[serde(default, rename = "skip_apr_scraping")]
    pub skip_scraping: bool,
    #[serde(default = "default_fallback_apr")]
    pub fallback_apr: f64,
    #[serde(default, rename = "keplr_url")]
    pub scrape_target_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CacheSettings {
    pub fresh_seconds: Option<i64>,
    pub stale_seconds: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScrapingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ScrapingSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub apr_cache: CacheSettings,
    #[serde(default)]
    pub scraping: ScrapingSettings,
}

/// All configured tokens, keyed by upper-case symbol.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenRegistry {
    #[serde(default)]
    tokens: HashMap<String, TokenConfig>,
    #[serde(default)]
    pub settings: Settings,
}

impl TokenRegistry {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut registry: TokenRegistry = serde_json::from_str(raw)?;
        registry.tokens = registry
            .tokens
            .into_iter()
            .map(|(key, mut token)| {
                let key = key.to_uppercase();
                if token.symbol.is_empty() {
                    token.symbol = key.clone();
                }
                (key, token)
            })
            .collect();
        Ok(registry)
    }

    #[cfg(test)]
    pub fn from_tokens(tokens: Vec<TokenConfig>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| (t.symbol.to_uppercase(), t))
                .collect(),
            settings: Settings::default(),
        }
    }

    pub fn token(&self, symbol: &str) -> Option<&TokenConfig> {
        self.tokens.get(&symbol.to_uppercase())
    }

    pub fn skips_scraping(&self, symbol: &str) -> bool {
        self.token(symbol).map(|t| t.skip_scraping).unwrap_or(false)
    }

    pub fn enabled_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .tokens
            .iter()
            .filter(|(_, t)| t.enabled)
            .map(|(s, _)| s.clone())
            .collect();
        symbols.sort();
        symbols
    }

    pub fn chain(&self, chain_name: &str) -> Option<&TokenConfig> {
        self.tokens
            .values()
            .find(|t| t.enabled && t.chain_name == chain_name)
    }

    /// Picks the enabled chain whose bech32 prefix the address carries.
    pub fn chain_for_address(&self, address: &str) -> Option<&TokenConfig> {
        let (hrp, _) = address.rsplit_once('1')?;
        self.tokens
            .values()
            .find(|t| t.enabled && t.bech32_prefix == hrp)
    }
}

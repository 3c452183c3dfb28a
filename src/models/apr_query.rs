use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AprStatus {
    Fresh,
    Stale,
    Fallback,
    Unavailable,
}

/// Where the value in an [`AprQueryResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AprOrigin {
    Scrape,
    Cache,
    Config,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AprQueryResult {
    pub symbol: String,
    pub value: f64,
    pub status: AprStatus,
    pub source: AprOrigin,
}

impl AprQueryResult {
    pub fn unavailable(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            value: 0.0,
            status: AprStatus::Unavailable,
            source: AprOrigin::None,
        }
    }

    /// Whether the value may be used for income projection.
    pub fn is_usable(&self) -> bool {
        self.status != AprStatus::Unavailable
    }
}

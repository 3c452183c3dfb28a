use crate::models::datetime_utils::{deserialize_datetime, serialize_datetime};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Last known APR for one token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AprRecord {
    #[serde(skip)]
    pub symbol: String,
    pub value: f64,
    #[serde(
        rename = "observedAt",
        serialize_with = "serialize_datetime",
        deserialize_with = "deserialize_datetime"
    )]
    pub observed_at: DateTime<Utc>,
}

impl AprRecord {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.observed_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Expired,
}

/// Fresh and stale windows used to classify cached APRs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindows {
    pub fresh: Duration,
    pub stale: Duration,
}

impl Default for FreshnessWindows {
    fn default() -> Self {
        Self {
            fresh: Duration::seconds(600),
            stale: Duration::seconds(3600),
        }
    }
}

impl FreshnessWindows {
    pub fn classify(&self, age: Duration) -> Freshness {
        if age < self.fresh {
            Freshness::Fresh
        } else if age < self.stale {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

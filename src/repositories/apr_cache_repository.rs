use crate::errors::CacheError;
use crate::models::datetime_utils::{from_epoch_seconds, serialize_datetime};
use crate::models::{AprRecord, Freshness, FreshnessWindows};
use chrono::{DateTime, Duration, Utc};
use log::{error, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct CacheFile<'a> {
    #[serde(rename = "lastUpdated", serialize_with = "serialize_datetime")]
    last_updated: DateTime<Utc>,
    #[serde(flatten)]
    records: BTreeMap<&'a str, &'a AprRecord>,
}

/// Durable symbol -> APR map. Every `put` rewrites the whole file through an
/// atomic rename before returning.
pub struct AprCacheStore {
    path: PathBuf,
    windows: FreshnessWindows,
    records: RwLock<HashMap<String, AprRecord>>,
}

impl AprCacheStore {
    /// Loads the cache file once. A missing or unreadable file yields an empty store.
    pub fn open(path: impl Into<PathBuf>, windows: FreshnessWindows) -> Self {
        let path = path.into();
        let records = match load_records(&path) {
            Ok(records) => {
                info!("Loaded {} cached APRs from {}", records.len(), path.display());
                records
            }
            Err(e) => {
                error!(
                    "Ignoring unreadable APR cache {}: {}",
                    path.display(),
                    e
                );
                HashMap::new()
            }
        };
        Self {
            path,
            windows,
            records: RwLock::new(records),
        }
    }

    pub fn windows(&self) -> FreshnessWindows {
        self.windows
    }

    pub fn get(&self, symbol: &str) -> Option<AprRecord> {
        self.records.read().get(&symbol.to_uppercase()).cloned()
    }

    pub fn age_of(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.get(symbol).map(|r| r.age(now))
    }

    pub fn freshness(&self, symbol: &str, now: DateTime<Utc>) -> Option<Freshness> {
        self.age_of(symbol, now).map(|age| self.windows.classify(age))
    }

    pub fn is_fresh(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.freshness(symbol, now) == Some(Freshness::Fresh)
    }

    /// Records `value` as observed at `now` and persists the whole cache.
    /// `observed_at` never moves backwards for a symbol.
    pub fn put(
        &self,
        symbol: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Result<AprRecord, CacheError> {
        let symbol = symbol.to_uppercase();
        let mut records = self.records.write();
        let observed_at = match records.get(&symbol) {
            Some(existing) if existing.observed_at > now => existing.observed_at,
            _ => now,
        };
        let record = AprRecord {
            symbol: symbol.clone(),
            value,
            observed_at,
        };
        records.insert(symbol.clone(), record.clone());
        self.persist(&records, now)?;
        info!("{}: Cached {}% APR", symbol, value);
        Ok(record)
    }

    fn persist(
        &self,
        records: &HashMap<String, AprRecord>,
        now: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let file = CacheFile {
            last_updated: now,
            records: records.iter().map(|(k, v)| (k.as_str(), v)).collect(),
        };
        let body = serde_json::to_vec_pretty(&file)?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;
        Ok(())
    }
}

fn load_records(path: &Path) -> Result<HashMap<String, AprRecord>, CacheError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let root: Value = serde_json::from_str(&raw)?;
    let Value::Object(entries) = root else {
        return Err(CacheError::Serialization(serde::de::Error::custom(
            "cache root is not an object",
        )));
    };

    if let (Some(Value::Object(values)), Some(Value::Object(stamps))) =
        (entries.get("cache"), entries.get("timestamps"))
    {
        return Ok(load_legacy(values, stamps));
    }

    let mut records = HashMap::new();
    for (symbol, entry) in entries {
        if symbol == "lastUpdated" {
            continue;
        }
        match serde_json::from_value::<AprRecord>(entry) {
            Ok(mut record) => {
                record.symbol = symbol.to_uppercase();
                records.insert(record.symbol.clone(), record);
            }
            Err(e) => warn!("Skipping malformed cache entry {}: {}", symbol, e),
        }
    }
    Ok(records)
}

/// Older layout: `{"cache": {sym: apr}, "timestamps": {sym: epoch}, "last_updated": epoch}`.
fn load_legacy(
    values: &serde_json::Map<String, Value>,
    stamps: &serde_json::Map<String, Value>,
) -> HashMap<String, AprRecord> {
    let mut records = HashMap::new();
    for (symbol, value) in values {
        let observed_at = stamps
            .get(symbol)
            .and_then(Value::as_f64)
            .and_then(from_epoch_seconds);
        match (value.as_f64(), observed_at) {
            (Some(value), Some(observed_at)) => {
                let symbol = symbol.to_uppercase();
                records.insert(
                    symbol.clone(),
                    AprRecord {
                        symbol,
                        value,
                        observed_at,
                    },
                );
            }
            _ => warn!("Skipping incomplete legacy cache entry {}", symbol),
        }
    }
    records
}

use chrono::{DateTime, TimeZone, Utc};
use serde::{self, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Seconds(f64),
    Text(String),
}

pub fn serialize_datetime<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&dt.to_rfc3339())
}

/// Accepts either an RFC 3339 string or epoch seconds (integer or fractional).
pub fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Seconds(secs) => from_epoch_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", secs))),
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom),
    }
}

pub fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize, Deserialize)]
    struct Stamped {
        #[serde(
            serialize_with = "serialize_datetime",
            deserialize_with = "deserialize_datetime"
        )]
        at: DateTime<Utc>,
    }

    #[test]
    fn reads_epoch_seconds_and_iso_strings() {
        let from_int: Stamped = serde_json::from_str(r#"{"at": 1700000000}"#).unwrap();
        let from_float: Stamped = serde_json::from_str(r#"{"at": 1700000000.5}"#).unwrap();
        let from_iso: Stamped =
            serde_json::from_str(r#"{"at": "2023-11-14T22:13:20+00:00"}"#).unwrap();

        assert_eq!(from_int.at.timestamp(), 1_700_000_000);
        assert_eq!(from_float.at.timestamp_millis(), 1_700_000_000_500);
        assert_eq!(from_iso.at, from_int.at);
    }

    #[test]
    fn rejects_garbage() {
        assert!(serde_json::from_str::<Stamped>(r#"{"at": "yesterday"}"#).is_err());
        assert!(serde_json::from_str::<Stamped>(r#"{"at": true}"#).is_err());
    }

    #[test]
    fn writes_rfc3339() {
        let stamped = Stamped {
            at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        let json = serde_json::to_string(&stamped).unwrap();
        assert_eq!(json, r#"{"at":"2023-11-14T22:13:20+00:00"}"#);
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;

/// One upstream observation of cumulative fence events for an (account, zone) pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Snapshot {
    #[serde(alias = "account_code", deserialize_with = "text_or_number")]
    pub account: String,
    #[serde(alias = "zone_name")]
    pub zone: String,
    #[serde(default)]
    pub cabinet: Option<String>,
    #[serde(default)]
    pub condominium: Option<String>,
    #[serde(deserialize_with = "count_or_numeric_text")]
    pub quantity: u64,
}

/// The gateway sends some scalar columns either as JSON strings or numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Text(text) => text,
        Scalar::Number(number) => number.to_string(),
    })
}

fn count_or_numeric_text<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Scalar::deserialize(deserializer)? {
        Scalar::Number(number) => number
            .as_u64()
            .ok_or_else(|| de::Error::custom(format!("quantity must be a non-negative integer, got {number}"))),
        Scalar::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("quantity must be a non-negative integer, got {text:?}"))),
    }
}

impl Snapshot {
    pub fn key(&self) -> TrackingKey {
        TrackingKey::new(&self.account, &self.zone)
    }
}

/// Identifies one independently tracked counter, stored as `"{account}-{zone}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackingKey(String);

impl TrackingKey {
    pub fn new(account: &str, zone: &str) -> Self {
        Self(format!("{account}-{zone}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TrackingKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdRecord {
    pub key: TrackingKey,
    pub quantity: u64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crossing {
    pub snapshot: Snapshot,
    pub multiple: u64,
    pub previous: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::{Snapshot, TrackingKey};

    #[test]
    fn key_joins_account_and_zone() {
        assert_eq!(TrackingKey::new("A1", "Z1").as_str(), "A1-Z1");
    }

    #[test]
    fn deserializes_current_field_names() {
        let raw = r#"{"account":"A1","zone":"Z1","cabinet":"C-3","condominium":"Solar","quantity":57}"#;
        let snapshot: Snapshot = serde_json::from_str(raw).expect("valid snapshot");
        assert_eq!(snapshot.key().as_str(), "A1-Z1");
        assert_eq!(snapshot.cabinet.as_deref(), Some("C-3"));
        assert_eq!(snapshot.quantity, 57);
    }

    #[test]
    fn deserializes_legacy_field_names_with_nulls() {
        let raw = r#"{"account_code":"0042","zone_name":"Perimeter","cabinet":null,"quantity":3}"#;
        let snapshot: Snapshot = serde_json::from_str(raw).expect("valid snapshot");
        assert_eq!(snapshot.account, "0042");
        assert_eq!(snapshot.zone, "Perimeter");
        assert!(snapshot.cabinet.is_none());
        assert!(snapshot.condominium.is_none());
    }

    #[test]
    fn rejects_negative_quantity() {
        let raw = r#"{"account":"A1","zone":"Z1","quantity":-1}"#;
        assert!(serde_json::from_str::<Snapshot>(raw).is_err());
    }

    #[test]
    fn accepts_quantity_sent_as_text() {
        let raw = r#"{"account_code":"A1","zone_name":"Z1","quantity":" 57 "}"#;
        let snapshot: Snapshot = serde_json::from_str(raw).expect("valid snapshot");
        assert_eq!(snapshot.quantity, 57);

        let raw = r#"{"account_code":"A1","zone_name":"Z1","quantity":"many"}"#;
        assert!(serde_json::from_str::<Snapshot>(raw).is_err());
    }

    #[test]
    fn accepts_numeric_account_code() {
        let raw = r#"{"account_code":42,"zone_name":"Z1","quantity":60}"#;
        let snapshot: Snapshot = serde_json::from_str(raw).expect("valid snapshot");
        assert_eq!(snapshot.account, "42");
        assert_eq!(snapshot.key().as_str(), "42-Z1");
    }
}

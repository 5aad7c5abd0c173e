//! Custom serde helpers for exchange wire formats.

/// Deserializes a `Decimal` from either a JSON number or a JSON string.
///
/// The streaming API sends prices as numbers while REST sends them as
/// strings. Numbers are parsed from their literal text so no float rounding
/// is introduced.
pub mod flexible_decimal {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        from_value(&value).map_err(serde::de::Error::custom)
    }

    pub(crate) fn from_value(value: &serde_json::Value) -> Result<Decimal, String> {
        match value {
            serde_json::Value::Number(n) => {
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .map_err(|e| format!("Invalid decimal {}: {}", text, e))
            }
            serde_json::Value::String(s) => {
                Decimal::from_str(s.trim()).map_err(|e| format!("Invalid decimal {}: {}", s, e))
            }
            other => Err(format!("Expected number or string, got {}", other)),
        }
    }
}

/// Optional variant of [`flexible_decimal`]; `null` and missing become `None`.
pub mod flexible_decimal_opt {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<serde_json::Value>::deserialize(deserializer)?;
        match value {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => super::flexible_decimal::from_value(&v)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Deserializes `[[price, quantity], ...]` level arrays.
///
/// Entries that are not two-element arrays of decimals are skipped; the book
/// engine treats malformed levels as absent rather than failing the frame.
pub mod level_pairs {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(Decimal, Decimal)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
        let mut levels = Vec::with_capacity(raw.len());
        for entry in raw {
            let parsed = match &entry {
                serde_json::Value::Array(pair) if pair.len() >= 2 => {
                    let price = super::flexible_decimal::from_value(&pair[0]);
                    let quantity = super::flexible_decimal::from_value(&pair[1]);
                    price.ok().zip(quantity.ok())
                }
                serde_json::Value::Object(map) => {
                    let price = map.get("price").map(super::flexible_decimal::from_value);
                    let quantity = map
                        .get("quantity")
                        .or_else(|| map.get("size"))
                        .map(super::flexible_decimal::from_value);
                    match (price, quantity) {
                        (Some(Ok(p)), Some(Ok(q))) => Some((p, q)),
                        _ => None,
                    }
                }
                _ => None,
            };
            match parsed {
                Some(level) => levels.push(level),
                None => tracing::debug!("Skipping malformed price level: {}", entry),
            }
        }
        Ok(levels)
    }
}

/// Deserializes a Unix-millis integer into `DateTime<Utc>`.
pub mod timestamp_ms_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<i64>::deserialize(deserializer)?;
        Ok(millis.and_then(DateTime::<Utc>::from_timestamp_millis))
    }
}

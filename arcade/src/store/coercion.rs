//! Lenient field readers for stored documents.
//!
//! Older writers stored counts as strings, left fields out or wrote `null`.
//! Each reader maps whatever it finds onto the typed value and never fails.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Deserializer;
use serde_json::Value;

use crate::common::League;
use crate::common::ProgressEntry;
use crate::common::Tier;

/// Non-negative integer. Fractions are truncated, anything else is zero.
#[must_use]
#[allow(
  clippy::cast_possible_truncation,
  clippy::cast_sign_loss,
  clippy::cast_precision_loss
)]
pub(super) fn coerce_count(value: &Value) -> u64 {
  match value {
    Value::Number(number) => number.as_u64().unwrap_or_else(|| {
      number
        .as_f64()
        .filter(|f| f.is_finite() && *f > 0.0)
        .map_or(0, |f| f.min(u64::MAX as f64) as u64)
    }),
    Value::String(text) => {
      let text = text.trim().replace(',', "");
      match text.parse::<u64>() {
        Ok(count) => count,
        Err(_) => {
          coerce_count(&text.parse::<f64>().map_or(Value::Null, Value::from))
        }
      }
    }
    _ => 0,
  }
}

pub(super) fn count<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<u64, D::Error> {
  Ok(coerce_count(&Value::deserialize(deserializer)?))
}

pub(super) fn text<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<Option<String>, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::String(text) if !text.trim().is_empty() => {
      Some(String::from(text.trim()))
    }
    Value::Number(number) => Some(number.to_string()),
    _ => None,
  })
}

pub(super) fn league<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<League, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::String(text) => text.parse().unwrap_or_default(),
    _ => League::default(),
  })
}

pub(super) fn tier<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<Option<Tier>, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::String(text) => text.parse().ok(),
    _ => None,
  })
}

pub(super) fn timestamp<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
      .ok()
      .map(|timestamp| timestamp.with_timezone(&Utc)),
    _ => None,
  })
}

/// Unreadable entries are dropped, the rest kept in order.
pub(super) fn history<'de, D: Deserializer<'de>>(
  deserializer: D,
) -> Result<Vec<ProgressEntry>, D::Error> {
  Ok(match Value::deserialize(deserializer)? {
    Value::Array(entries) => entries
      .into_iter()
      .filter_map(|entry| serde_json::from_value(entry).ok())
      .collect(),
    _ => vec![],
  })
}

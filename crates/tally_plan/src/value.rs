//! Metric values and breakdown entries.

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used for a group whose key column is missing.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Label of the folded tail of a capped breakdown.
pub const OTHER_LABEL: &str = "Other";

const NO_DATA: &str = "no_data";

/// Result of a metric reduction.
///
/// `NoData` is a value, not an error: it marks "nothing to compute over"
/// (empty average, zero denominator, empty comparison half). Serialized as a
/// JSON number or the string `"no_data"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Number(f64),
    NoData,
}

impl MetricValue {
    /// Wrap a raw float, mapping NaN and infinities to `NoData`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            MetricValue::Number(value)
        } else {
            MetricValue::NoData
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, MetricValue::NoData)
    }

    pub fn rounded(&self) -> Self {
        match self {
            MetricValue::Number(v) => MetricValue::Number(round2(*v)),
            MetricValue::NoData => MetricValue::NoData,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(v) => write!(f, "{:.2}", v),
            MetricValue::NoData => write!(f, "{}", NO_DATA),
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Number(v) => serializer.serialize_f64(*v),
            MetricValue::NoData => serializer.serialize_str(NO_DATA),
        }
    }
}

impl<'de> Deserialize<'de> for MetricValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MetricValueVisitor;

        impl<'de> Visitor<'de> for MetricValueVisitor {
            type Value = MetricValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "a number or \"{}\"", NO_DATA)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(MetricValue::from_f64(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(MetricValue::Number(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(MetricValue::Number(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == NO_DATA {
                    Ok(MetricValue::NoData)
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }
        }

        deserializer.deserialize_any(MetricValueVisitor)
    }
}

/// One group of a KPI breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub label: String,
    pub value: MetricValue,
    /// Share of the total of defined values, in percent. `None` for no-data groups.
    pub pct: Option<f64>,
}

/// Round to two decimals, halves away from zero.
pub fn round2(value: f64) -> f64 {
    let scaled = value * 100.0;
    // Absorb binary representation error before rounding (1.005 is 1.00499..).
    let nudged = scaled + scaled.signum() * 1e-9 * scaled.abs().max(1.0);
    nudged.round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(1.005), 1.01);
        assert_eq!(round2(-1.005), -1.01);
        assert_eq!(round2(15231.4), 15231.4);
        assert_eq!(round2(2.344), 2.34);
    }

    #[test]
    fn test_metric_value_json() {
        assert_eq!(serde_json::to_string(&MetricValue::Number(1.5)).unwrap(), "1.5");
        assert_eq!(serde_json::to_string(&MetricValue::NoData).unwrap(), "\"no_data\"");
        let back: MetricValue = serde_json::from_str("\"no_data\"").unwrap();
        assert!(back.is_no_data());
        let back: MetricValue = serde_json::from_str("42").unwrap();
        assert_eq!(back, MetricValue::Number(42.0));
        assert!(serde_json::from_str::<MetricValue>("\"nan\"").is_err());
    }

    #[test]
    fn test_non_finite_is_no_data() {
        assert!(MetricValue::from_f64(f64::NAN).is_no_data());
        assert!(MetricValue::from_f64(f64::INFINITY).is_no_data());
    }
}

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single label value attached to a state.
///
/// Untagged so the wire form is the natural JSON scalar
/// (`"dev"`, `3`, `true`). Variant order matters for deserialization:
/// booleans and numbers must be tried before strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl LabelValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            LabelValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            LabelValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            LabelValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelValue::Bool(b) => write!(f, "{b}"),
            LabelValue::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            LabelValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for LabelValue {
    fn from(s: &str) -> Self {
        LabelValue::String(s.to_string())
    }
}

impl From<String> for LabelValue {
    fn from(s: String) -> Self {
        LabelValue::String(s)
    }
}

impl From<f64> for LabelValue {
    fn from(n: f64) -> Self {
        LabelValue::Number(n)
    }
}

impl From<bool> for LabelValue {
    fn from(b: bool) -> Self {
        LabelValue::Bool(b)
    }
}

/// The label map of a state. A `BTreeMap` keeps iteration order
/// deterministic, which matters for fingerprints and log output.
pub type Labels = BTreeMap<String, LabelValue>;

/// Convenience constructor used throughout tests and seeds.
pub fn labels<K: Into<String>, V: Into<LabelValue>>(
    pairs: impl IntoIterator<Item = (K, V)>,
) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

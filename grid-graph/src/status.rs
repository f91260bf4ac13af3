use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a dependency edge.
///
/// `Pending`: created without a mock, consumer has never synced.
/// `Clean` / `Dirty`: consumer digest matches / trails the producer.
/// `Mock`: the consumer runs against a mock value, not live output.
/// `SchemaInvalid`: the producer output failed schema validation.
/// `MissingOutput`: the producer no longer exposes the output key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeStatus {
    Pending,
    Clean,
    Dirty,
    Mock,
    SchemaInvalid,
    MissingOutput,
}

impl EdgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeStatus::Pending => "pending",
            EdgeStatus::Clean => "clean",
            EdgeStatus::Dirty => "dirty",
            EdgeStatus::Mock => "mock",
            EdgeStatus::SchemaInvalid => "schema-invalid",
            EdgeStatus::MissingOutput => "missing-output",
        }
    }

    /// Sort rank for incoming-edge reporting:
    /// pending first, then the unknown class, then dirty, then clean.
    pub fn report_rank(&self) -> u8 {
        match self {
            EdgeStatus::Pending => 0,
            EdgeStatus::Mock | EdgeStatus::SchemaInvalid | EdgeStatus::MissingOutput => 1,
            EdgeStatus::Dirty => 2,
            EdgeStatus::Clean => 3,
        }
    }

    /// Whether an incoming edge with this status marks its consumer stale.
    pub fn taints(&self) -> bool {
        matches!(self, EdgeStatus::Dirty | EdgeStatus::Pending)
    }
}

impl fmt::Display for EdgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EdgeStatus::Pending),
            "clean" => Ok(EdgeStatus::Clean),
            "dirty" => Ok(EdgeStatus::Dirty),
            "mock" => Ok(EdgeStatus::Mock),
            "schema-invalid" => Ok(EdgeStatus::SchemaInvalid),
            "missing-output" => Ok(EdgeStatus::MissingOutput),
            other => Err(format!("unknown edge status '{other}'")),
        }
    }
}

//! The label-validation seam.
//!
//! Label policy (which keys exist, which values they may take) is owned by
//! an external collaborator; the state service only needs a yes/no answer
//! with a reason.

use grid_core::labels::Labels;

/// A rejected label set: the offending key and a human reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    pub key: String,
    pub reason: String,
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "label '{}': {}", self.key, self.reason)
    }
}

/// Pluggable label validation.
#[async_trait::async_trait]
pub trait LabelPolicy: Send + Sync {
    async fn validate(&self, labels: &Labels) -> Result<(), PolicyViolation>;
}

/// The default policy: anything goes. Deployments wire the label-policy
/// service in here.
pub struct AllowAllLabels;

#[async_trait::async_trait]
impl LabelPolicy for AllowAllLabels {
    async fn validate(&self, _labels: &Labels) -> Result<(), PolicyViolation> {
        Ok(())
    }
}

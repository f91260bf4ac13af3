pub mod dependency_service;
pub mod outputs;
pub mod policy;
pub mod state_service;

// Re-export primary public types for convenience.
pub use dependency_service::{
    AddDependencyResult, DependencyService, EdgeSummary, IncomingEdgeReport, StateStatusReport,
};
pub use policy::{AllowAllLabels, LabelPolicy, PolicyViolation};
pub use state_service::{
    BackendConfig, StateService, StateSummary, UpdateOutcome, MAX_LOGIC_ID_LEN,
    SIZE_WARNING_BYTES,
};

pub mod action;
pub mod constraints;
pub mod engine;

// Re-export primary public types for convenience.
pub use action::action_matches;
pub use constraints::{check_create, check_label_update};
pub use engine::{authorize, AllowReason, Decision, EffectivePermissions, ResourceContext};

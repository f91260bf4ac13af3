pub mod entities;
pub mod error;
pub mod memory;
pub mod repos;

// Re-export primary public types for convenience.
pub use entities::{
    CreateConstraint, DependencyEdge, GroupRole, LockInfo, Principal, PrincipalRef, RevokedJti,
    Role, SchemaSource, ServiceAccount, Session, StateOutput, StateRecord, User, UserRole,
    ValidationStatus,
};
pub use error::DataError;
pub use memory::InMemoryRepositories;
pub use repos::{
    EdgeRepository, LockOutcome, Repositories, RevokedJtiRepository, RoleBindingRepository,
    RoleRepository, ServiceAccountRepository, SessionRepository, StateOutputRepository,
    StateRepository, UnlockOutcome, UserRepository,
};

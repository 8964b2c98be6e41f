pub mod access;
pub mod app;
pub mod db;
pub mod docs;
pub mod errors;
pub mod events;
pub mod jwt;
pub mod models;
pub mod routes;
pub mod utils;

// Re-export commonly used items for embedders and tests
pub use access::{
    can_enter, AccessConfig, AccessFault, AccessGate, CapabilitySet, Decision, GrantOutcome,
    Identity, InMemoryRoleStore, Resolution, RevokeOutcome, Role, RoleAssignment, RoleStore,
    RouteClass, SqliteRoleStore, StoreError,
};
pub use app::create_app;

//! Access control core: session resolution, role storage, and the
//! authorization gate.
//!
//! The three pieces compose linearly. A [`SessionResolver`] turns ambient
//! token state into an [`Identity`] (or nothing). The [`AccessGate`] asks a
//! [`RoleStore`] for that identity's assignments, caches the result per
//! identity with single-flight fetching, and derives a [`CapabilitySet`].
//! Route-level checks go through [`can_enter`], one decision table for the
//! whole portal.
//!
//! Nothing in here knows about HTTP; the route layer is one consumer.

mod capability;
mod gate;
mod policy;
mod role;
mod session;
mod store;

pub use capability::{CapabilitySet, Identity};
pub use gate::{AccessConfig, AccessFault, AccessGate, Resolution};
pub use policy::{can_enter, Decision, RouteClass, UnknownRouteClass};
pub use role::{GrantOutcome, InvalidRole, RevokeOutcome, Role, RoleAssignment};
pub use session::{
    spawn_invalidation_listener, JwtSessionResolver, SessionError, SessionEvent, SessionNotifier,
    SessionResolver,
};
pub use store::{InMemoryRoleStore, RoleStore, SqliteRoleStore, StoreError};

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::events::{Loggable, Severity};

/// Role tags are a closed set. `OfficeStaff` is the administrative side of the
/// portal, `BusinessOwner` the applicant side. Anything else is rejected at
/// parse time, before a store round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    OfficeStaff,
    BusinessOwner,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::OfficeStaff, Role::BusinessOwner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::OfficeStaff => "office_staff",
            Role::BusinessOwner => "business_owner",
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid role tag: {0}")]
pub struct InvalidRole(pub String);

impl FromStr for Role {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "office_staff" => Ok(Role::OfficeStaff),
            "business_owner" => Ok(Role::BusinessOwner),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

/// One row in the role store: the identity holds the role since `assigned_at`.
/// Assignments are never updated in place; any change is revoke-then-grant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleAssignment {
    pub identity_id: Uuid,
    pub role: Role,
    pub assigned_at: DateTime<Utc>,
}

impl Loggable for RoleAssignment {
    fn entity_type() -> &'static str { "role_assignment" }
    fn subject_id(&self) -> Uuid { self.identity_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// Granting a role the identity already holds is a no-op, reported as
/// `AlreadyGranted` so callers can treat it as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GrantOutcome {
    Granted,
    AlreadyGranted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RevokeOutcome {
    Revoked,
    NotGranted,
}

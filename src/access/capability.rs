use std::collections::BTreeSet;

use uuid::Uuid;

use super::role::Role;

/// An authenticated principal as handed out by the session resolver. The id is
/// the stable key everything else hangs off; the email is informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
}

/// The roles resolved for one identity at one point in time.
///
/// An unauthenticated caller always gets the empty set with no identity, never
/// an "unknown" value. An authenticated identity with no assignments is a
/// distinct state: identity present, roles empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    identity: Option<Uuid>,
    roles: BTreeSet<Role>,
}

impl CapabilitySet {
    pub fn unauthenticated() -> Self {
        Self { identity: None, roles: BTreeSet::new() }
    }

    pub fn resolved(identity_id: Uuid, roles: BTreeSet<Role>) -> Self {
        Self { identity: Some(identity_id), roles }
    }

    /// Authenticated identity for which the role fetch yielded nothing.
    pub fn empty_for(identity_id: Uuid) -> Self {
        Self::resolved(identity_id, BTreeSet::new())
    }

    pub fn identity_id(&self) -> Option<Uuid> {
        self.identity
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::OfficeStaff)
    }

    pub fn is_business_owner(&self) -> bool {
        self.roles.contains(&Role::BusinessOwner)
    }
}

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::role::{GrantOutcome, RevokeOutcome, Role, RoleAssignment};

/// Failures reaching the role store. The two variants demand different
/// recovery: `Unavailable` is transient and worth retrying, `PermissionDenied`
/// means an access policy rejected the read and retrying won't help.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("role store unavailable: {0}")]
    Unavailable(String),
    #[error("role store rejected the request: {0}")]
    PermissionDenied(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Durable source of truth for role assignments. Implementations are pure
/// passthroughs: no caching here, that belongs to the gate.
///
/// Mutations have at-least-once semantics; callers must not assume atomicity
/// across multiple calls. The unit of mutation is a single role tag.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Empty set both for an identity with no assignments and for an identity
    /// the store has never seen. Absence of roles is not an error.
    async fn get_roles(&self, identity_id: Uuid) -> Result<BTreeSet<Role>, StoreError>;

    async fn grant_role(&self, identity_id: Uuid, role: Role) -> Result<GrantOutcome, StoreError>;

    async fn revoke_role(&self, identity_id: Uuid, role: Role) -> Result<RevokeOutcome, StoreError>;

    async fn list_assignments(&self, identity_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError>;

    /// Whether any identity at all holds `role`. Used by the first-admin
    /// bootstrap check.
    async fn any_holder_of(&self, role: Role) -> Result<bool, StoreError>;
}

/// Role store backed by the `role_assignments` table.
#[derive(Clone)]
pub struct SqliteRoleStore {
    pool: SqlitePool,
}

impl SqliteRoleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoleStore for SqliteRoleStore {
    async fn get_roles(&self, identity_id: Uuid) -> Result<BTreeSet<Role>, StoreError> {
        let rows = sqlx::query("SELECT role FROM role_assignments WHERE identity_id = ?")
            .bind(identity_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut roles = BTreeSet::new();
        for row in rows {
            let tag: String = row.get("role");
            match Role::from_str(&tag) {
                Ok(role) => {
                    roles.insert(role);
                }
                Err(_) => {
                    // A tag outside the closed set can only appear through
                    // out-of-band writes; skip it rather than failing the read.
                    tracing::warn!(identity_id = %identity_id, tag = %tag, "skipping unknown role tag");
                }
            }
        }

        Ok(roles)
    }

    async fn grant_role(&self, identity_id: Uuid, role: Role) -> Result<GrantOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO role_assignments (identity_id, role, assigned_at) VALUES (?, ?, ?)",
        )
        .bind(identity_id.to_string())
        .bind(role.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(GrantOutcome::AlreadyGranted)
        } else {
            Ok(GrantOutcome::Granted)
        }
    }

    async fn revoke_role(&self, identity_id: Uuid, role: Role) -> Result<RevokeOutcome, StoreError> {
        let result = sqlx::query("DELETE FROM role_assignments WHERE identity_id = ? AND role = ?")
            .bind(identity_id.to_string())
            .bind(role.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            Ok(RevokeOutcome::NotGranted)
        } else {
            Ok(RevokeOutcome::Revoked)
        }
    }

    async fn list_assignments(&self, identity_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
        let rows = sqlx::query(
            "SELECT role, assigned_at FROM role_assignments WHERE identity_id = ? ORDER BY assigned_at",
        )
        .bind(identity_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = Vec::with_capacity(rows.len());
        for row in rows {
            let tag: String = row.get("role");
            let assigned_at: DateTime<Utc> = row.get("assigned_at");
            if let Ok(role) = Role::from_str(&tag) {
                assignments.push(RoleAssignment { identity_id, role, assigned_at });
            }
        }

        Ok(assignments)
    }

    async fn any_holder_of(&self, role: Role) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM role_assignments WHERE role = ?")
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }
}

/// In-memory role store. Used by tests and anywhere a database is overkill;
/// same contract as the SQLite store, including idempotency outcomes.
#[derive(Default)]
pub struct InMemoryRoleStore {
    inner: Mutex<HashMap<Uuid, BTreeMap<Role, DateTime<Utc>>>>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn get_roles(&self, identity_id: Uuid) -> Result<BTreeSet<Role>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(&identity_id)
            .map(|roles| roles.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn grant_role(&self, identity_id: Uuid, role: Role) -> Result<GrantOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let roles = inner.entry(identity_id).or_default();
        if roles.contains_key(&role) {
            Ok(GrantOutcome::AlreadyGranted)
        } else {
            roles.insert(role, Utc::now());
            Ok(GrantOutcome::Granted)
        }
    }

    async fn revoke_role(&self, identity_id: Uuid, role: Role) -> Result<RevokeOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get_mut(&identity_id) {
            Some(roles) if roles.contains_key(&role) => {
                roles.remove(&role);
                Ok(RevokeOutcome::Revoked)
            }
            _ => Ok(RevokeOutcome::NotGranted),
        }
    }

    async fn list_assignments(&self, identity_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .get(&identity_id)
            .map(|roles| {
                roles
                    .iter()
                    .map(|(role, assigned_at)| RoleAssignment {
                        identity_id,
                        role: *role,
                        assigned_at: *assigned_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn any_holder_of(&self, role: Role) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.values().any(|roles| roles.contains_key(&role)))
    }
}

use std::str::FromStr;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use uuid::Uuid;

use crate::access::{GrantOutcome, RevokeOutcome, Role, RoleAssignment};
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::{AdminUser, AuthUser};
use crate::models::access::{GrantRoleRequest, MutationResponse, RoleAssignmentResponse};
use crate::routes::auth::fetch_user_by_id;
use crate::utils::utc_now;

/// List a user's role assignments.
#[utoipa::path(
    get,
    path = "/access/users/{user_id}/roles",
    tag = "Roles",
    params(("user_id" = Uuid, Path, description = "Identity to inspect")),
    responses(
        (status = 200, description = "Role assignments", body = Vec<RoleAssignmentResponse>),
        (status = 403, description = "Caller is not office staff"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_user_roles(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<Vec<RoleAssignmentResponse>>> {
    let assignments = state.roles.list_assignments(user_id).await?;

    Ok(Json(
        assignments
            .into_iter()
            .map(|a| RoleAssignmentResponse {
                identity_id: a.identity_id,
                role: a.role,
                assigned_at: a.assigned_at,
            })
            .collect(),
    ))
}

/// Grant a role. Granting a role the user already holds is a no-op reported
/// as `already_granted`.
#[utoipa::path(
    post,
    path = "/access/users/{user_id}/roles",
    tag = "Roles",
    params(("user_id" = Uuid, Path, description = "Identity to grant to")),
    request_body = GrantRoleRequest,
    responses(
        (status = 201, description = "Role granted", body = MutationResponse),
        (status = 200, description = "Role was already granted", body = MutationResponse),
        (status = 400, description = "Unknown role tag"),
        (status = 403, description = "Caller is not office staff"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_role(
    State(state): State<AppState>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(req): Json<GrantRoleRequest>,
) -> AppResult<(StatusCode, Json<MutationResponse>)> {
    let role = Role::from_str(&req.role)?;
    fetch_user_by_id(&state.pool, user_id).await?;

    let outcome = state.gate.grant_role(user_id, role).await?;

    if outcome == GrantOutcome::Granted {
        let assignment = RoleAssignment { identity_id: user_id, role, assigned_at: utc_now() };
        log_activity_with_context(
            &state.event_bus,
            "granted",
            Some(admin.identity.id),
            &assignment,
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    let status = match outcome {
        GrantOutcome::Granted => StatusCode::CREATED,
        GrantOutcome::AlreadyGranted => StatusCode::OK,
    };

    Ok((status, Json(outcome.into())))
}

/// Revoke a role. Revoking a role the user never held is a no-op reported as
/// `not_granted`.
#[utoipa::path(
    delete,
    path = "/access/users/{user_id}/roles/{role}",
    tag = "Roles",
    params(
        ("user_id" = Uuid, Path, description = "Identity to revoke from"),
        ("role" = String, Path, description = "Role tag to revoke"),
    ),
    responses(
        (status = 200, description = "Revocation outcome", body = MutationResponse),
        (status = 400, description = "Unknown role tag"),
        (status = 403, description = "Caller is not office staff"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    admin: AdminUser,
    headers: HeaderMap,
    Path((user_id, role)): Path<(Uuid, String)>,
) -> AppResult<Json<MutationResponse>> {
    let role = Role::from_str(&role)?;

    let outcome = state.gate.revoke_role(user_id, role).await?;

    if outcome == RevokeOutcome::Revoked {
        let assignment = RoleAssignment { identity_id: user_id, role, assigned_at: utc_now() };
        log_activity_with_context(
            &state.event_bus,
            "revoked",
            Some(admin.identity.id),
            &assignment,
            None,
            Some(RequestContext::from_headers(&headers)),
        );
    }

    Ok(Json(outcome.into()))
}

/// Self-service first-admin bootstrap: grants office staff to the caller,
/// but only while nobody holds the role yet. Racing bootstraps can in theory
/// both pass the check; the store's uniqueness key still keeps each grant
/// single, and the portal treats extra first admins as operator cleanup.
#[utoipa::path(
    post,
    path = "/access/bootstrap",
    tag = "Roles",
    responses(
        (status = 201, description = "Caller is now the first administrator", body = MutationResponse),
        (status = 409, description = "An administrator already exists"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn bootstrap_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
) -> AppResult<(StatusCode, Json<MutationResponse>)> {
    if state.roles.any_holder_of(Role::OfficeStaff).await? {
        return Err(AppError::conflict("an administrator already exists"));
    }

    let outcome = state.gate.grant_role(auth.identity.id, Role::OfficeStaff).await?;

    let assignment = RoleAssignment {
        identity_id: auth.identity.id,
        role: Role::OfficeStaff,
        assigned_at: utc_now(),
    };
    log_activity_with_context(
        &state.event_bus,
        "bootstrapped",
        Some(auth.identity.id),
        &assignment,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

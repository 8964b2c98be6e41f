use std::str::FromStr;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use crate::access::{can_enter, RouteClass};
use crate::app::AppState;
use crate::errors::AppResult;
use crate::jwt::OptionalAuthUser;
use crate::models::access::{CapabilitiesResponse, DecisionResponse};

/// Resolve the caller's capability set. Anonymous callers get the empty set;
/// a store outage still yields a capability payload, with the problem
/// reported in the `error` field so clients can offer a retry.
#[utoipa::path(
    get,
    path = "/access/capabilities",
    tag = "Access",
    responses((status = 200, description = "Resolved capabilities", body = CapabilitiesResponse)),
    security((), ("bearerAuth" = []))
)]
pub async fn get_capabilities(
    State(state): State<AppState>,
    OptionalAuthUser(identity): OptionalAuthUser,
) -> AppResult<Json<CapabilitiesResponse>> {
    let resolution = state.gate.resolve(identity.as_ref()).await;
    Ok(Json(resolution.into()))
}

/// Explicit refetch: drops the cached entry before resolving.
#[utoipa::path(
    post,
    path = "/access/capabilities/refresh",
    tag = "Access",
    responses((status = 200, description = "Re-resolved capabilities", body = CapabilitiesResponse)),
    security((), ("bearerAuth" = []))
)]
pub async fn refresh_capabilities(
    State(state): State<AppState>,
    OptionalAuthUser(identity): OptionalAuthUser,
) -> AppResult<Json<CapabilitiesResponse>> {
    if let Some(identity) = &identity {
        state.gate.invalidate(identity.id);
    }

    let resolution = state.gate.resolve(identity.as_ref()).await;
    Ok(Json(resolution.into()))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DecisionQuery {
    /// One of `public`, `authenticated-only`, `admin-only`.
    pub route_class: String,
}

/// Route-guard decision for the caller's session and the given route class.
#[utoipa::path(
    get,
    path = "/access/decision",
    tag = "Access",
    params(DecisionQuery),
    responses(
        (status = 200, description = "Entry decision", body = DecisionResponse),
        (status = 400, description = "Unknown route class"),
    ),
    security((), ("bearerAuth" = []))
)]
pub async fn decision(
    State(state): State<AppState>,
    OptionalAuthUser(identity): OptionalAuthUser,
    Query(query): Query<DecisionQuery>,
) -> AppResult<Json<DecisionResponse>> {
    let route = RouteClass::from_str(&query.route_class)?;

    let resolution = state.gate.resolve(identity.as_ref()).await;
    let decision = can_enter(route, &resolution.capabilities, state.gate.config());

    Ok(Json(DecisionResponse::new(decision, resolution.fault)))
}

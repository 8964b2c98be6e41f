use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::access::{AccessFault, CapabilitySet, Identity};
use crate::app::AppState;
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        Ok(Self {
            secret: Arc::new(secret.into_bytes()),
            exp_hours,
        })
    }

    /// Tokens carry the identity id and email so session resolution never
    /// needs a store round-trip.
    pub fn encode(&self, identity_id: Uuid, email: &str) -> Result<String, AppError> {
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let exp = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: identity_id,
            email: email.to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub exp: usize,
    pub iat: usize,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Extractor for routes that require a session. Rejects with 401 when the
/// caller is unauthenticated.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: Identity,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = state
            .sessions
            .resolve_token(bearer_token(parts))
            .await?
            .ok_or_else(|| AppError::unauthorized("authentication required"))?;

        Ok(AuthUser { identity })
    }
}

/// Extractor for routes open to anonymous callers. An invalid or missing
/// token yields `None` rather than a rejection.
#[derive(Debug, Clone)]
pub struct OptionalAuthUser(pub Option<Identity>);

#[async_trait]
impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let identity = state.sessions.resolve_token(bearer_token(parts)).await?;
        Ok(OptionalAuthUser(identity))
    }
}

/// The one admin guard. Resolves the caller through the gate and rejects
/// anyone without the office-staff role; a store outage rejects with 503
/// rather than silently demoting the caller.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub identity: Identity,
    pub capabilities: CapabilitySet,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser { identity } = AuthUser::from_request_parts(parts, state).await?;

        let resolution = state.gate.resolve(Some(&identity)).await;
        if resolution.fault == Some(AccessFault::StoreUnavailable) {
            return Err(AppError::unavailable("role verification is temporarily unavailable"));
        }
        if !resolution.capabilities.is_admin() {
            return Err(AppError::forbidden("office staff role required"));
        }

        Ok(AdminUser { identity, capabilities: resolution.capabilities })
    }
}

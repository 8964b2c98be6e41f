use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::access::{AccessFault, Decision, GrantOutcome, Resolution, RevokeOutcome, Role};

/// Wire shape of a resolved capability set, with the out-of-band fault kept
/// separate from the capabilities themselves.
#[derive(Debug, Serialize, ToSchema)]
pub struct CapabilitiesResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<Uuid>,
    pub roles: Vec<Role>,
    pub is_admin: bool,
    pub is_business_owner: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FaultInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FaultInfo {
    #[schema(example = "store_unavailable")]
    pub code: String,
    /// Whether retrying the request can help.
    pub retryable: bool,
}

impl From<AccessFault> for FaultInfo {
    fn from(fault: AccessFault) -> Self {
        FaultInfo {
            code: fault.code().to_string(),
            retryable: fault.is_retryable(),
        }
    }
}

impl From<Resolution> for CapabilitiesResponse {
    fn from(resolution: Resolution) -> Self {
        let caps = &resolution.capabilities;
        CapabilitiesResponse {
            identity_id: caps.identity_id(),
            roles: caps.roles().iter().copied().collect(),
            is_admin: caps.is_admin(),
            is_business_owner: caps.is_business_owner(),
            error: resolution.fault.map(FaultInfo::from),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DecisionResponse {
    #[schema(example = "deny_redirect")]
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FaultInfo>,
}

impl DecisionResponse {
    pub fn new(decision: Decision, fault: Option<AccessFault>) -> Self {
        let (decision, redirect_to) = match decision {
            Decision::Allow => ("allow", None),
            Decision::RequireAuth => ("require_auth", None),
            Decision::DenyRedirect(target) => ("deny_redirect", Some(target)),
        };

        DecisionResponse {
            decision,
            redirect_to,
            error: fault.map(FaultInfo::from),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GrantRoleRequest {
    /// Role tag from the closed set, e.g. `office_staff`.
    #[schema(example = "business_owner")]
    pub role: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleAssignmentResponse {
    pub identity_id: Uuid,
    pub role: Role,
    pub assigned_at: DateTime<Utc>,
}

/// Outcome envelope for grant/revoke. Idempotent no-ops (`already_granted`,
/// `not_granted`) are reported as success, not as errors.
#[derive(Debug, Serialize, ToSchema)]
pub struct MutationResponse {
    pub outcome: &'static str,
}

impl From<GrantOutcome> for MutationResponse {
    fn from(outcome: GrantOutcome) -> Self {
        MutationResponse {
            outcome: match outcome {
                GrantOutcome::Granted => "granted",
                GrantOutcome::AlreadyGranted => "already_granted",
            },
        }
    }
}

impl From<RevokeOutcome> for MutationResponse {
    fn from(outcome: RevokeOutcome) -> Self {
        MutationResponse {
            outcome: match outcome {
                RevokeOutcome::Revoked => "revoked",
                RevokeOutcome::NotGranted => "not_granted",
            },
        }
    }
}

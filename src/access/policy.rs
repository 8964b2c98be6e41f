use std::str::FromStr;

use super::capability::CapabilitySet;
use super::gate::AccessConfig;

/// Coarse category of navigable area. Every screen and API group in the
/// portal maps to one of these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    AuthenticatedOnly,
    AdminOnly,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Public => "public",
            RouteClass::AuthenticatedOnly => "authenticated-only",
            RouteClass::AdminOnly => "admin-only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown route class: {0}")]
pub struct UnknownRouteClass(pub String);

impl FromStr for RouteClass {
    type Err = UnknownRouteClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(RouteClass::Public),
            "authenticated-only" | "authenticated_only" => Ok(RouteClass::AuthenticatedOnly),
            "admin-only" | "admin_only" => Ok(RouteClass::AdminOnly),
            other => Err(UnknownRouteClass(other.to_string())),
        }
    }
}

/// Outcome of a route-entry check. Landing on the wrong area for your role
/// redirects rather than erroring; only missing authentication asks the
/// caller to sign in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RequireAuth,
    DenyRedirect(String),
}

/// The whole access policy in one table. Office staff and business owners
/// occupy disjoint navigable areas: an admin entering an applicant-only area
/// is bounced to the admin home, and vice versa.
///
/// Pure function, no I/O; the capability set must already be resolved.
pub fn can_enter(route: RouteClass, capabilities: &CapabilitySet, config: &AccessConfig) -> Decision {
    let decision = match route {
        RouteClass::Public => Decision::Allow,
        RouteClass::AuthenticatedOnly => {
            if !capabilities.is_authenticated() {
                Decision::RequireAuth
            } else if capabilities.is_admin() {
                Decision::DenyRedirect(config.admin_home.clone())
            } else {
                Decision::Allow
            }
        }
        RouteClass::AdminOnly => {
            if !capabilities.is_authenticated() {
                Decision::RequireAuth
            } else if capabilities.is_admin() {
                Decision::Allow
            } else {
                Decision::DenyRedirect(config.user_home.clone())
            }
        }
    };

    tracing::debug!(
        route = route.as_str(),
        authenticated = capabilities.is_authenticated(),
        admin = capabilities.is_admin(),
        decision = ?decision,
        "route entry check"
    );

    decision
}

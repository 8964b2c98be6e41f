use axum::Router;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::models;
use crate::routes;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearerAuth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::refresh,
        routes::auth::me,
        routes::auth::logout,
        routes::capabilities::get_capabilities,
        routes::capabilities::refresh_capabilities,
        routes::capabilities::decision,
        routes::roles::list_user_roles,
        routes::roles::grant_role,
        routes::roles::revoke_role,
        routes::roles::bootstrap_admin,
    ),
    components(
        schemas(
            models::user::User,
            models::user::AuthResponse,
            models::user::LoginRequest,
            models::user::RegisterRequest,
            models::access::CapabilitiesResponse,
            models::access::DecisionResponse,
            models::access::FaultInfo,
            models::access::GrantRoleRequest,
            models::access::RoleAssignmentResponse,
            models::access::MutationResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Access", description = "Capability resolution and route decisions"),
        (name = "Roles", description = "Role assignment management"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

pub fn swagger_routes() -> Router {
    SwaggerUi::new("/docs")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .into()
}

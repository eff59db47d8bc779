//! OpenAPI documentation for the `/api/*` endpoints.
//!
//! Rendered with Scalar at `/api/docs`.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api;
use crate::lifecycle::state::PriorityStatus;

/// Identity comes from headers set by the authenticating reverse proxy.
struct ProxyHeaderSecurityAddon;

impl Modify for ProxyHeaderSecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.security_schemes.insert(
                "X-Gpuprio-User".to_string(),
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                    "x-gpuprio-user",
                    "Username of the caller, set by the authenticating reverse proxy. \
                     The proxy should also send `x-gpuprio-email` so that first-time users get an address for notifications.",
                ))),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "gpuprio",
        description = "Request, review and track temporary GPU priority on the SLURM cluster."
    ),
    servers(
        (url = "/api", description = "gpuprio API")
    ),
    modifiers(&ProxyHeaderSecurityAddon),
    paths(
        api::handlers::gpus::available_gpus,
        api::handlers::gpus::gpu_catalog,
        api::handlers::users::get_current_user,
        api::handlers::priorities::create_priority,
        api::handlers::priorities::list_own_priorities,
        api::handlers::priorities::get_priority,
        api::handlers::admin::list_priorities,
        api::handlers::admin::accept_priority,
        api::handlers::admin::refuse_priority,
        api::handlers::admin::rename_priority,
        api::handlers::admin::add_username,
        api::handlers::admin::remove_username,
        api::handlers::admin::add_message,
        api::handlers::admin::set_archived,
        api::handlers::admin::delete_priority,
        api::handlers::admin::get_commands,
    ),
    components(
        schemas(
            api::models::users::CurrentUser,
            api::models::gpus::GpuCatalogResponse,
            api::models::priorities::PriorityCreate,
            api::models::priorities::PriorityAccept,
            api::models::priorities::PriorityRefuse,
            api::models::priorities::PriorityRename,
            api::models::priorities::UsernameAdd,
            api::models::priorities::MessageCreate,
            api::models::priorities::ArchivedUpdate,
            api::models::priorities::PriorityResponse,
            api::models::priorities::PriorityMessageResponse,
            api::models::priorities::AcceptResponse,
            api::models::priorities::CommandsResponse,
            PriorityStatus,
        )
    ),
    tags(
        (name = "gpus", description = "Current GPU availability"),
        (name = "users", description = "The authenticated user"),
        (name = "priorities", description = "Submitting and tracking priority requests"),
        (name = "admin", description = "Reviewing and maintaining priority requests (administrators only)"),
    )
)]
pub struct ApiDoc;

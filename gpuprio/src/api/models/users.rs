//! API models for the authenticated user.

use crate::types::UserId;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// The user making the request, as established by the proxy headers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

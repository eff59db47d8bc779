use crate::api::models::users::CurrentUser;
use crate::errors::Result;
use axum::Json;

#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "users",
    summary = "The current user",
    description = "Identity as established by the proxy headers, including whether the user is an administrator.",
    responses(
        (status = 200, description = "The authenticated user", body = CurrentUser),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn get_current_user(current_user: CurrentUser) -> Result<Json<CurrentUser>> {
    Ok(Json(current_user))
}

//! Administrator endpoints for reviewing and managing priority requests.

use crate::api::models::pagination::PaginatedResponse;
use crate::api::models::priorities::{
    AcceptResponse, ArchivedUpdate, CommandsResponse, ListPrioritiesQuery, MessageCreate, PriorityAccept, PriorityRefuse, PriorityRename,
    PriorityResponse, UsernameAdd,
};
use crate::auth::current_user::AdminUser;
use crate::errors::{Error, Result};
use crate::lifecycle::ListQuery;
use crate::slurm::{generate_commands, render_script};
use crate::types::PriorityId;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

#[utoipa::path(
    get,
    path = "/v1/admin/priorities",
    tag = "admin",
    summary = "List all priority requests",
    description = "Archived requests and those expired past the grace period are hidden unless `show_archived` is set.",
    params(ListPrioritiesQuery),
    responses(
        (status = 200, description = "Paginated list of requests", body = PaginatedResponse<PriorityResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Administrator role required"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn list_priorities(
    State(state): State<AppState>,
    Query(query): Query<ListPrioritiesQuery>,
    _admin: AdminUser,
) -> Result<Json<PaginatedResponse<PriorityResponse>>> {
    let (skip, limit) = query.pagination.params();
    let (requests, total) = state
        .lifecycle
        .list(ListQuery {
            requester: query.requester,
            status: query.status,
            show_archived: query.show_archived.unwrap_or(false),
            skip,
            limit,
        })
        .await?;

    let data = requests.into_iter().map(PriorityResponse::from).collect();
    Ok(Json(PaginatedResponse::new(data, total, skip, limit)))
}

#[utoipa::path(
    post,
    path = "/v1/admin/priorities/{id}/accept",
    tag = "admin",
    summary = "Accept a pending request",
    description = "Assigns the QOS name, generates the SLURM commands and schedules the QOS removal. \
                   A failure to schedule the removal is returned as `scheduling_warning`; the acceptance stands.",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    request_body = PriorityAccept,
    responses(
        (status = 200, description = "Request accepted", body = AcceptResponse),
        (status = 400, description = "Invalid priority name"),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 409, description = "Request is not pending, or the name is already in use"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn accept_priority(
    State(state): State<AppState>,
    Path(id): Path<PriorityId>,
    AdminUser(admin): AdminUser,
    Json(body): Json<PriorityAccept>,
) -> Result<Json<AcceptResponse>> {
    let outcome = state.lifecycle.accept(id, &body.priority_name, &admin.username, body.message).await?;

    Ok(Json(AcceptResponse {
        priority: outcome.priority.into(),
        scheduling_warning: outcome.scheduling_warning,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/priorities/{id}/refuse",
    tag = "admin",
    summary = "Refuse a pending request",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    request_body = PriorityRefuse,
    responses(
        (status = 200, description = "Request refused", body = PriorityResponse),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 409, description = "Request is not pending"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn refuse_priority(
    State(state): State<AppState>,
    Path(id): Path<PriorityId>,
    AdminUser(admin): AdminUser,
    Json(body): Json<PriorityRefuse>,
) -> Result<Json<PriorityResponse>> {
    let refused = state.lifecycle.refuse(id, &admin.username, &body.reason).await?;
    Ok(Json(refused.into()))
}

#[utoipa::path(
    post,
    path = "/v1/admin/priorities/{id}/rename",
    tag = "admin",
    summary = "Rename an accepted priority",
    description = "Regenerates the cached commands under the new name. An already scheduled removal keeps the old name.",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    request_body = PriorityRename,
    responses(
        (status = 200, description = "Priority renamed", body = PriorityResponse),
        (status = 400, description = "Invalid priority name"),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 409, description = "Request is not accepted, or the name is already in use"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn rename_priority(
    State(state): State<AppState>,
    Path(id): Path<PriorityId>,
    AdminUser(admin): AdminUser,
    Json(body): Json<PriorityRename>,
) -> Result<Json<PriorityResponse>> {
    let renamed = state.lifecycle.rename(id, &body.priority_name, &admin.username).await?;
    Ok(Json(renamed.into()))
}

#[utoipa::path(
    post,
    path = "/v1/admin/priorities/{id}/usernames",
    tag = "admin",
    summary = "Add a user to an accepted priority",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    request_body = UsernameAdd,
    responses(
        (status = 200, description = "Username added, or already present", body = PriorityResponse),
        (status = 400, description = "Invalid username or too many usernames"),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 409, description = "Request is not accepted"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn add_username(
    State(state): State<AppState>,
    Path(id): Path<PriorityId>,
    AdminUser(admin): AdminUser,
    Json(body): Json<UsernameAdd>,
) -> Result<Json<PriorityResponse>> {
    let updated = state.lifecycle.add_username(id, &body.username, &admin.username).await?;
    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/priorities/{id}/usernames/{username}",
    tag = "admin",
    summary = "Remove a user from an accepted priority",
    params(
        ("id" = uuid::Uuid, Path, description = "Priority request ID"),
        ("username" = String, Path, description = "Username to remove")
    ),
    responses(
        (status = 200, description = "Username removed", body = PriorityResponse),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request or username not found"),
        (status = 409, description = "Request is not accepted"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id, username = %username))]
pub async fn remove_username(
    State(state): State<AppState>,
    Path((id, username)): Path<(PriorityId, String)>,
    AdminUser(admin): AdminUser,
) -> Result<Json<PriorityResponse>> {
    let updated = state.lifecycle.remove_username(id, &username, &admin.username).await?;
    Ok(Json(updated.into()))
}

#[utoipa::path(
    post,
    path = "/v1/admin/priorities/{id}/messages",
    tag = "admin",
    summary = "Message the requester",
    description = "Stores the message on the request and notifies the requester.",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    request_body = MessageCreate,
    responses(
        (status = 201, description = "Message added", body = PriorityResponse),
        (status = 400, description = "Empty message"),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn add_message(
    State(state): State<AppState>,
    Path(id): Path<PriorityId>,
    AdminUser(admin): AdminUser,
    Json(body): Json<MessageCreate>,
) -> Result<(StatusCode, Json<PriorityResponse>)> {
    let updated = state.lifecycle.add_message(id, &admin.username, &body.text).await?;
    Ok((StatusCode::CREATED, Json(updated.into())))
}

#[utoipa::path(
    patch,
    path = "/v1/admin/priorities/{id}/archived",
    tag = "admin",
    summary = "Archive or restore a request",
    description = "Archived requests are hidden from default listings and release their priority name.",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    request_body = ArchivedUpdate,
    responses(
        (status = 200, description = "Archive flag updated", body = PriorityResponse),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 409, description = "Restoring would reuse a name claimed in the meantime"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id, archived = body.archived))]
pub async fn set_archived(
    State(state): State<AppState>,
    Path(id): Path<PriorityId>,
    AdminUser(admin): AdminUser,
    Json(body): Json<ArchivedUpdate>,
) -> Result<Json<PriorityResponse>> {
    let updated = state.lifecycle.set_archived(id, body.archived, &admin.username).await?;
    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/v1/admin/priorities/{id}",
    tag = "admin",
    summary = "Delete a request",
    description = "Removes the request and its messages. Scheduled removals are not cancelled.",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    responses(
        (status = 204, description = "Request deleted"),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn delete_priority(State(state): State<AppState>, Path(id): Path<PriorityId>, AdminUser(admin): AdminUser) -> Result<StatusCode> {
    state.lifecycle.delete(id, &admin.username).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/admin/priorities/{id}/commands",
    tag = "admin",
    summary = "SLURM commands for an accepted request",
    description = "The commands to run on the cluster, plus an annotated script with verification steps.",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    responses(
        (status = 200, description = "Commands and script", body = CommandsResponse),
        (status = 403, description = "Administrator role required"),
        (status = 404, description = "Priority request not found"),
        (status = 409, description = "Request is not accepted"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn get_commands(State(state): State<AppState>, Path(id): Path<PriorityId>, _admin: AdminUser) -> Result<Json<CommandsResponse>> {
    let request = state.lifecycle.get(id).await?;

    let Some(input) = request.command_input(None, &request.additional_usernames) else {
        return Err(Error::Conflict {
            message: format!("Commands are only available for accepted requests; this one is {}", request.status()),
        });
    };

    Ok(Json(CommandsResponse {
        priority_name: input.priority_name.to_string(),
        commands: generate_commands(&input).to_vec(),
        script: render_script(&input, &request.bugzilla_ticket),
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::models::pagination::PaginatedResponse;
    use crate::api::models::priorities::{AcceptResponse, CommandsResponse, PriorityResponse};
    use crate::lifecycle::state::PriorityStatus;
    use crate::test_utils::{add_auth_headers, create_test_admin, create_test_app};
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{Value, json};
    use sqlx::PgPool;

    async fn submit(app: &TestServer, requester: &str, ticket: &str) -> PriorityResponse {
        let headers = add_auth_headers(requester);
        let response = app
            .post("/api/v1/priorities")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({
                "bugzilla_ticket": ticket,
                "gpu_type": "v100",
                "gpu_count": 2,
                "duration_days": 7,
                "slurm_project": "proj_a",
                "reason": "deadline",
                "additional_usernames": ["alice"],
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    async fn setup(pool: &PgPool) -> (TestServer, Vec<(String, String)>) {
        let app = create_test_app(pool.clone());
        create_test_admin(pool, "boss").await;
        (app, add_auth_headers("boss"))
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_admin_routes_reject_regular_users(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let created = submit(&app, "req", "1").await;
        let headers = add_auth_headers("req");

        app.get("/api/v1/admin/priorities")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        app.post(&format!("/api/v1/admin/priorities/{}/accept", created.id))
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({ "priority_name": "proj_a_prio" }))
            .await
            .assert_status(StatusCode::FORBIDDEN);

        app.get("/api/v1/admin/priorities").await.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_accept_and_fetch_commands(pool: PgPool) {
        let (app, admin) = setup(&pool).await;
        let created = submit(&app, "req", "12345").await;

        let response = app
            .post(&format!("/api/v1/admin/priorities/{}/accept", created.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "priority_name": "proj_a_prio" }))
            .await;
        response.assert_status_ok();
        let accepted: AcceptResponse = response.json();
        assert_eq!(accepted.priority.status, PriorityStatus::Accepted);
        assert_eq!(accepted.priority.priority_name.as_deref(), Some("proj_a_prio"));
        assert_eq!(accepted.priority.status_updated_by.as_deref(), Some("boss"));
        assert!(accepted.priority.expiry_job.is_some());
        assert!(accepted.scheduling_warning.is_none());
        let commands = accepted.priority.commands.unwrap();
        assert_eq!(commands.len(), 4);
        assert!(commands[0].starts_with("sacctmgr add qos proj_a_prio "));
        assert!(commands[1].starts_with("sacctmgr modify user req "));
        assert!(commands[2].starts_with("sacctmgr modify user alice "));
        assert!(commands[3].contains("| at -t "));

        let response = app
            .get(&format!("/api/v1/admin/priorities/{}/commands", created.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await;
        response.assert_status_ok();
        let body: CommandsResponse = response.json();
        assert_eq!(body.priority_name, "proj_a_prio");
        assert_eq!(body.commands, commands);
        assert!(body.script.contains("12345"));
        for command in &body.commands {
            assert!(body.script.contains(command.as_str()));
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_commands_for_pending_request_conflict(pool: PgPool) {
        let (app, admin) = setup(&pool).await;
        let created = submit(&app, "req", "1").await;

        app.get(&format!("/api/v1/admin/priorities/{}/commands", created.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_second_decision_is_rejected(pool: PgPool) {
        let (app, admin) = setup(&pool).await;
        let created = submit(&app, "req", "1").await;

        let response = app
            .post(&format!("/api/v1/admin/priorities/{}/refuse", created.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "reason": "no capacity" }))
            .await;
        response.assert_status_ok();
        let refused: PriorityResponse = response.json();
        assert_eq!(refused.status, PriorityStatus::Refused);
        assert_eq!(refused.refusal_reason.as_deref(), Some("no capacity"));

        let response = app
            .post(&format!("/api/v1/admin/priorities/{}/accept", created.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "priority_name": "proj_a_prio" }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(body["status"], "refused");
        assert_eq!(body["attempted"], "accept");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_name_conflict_is_reported(pool: PgPool) {
        let (app, admin) = setup(&pool).await;
        let first = submit(&app, "req", "1").await;
        let second = submit(&app, "req", "2").await;

        for (id, expected) in [(first.id, StatusCode::OK), (second.id, StatusCode::CONFLICT)] {
            app.post(&format!("/api/v1/admin/priorities/{id}/accept"))
                .add_header(&admin[0].0, &admin[0].1)
                .add_header(&admin[1].0, &admin[1].1)
                .json(&json!({ "priority_name": "shared" }))
                .await
                .assert_status(expected);
        }

        let response = app
            .post(&format!("/api/v1/admin/priorities/{}/accept", second.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "priority_name": "-bad" }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_rename_usernames_and_messages(pool: PgPool) {
        let (app, admin) = setup(&pool).await;
        let created = submit(&app, "req", "1").await;
        let base = format!("/api/v1/admin/priorities/{}", created.id);

        app.post(&format!("{base}/accept"))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "priority_name": "old_name" }))
            .await
            .assert_status_ok();

        let renamed: PriorityResponse = app
            .post(&format!("{base}/rename"))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "priority_name": "new_name" }))
            .await
            .json();
        assert_eq!(renamed.priority_name.as_deref(), Some("new_name"));
        assert!(renamed.commands.unwrap()[0].contains("add qos new_name "));

        let updated: PriorityResponse = app
            .post(&format!("{base}/usernames"))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "username": "bob" }))
            .await
            .json();
        assert_eq!(updated.additional_usernames, vec!["alice", "bob"]);

        let response = app
            .delete(&format!("{base}/usernames/alice"))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await;
        response.assert_status_ok();
        let updated: PriorityResponse = response.json();
        assert_eq!(updated.additional_usernames, vec!["bob"]);
        let commands = updated.commands.unwrap();
        assert!(commands[1].starts_with("sacctmgr modify user req "));
        assert!(commands[2].starts_with("sacctmgr modify user bob "));

        app.delete(&format!("{base}/usernames/nobody"))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let response = app
            .post(&format!("{base}/messages"))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "text": "QOS is live" }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let updated: PriorityResponse = response.json();
        let last = updated.messages.last().unwrap();
        assert_eq!(last.author, "boss");
        assert_eq!(last.text, "QOS is live");

        app.post(&format!("{base}/messages"))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "text": "   " }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_archive_list_and_delete(pool: PgPool) {
        let (app, admin) = setup(&pool).await;
        let first = submit(&app, "req", "1").await;
        submit(&app, "other", "2").await;

        let page: PaginatedResponse<PriorityResponse> = app
            .get("/api/v1/admin/priorities")
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .json();
        assert_eq!(page.total_count, 2);

        let page: PaginatedResponse<PriorityResponse> = app
            .get("/api/v1/admin/priorities?requester=other")
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .json();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.data[0].requester, "other");

        let archived: PriorityResponse = app
            .patch(&format!("/api/v1/admin/priorities/{}/archived", first.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .json(&json!({ "archived": true }))
            .await
            .json();
        assert!(archived.archived);

        let page: PaginatedResponse<PriorityResponse> = app
            .get("/api/v1/admin/priorities")
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .json();
        assert_eq!(page.total_count, 1);

        let page: PaginatedResponse<PriorityResponse> = app
            .get("/api/v1/admin/priorities?show_archived=true")
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .json();
        assert_eq!(page.total_count, 2);

        app.delete(&format!("/api/v1/admin/priorities/{}", first.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .assert_status(StatusCode::NO_CONTENT);

        app.delete(&format!("/api/v1/admin/priorities/{}", first.id))
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}

use crate::api::models::pagination::PaginatedResponse;
use crate::api::models::priorities::{ListPrioritiesQuery, PriorityCreate, PriorityResponse};
use crate::api::models::users::CurrentUser;
use crate::errors::{Error, Result};
use crate::lifecycle::{ListQuery, NewPriorityRequest};
use crate::types::{Operation, Permission, PriorityId, Resource};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

#[utoipa::path(
    post,
    path = "/v1/priorities",
    tag = "priorities",
    summary = "Submit a priority request",
    description = "Submit a new GPU priority request. Every failed rule is reported at once.",
    request_body = PriorityCreate,
    responses(
        (status = 201, description = "Request submitted and pending review", body = PriorityResponse),
        (status = 400, description = "One or more fields are invalid"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "A request for this Bugzilla ticket already exists"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(requester = %current_user.username))]
pub async fn create_priority(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(body): Json<PriorityCreate>,
) -> Result<(StatusCode, Json<PriorityResponse>)> {
    let created = state
        .lifecycle
        .create(NewPriorityRequest {
            requester: current_user.username,
            requester_email: current_user.email,
            bugzilla_ticket: body.bugzilla_ticket,
            gpu_type: body.gpu_type,
            gpu_count: body.gpu_count,
            duration_days: body.duration_days,
            slurm_project: body.slurm_project,
            reason: body.reason,
            additional_usernames: body.additional_usernames,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    get,
    path = "/v1/priorities",
    tag = "priorities",
    summary = "List own priority requests",
    description = "Requests submitted by the current user, newest first.",
    params(ListPrioritiesQuery),
    responses(
        (status = 200, description = "Paginated list of the caller's requests", body = PaginatedResponse<PriorityResponse>),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(requester = %current_user.username))]
pub async fn list_own_priorities(
    State(state): State<AppState>,
    Query(query): Query<ListPrioritiesQuery>,
    current_user: CurrentUser,
) -> Result<Json<PaginatedResponse<PriorityResponse>>> {
    let (skip, limit) = query.pagination.params();
    let (requests, total) = state
        .lifecycle
        .list(ListQuery {
            requester: Some(current_user.username),
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
    get,
    path = "/v1/priorities/{id}",
    tag = "priorities",
    summary = "Get a priority request",
    description = "Visible to the requester and to administrators.",
    params(("id" = uuid::Uuid, Path, description = "Priority request ID")),
    responses(
        (status = 200, description = "The request with its messages", body = PriorityResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "The request belongs to someone else"),
        (status = 404, description = "Priority request not found"),
        (status = 500, description = "Internal server error")
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all, fields(id = %id))]
pub async fn get_priority(
    State(state): State<AppState>,
    Path(id): Path<PriorityId>,
    current_user: CurrentUser,
) -> Result<Json<PriorityResponse>> {
    let request = state.lifecycle.get(id).await?;

    if request.requester != current_user.username && !current_user.is_admin {
        return Err(Error::InsufficientPermissions {
            required: Permission::Allow(Resource::Priorities, Operation::ReadAll),
            action: Operation::ReadOwn,
            resource: format!("priority request {id}"),
        });
    }

    Ok(Json(request.into()))
}

#[cfg(test)]
mod tests {
    use crate::api::models::pagination::PaginatedResponse;
    use crate::api::models::priorities::PriorityResponse;
    use crate::lifecycle::state::PriorityStatus;
    use crate::test_utils::{add_auth_headers, create_test_admin, create_test_app};
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use sqlx::PgPool;

    fn submission(ticket: &str) -> Value {
        json!({
            "bugzilla_ticket": ticket,
            "gpu_type": "v100",
            "gpu_count": 2,
            "duration_days": 7,
            "slurm_project": "proj_a",
            "reason": "thesis deadline",
        })
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_priority(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let headers = add_auth_headers("req");

        let response = app
            .post("/api/v1/priorities")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&submission("12345"))
            .await;

        response.assert_status(StatusCode::CREATED);
        let created: PriorityResponse = response.json();
        assert_eq!(created.requester, "req");
        assert_eq!(created.requester_email, "req@example.com");
        assert_eq!(created.status, PriorityStatus::Pending);
        assert!(created.priority_name.is_none());
        assert!(created.commands.is_none());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_priority_requires_authentication(pool: PgPool) {
        let app = create_test_app(pool.clone());

        let response = app.post("/api/v1/priorities").json(&submission("1")).await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_create_priority_reports_every_violation(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let headers = add_auth_headers("req");

        let response = app
            .post("/api/v1/priorities")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .json(&json!({
                "bugzilla_ticket": "abc",
                "gpu_type": "v100",
                "gpu_count": 0,
                "duration_days": 30,
                "slurm_project": "proj_a",
                "reason": "deadline",
            }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        let fields: Vec<&str> = body["violations"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["bugzilla_ticket", "duration_days", "gpu_count"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_duplicate_ticket_conflicts(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let headers = add_auth_headers("req");

        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            app.post("/api/v1/priorities")
                .add_header(&headers[0].0, &headers[0].1)
                .add_header(&headers[1].0, &headers[1].1)
                .json(&submission("777"))
                .await
                .assert_status(expected);
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_only_returns_own_requests(pool: PgPool) {
        let app = create_test_app(pool.clone());
        let alice = add_auth_headers("alice");
        let bob = add_auth_headers("bob");

        for (headers, ticket) in [(&alice, "1"), (&alice, "2"), (&bob, "3")] {
            app.post("/api/v1/priorities")
                .add_header(&headers[0].0, &headers[0].1)
                .add_header(&headers[1].0, &headers[1].1)
                .json(&submission(ticket))
                .await
                .assert_status(StatusCode::CREATED);
        }

        let response = app
            .get("/api/v1/priorities?requester=bob")
            .add_header(&alice[0].0, &alice[0].1)
            .add_header(&alice[1].0, &alice[1].1)
            .await;
        response.assert_status_ok();
        let page: PaginatedResponse<PriorityResponse> = response.json();
        assert_eq!(page.total_count, 2);
        assert!(page.data.iter().all(|p| p.requester == "alice"));
        // newest first
        assert_eq!(page.data[0].bugzilla_ticket, "2");

        let response = app
            .get("/api/v1/priorities?limit=1&skip=1")
            .add_header(&alice[0].0, &alice[0].1)
            .add_header(&alice[1].0, &alice[1].1)
            .await;
        let page: PaginatedResponse<PriorityResponse> = response.json();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].bugzilla_ticket, "1");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_get_priority_visibility(pool: PgPool) {
        let app = create_test_app(pool.clone());
        create_test_admin(&pool, "boss").await;
        let owner = add_auth_headers("owner");
        let other = add_auth_headers("other");
        let admin = add_auth_headers("boss");

        let created: PriorityResponse = app
            .post("/api/v1/priorities")
            .add_header(&owner[0].0, &owner[0].1)
            .add_header(&owner[1].0, &owner[1].1)
            .json(&submission("900"))
            .await
            .json();
        let path = format!("/api/v1/priorities/{}", created.id);

        app.get(&path)
            .add_header(&owner[0].0, &owner[0].1)
            .add_header(&owner[1].0, &owner[1].1)
            .await
            .assert_status_ok();
        app.get(&path)
            .add_header(&admin[0].0, &admin[0].1)
            .add_header(&admin[1].0, &admin[1].1)
            .await
            .assert_status_ok();
        app.get(&path)
            .add_header(&other[0].0, &other[0].1)
            .add_header(&other[1].0, &other[1].1)
            .await
            .assert_status(StatusCode::FORBIDDEN);

        app.get(&format!("/api/v1/priorities/{}", uuid::Uuid::new_v4()))
            .add_header(&owner[0].0, &owner[0].1)
            .add_header(&owner[1].0, &owner[1].1)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}

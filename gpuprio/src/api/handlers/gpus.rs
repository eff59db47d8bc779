use crate::api::models::gpus::{AvailableGpus, GpuCatalogResponse};
use crate::api::models::users::CurrentUser;
use crate::errors::Result;
use crate::AppState;
use axum::{
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::BTreeMap;

/// Set to `unavailable` on `/available-gpus` responses when the probe did not answer.
pub const PROBE_STATUS_HEADER: &str = "x-gpu-probe";

#[utoipa::path(
    get,
    path = "/available-gpus",
    tag = "gpus",
    summary = "Free GPUs per model",
    description = "Maps each GPU model to its free count as reported by the cluster probe. When the probe is \
                   unavailable the map is empty and the `x-gpu-probe: unavailable` header is set.",
    responses(
        (status = 200, description = "Free GPUs per model", body = BTreeMap<String, u32>,
            headers(("x-gpu-probe" = String, description = "`unavailable` when the probe did not answer"))),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn available_gpus(State(state): State<AppState>, _user: CurrentUser) -> Result<Response> {
    let catalog = state.lifecycle.gpu_catalog().await;

    let Some(gpus) = catalog.snapshot else {
        let mut response = Json(AvailableGpus::new()).into_response();
        response
            .headers_mut()
            .insert(PROBE_STATUS_HEADER, HeaderValue::from_static("unavailable"));
        return Ok(response);
    };

    Ok(Json(gpus).into_response())
}

#[utoipa::path(
    get,
    path = "/v1/gpu-catalog",
    tag = "gpus",
    summary = "GPU types and availability",
    description = "The GPU types a request may ask for, together with the probe's free counts. When the probe is \
                   unavailable the counts are empty and `probe_available` is false; requests are then accepted \
                   without an availability check.",
    responses(
        (status = 200, description = "Current availability and the GPU types that may be requested", body = GpuCatalogResponse),
        (status = 401, description = "Unauthorized"),
    ),
    security(("X-Gpuprio-User" = []))
)]
#[tracing::instrument(skip_all)]
pub async fn gpu_catalog(State(state): State<AppState>, _user: CurrentUser) -> Result<Json<GpuCatalogResponse>> {
    let catalog = state.lifecycle.gpu_catalog().await;

    Ok(Json(GpuCatalogResponse {
        probe_available: catalog.snapshot.is_some(),
        gpus: catalog.snapshot.unwrap_or_default(),
        gpu_types: catalog.gpu_types,
    }))
}

#[cfg(test)]
mod tests {
    use super::PROBE_STATUS_HEADER;
    use crate::api::models::gpus::{AvailableGpus, GpuCatalogResponse};
    use crate::expiry::dummy::DummyScheduler;
    use crate::lifecycle::PriorityLifecycle;
    use crate::probe::StaticProbe;
    use crate::test_utils::{add_auth_headers, create_test_app, create_test_app_state, RecordingNotifier};
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use sqlx::PgPool;
    use std::sync::Arc;

    fn app_without_probe(pool: PgPool) -> TestServer {
        let mut state = create_test_app_state(pool.clone());
        let lifecycle = PriorityLifecycle::builder()
            .db(pool)
            .policy(state.config.policy.clone())
            .probe(Arc::new(StaticProbe::unavailable()))
            .scheduler(Arc::new(DummyScheduler::default()))
            .notifier(Arc::new(RecordingNotifier::default()))
            .admin_email(state.config.notifications.admin_email.clone())
            .build();
        state.lifecycle = Arc::new(lifecycle);
        let router = crate::build_router(&state).expect("Failed to build router");
        TestServer::new(router.into_make_service()).expect("Failed to create test server")
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_available_gpus(pool: PgPool) {
        let app = create_test_app(pool);
        let headers = add_auth_headers("req");

        let response = app
            .get("/api/available-gpus")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;

        response.assert_status_ok();
        assert!(response.maybe_header(PROBE_STATUS_HEADER).is_none());
        let body: AvailableGpus = response.json();
        assert_eq!(body.len(), 3);
        assert_eq!(body.get("v100"), Some(&8));
        assert_eq!(body.get("h100"), Some(&4));
        assert_eq!(body.get("rtx3090"), Some(&2));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_available_gpus_without_probe(pool: PgPool) {
        let app = app_without_probe(pool);
        let headers = add_auth_headers("req");

        let response = app
            .get("/api/available-gpus")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;

        response.assert_status_ok();
        assert_eq!(response.header(PROBE_STATUS_HEADER), "unavailable");
        let body: AvailableGpus = response.json();
        assert!(body.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_gpu_catalog(pool: PgPool) {
        let app = create_test_app(pool);
        let headers = add_auth_headers("req");

        let response = app
            .get("/api/v1/gpu-catalog")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;

        response.assert_status_ok();
        let body: GpuCatalogResponse = response.json();
        assert!(body.probe_available);
        assert_eq!(body.gpus.get("v100"), Some(&8));
        for gpu_type in ["rtx3090", "v100", "h100"] {
            assert!(body.gpu_types.iter().any(|t| t == gpu_type));
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_gpu_catalog_without_probe(pool: PgPool) {
        let app = app_without_probe(pool);
        let headers = add_auth_headers("req");

        let response = app
            .get("/api/v1/gpu-catalog")
            .add_header(&headers[0].0, &headers[0].1)
            .add_header(&headers[1].0, &headers[1].1)
            .await;

        response.assert_status_ok();
        let body: GpuCatalogResponse = response.json();
        assert!(!body.probe_available);
        assert!(body.gpus.is_empty());
        assert_eq!(body.gpu_types, vec!["rtx3090", "v100", "h100"]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_available_gpus_requires_authentication(pool: PgPool) {
        let app = create_test_app(pool);
        app.get("/api/available-gpus").await.assert_status(StatusCode::UNAUTHORIZED);
        app.get("/api/v1/gpu-catalog").await.assert_status(StatusCode::UNAUTHORIZED);
    }
}

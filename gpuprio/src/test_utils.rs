//! Test utilities shared by the unit and integration tests.

use crate::auth::roles::DbRoleChecker;
use crate::config::{Config, EmailTransportConfig, ExpiryConfig, NotificationsConfig, PoolSettings};
use crate::db::handlers::AdminUsers;
use crate::db::models::admin_users::AdminUser;
use crate::expiry::dummy::DummyScheduler;
use crate::lifecycle::PriorityLifecycle;
use crate::notifications::{NotificationEvent, Notifier};
use crate::probe::{GpuSnapshot, StaticProbe};
use crate::AppState;
use axum_test::TestServer;
use sqlx::PgPool;
use std::sync::{Arc, Mutex};

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("gpuprio-test-emails-{}", std::process::id()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        dashboard_url: "http://localhost:3001".to_string(),
        expiry: ExpiryConfig::Dummy,
        notifications: NotificationsConfig {
            enabled: false,
            admin_email: "admin@example.com".to_string(),
        },
        ..Default::default()
    };
    config.database.pool = PoolSettings {
        max_connections: 2,
        min_connections: 0,
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    config
}

/// Free GPUs reported by the probe in tests.
pub fn test_snapshot() -> GpuSnapshot {
    GpuSnapshot::from([("rtx3090".to_string(), 2), ("v100".to_string(), 8), ("h100".to_string(), 4)])
}

/// Keeps every dispatched event for inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().expect("notifier lock poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, event: NotificationEvent) {
        self.events.lock().expect("notifier lock poisoned").push(event);
    }
}

/// Application state with a fixed probe snapshot, an in-memory scheduler and a
/// recording notifier.
pub fn create_test_app_state(pool: PgPool) -> AppState {
    let config = create_test_config();

    let lifecycle = PriorityLifecycle::builder()
        .db(pool.clone())
        .policy(config.policy.clone())
        .probe(Arc::new(StaticProbe::new(test_snapshot())))
        .scheduler(Arc::new(DummyScheduler::default()))
        .notifier(Arc::new(RecordingNotifier::default()))
        .admin_email(config.notifications.admin_email.clone())
        .build();

    AppState::builder()
        .db(pool.clone())
        .config(config)
        .lifecycle(Arc::new(lifecycle))
        .roles(Arc::new(DbRoleChecker::new(pool)))
        .build()
}

pub fn create_test_app(pool: PgPool) -> TestServer {
    let state = create_test_app_state(pool);
    let router = crate::build_router(&state).expect("Failed to build router");
    TestServer::new(router.into_make_service()).expect("Failed to create test server")
}

pub async fn create_test_admin(pool: &PgPool, username: &str) -> AdminUser {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    AdminUsers::new(&mut conn)
        .add(username, &format!("{username}@example.com"))
        .await
        .expect("Failed to create test admin")
}

/// Headers the identity proxy would set for `username`.
pub fn add_auth_headers(username: &str) -> Vec<(String, String)> {
    vec![
        ("x-gpuprio-user".to_string(), username.to_string()),
        ("x-gpuprio-email".to_string(), format!("{username}@example.com")),
    ]
}

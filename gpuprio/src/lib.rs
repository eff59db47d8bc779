//! # gpuprio: GPU priority requests for a shared SLURM cluster
//!
//! Cluster users ask for temporary priority on a number of GPUs of one type for a
//! bounded number of days. Administrators review each request and either refuse
//! it or accept it under a QOS name. Acceptance produces the `sacctmgr` commands
//! that create the QOS and attach it to the users, and schedules the removal of
//! the QOS when the validity window ends.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); all state lives in
//! PostgreSQL. Identity comes from headers set by an authenticating reverse proxy
//! (see [`auth`]).
//!
//! Every state change goes through [`lifecycle::PriorityLifecycle`], which owns the
//! transaction boundaries and talks to three pluggable collaborators:
//!
//! - an [`probe::AvailabilityProbe`] that reports free GPUs per model,
//! - an [`expiry::ExpiryScheduler`] that arranges the QOS removal,
//! - a [`notifications::Notifier`] that emails requesters and administrators.
//!
//! [`slurm`] turns an accepted request into cluster commands. It is pure and its
//! output is a compatibility contract with the cluster tooling.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use gpuprio::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = gpuprio::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     gpuprio::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! Migrations run on startup:
//!
//! ```no_run
//! # use sqlx::PgPool;
//! # async fn example(pool: PgPool) -> Result<(), sqlx::migrate::MigrateError> {
//! gpuprio::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
mod email;
pub mod errors;
pub mod expiry;
pub mod lifecycle;
pub mod notifications;
mod openapi;
pub mod probe;
pub mod slurm;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use crate::auth::roles::{DbRoleChecker, RoleChecker, bootstrap_admins};
use crate::config::{AdminCommand, CorsOrigin, PoolSettings};
use crate::db::handlers::AdminUsers;
use crate::email::EmailService;
use crate::expiry::create_scheduler;
use crate::lifecycle::PriorityLifecycle;
use crate::notifications::{EmailNotifier, LogNotifier, Notifier};
use crate::openapi::ApiDoc;
use crate::probe::create_probe;
use axum::http::{self, HeaderValue, StatusCode};
use axum::{
    Router,
    extract::State,
    routing::{delete, get, patch, post},
};
use bon::Builder;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
pub use types::{PriorityId, UserId};

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .lifecycle(Arc::new(lifecycle))
///     .roles(Arc::new(DbRoleChecker::new(pool.clone())))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub lifecycle: Arc<PriorityLifecycle>,
    pub roles: Arc<dyn RoleChecker>,
}

/// Get the gpuprio database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open a connection pool with the configured limits.
pub async fn connect(url: &str, settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(settings.max_lifetime_secs))
        .connect(url)
        .await
}

/// Connect, migrate and make sure the bootstrap administrators exist.
#[instrument(skip_all)]
async fn setup_database(config: &Config, pool: Option<PgPool>) -> anyhow::Result<PgPool> {
    let pool = match pool {
        Some(pool) => pool,
        None => connect(&config.database.url, &config.database.pool).await?,
    };
    migrator().run(&pool).await?;

    bootstrap_admins(&pool, &config.bootstrap_admins)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create bootstrap administrators: {}", e))?;

    Ok(pool)
}

/// Wire the lifecycle engine to the configured probe, scheduler and notifier.
pub fn build_lifecycle(config: &Config, pool: PgPool) -> anyhow::Result<PriorityLifecycle> {
    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        let email = EmailService::new(config)?;
        Arc::new(EmailNotifier::new(Arc::new(email)))
    } else {
        info!("Notifications disabled; events will only be logged");
        Arc::new(LogNotifier)
    };

    Ok(PriorityLifecycle::builder()
        .db(pool)
        .policy(config.policy.clone())
        .probe(Arc::from(create_probe(&config.probe)))
        .scheduler(Arc::from(create_scheduler(&config.expiry)))
        .notifier(notifier)
        .admin_email(config.notifications.admin_email.clone())
        .build())
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([http::Method::GET, http::Method::POST, http::Method::PATCH, http::Method::DELETE])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(config.auth.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = config.auth.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Liveness plus a database round trip.
async fn healthz(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => Ok("OK"),
        Err(e) => {
            warn!(error = %e, "Health check could not reach the database");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// Build the application router with all endpoints and middleware.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let admin_routes = Router::new()
        .route("/priorities", get(api::handlers::admin::list_priorities))
        .route("/priorities/{id}", delete(api::handlers::admin::delete_priority))
        .route("/priorities/{id}/accept", post(api::handlers::admin::accept_priority))
        .route("/priorities/{id}/refuse", post(api::handlers::admin::refuse_priority))
        .route("/priorities/{id}/rename", post(api::handlers::admin::rename_priority))
        .route("/priorities/{id}/usernames", post(api::handlers::admin::add_username))
        .route("/priorities/{id}/usernames/{username}", delete(api::handlers::admin::remove_username))
        .route("/priorities/{id}/messages", post(api::handlers::admin::add_message))
        .route("/priorities/{id}/archived", patch(api::handlers::admin::set_archived))
        .route("/priorities/{id}/commands", get(api::handlers::admin::get_commands));

    let api_routes = Router::new()
        .route("/me", get(api::handlers::users::get_current_user))
        .route("/gpu-catalog", get(api::handlers::gpus::gpu_catalog))
        .route(
            "/priorities",
            post(api::handlers::priorities::create_priority).get(api::handlers::priorities::list_own_priorities),
        )
        .route("/priorities/{id}", get(api::handlers::priorities::get_priority))
        .nest("/admin", admin_routes);

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/available-gpus", get(api::handlers::gpus::available_gpus))
        .nest("/api/v1", api_routes)
        .with_state(state.clone())
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()));

    let cors_layer = create_cors_layer(&state.config)?;

    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The HTTP application and the resources it owns.
///
/// 1. **Initialize**: [`Application::new`] connects to the database, runs
///    migrations, creates bootstrap administrators and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests
/// 3. **Shutdown**: on the shutdown signal, connections are closed and pending
///    spans are flushed
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        Self::new_with_pool(config, None).await
    }

    /// Like [`Application::new`], reusing an existing pool when one is given
    pub async fn new_with_pool(config: Config, pool: Option<PgPool>) -> anyhow::Result<Self> {
        debug!("Starting gpuprio with configuration: {:#?}", config);
        config.validate()?;

        let pool = setup_database(&config, pool).await?;
        let lifecycle = build_lifecycle(&config, pool.clone())?;

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .lifecycle(Arc::new(lifecycle))
            .roles(Arc::new(DbRoleChecker::new(pool.clone())))
            .build();

        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("gpuprio listening on http://{}, available at {}", bind_addr, self.config.dashboard_url);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

/// Run one `admins` subcommand against the configured database.
pub async fn run_admin_command(config: &Config, action: AdminCommand) -> anyhow::Result<()> {
    let pool = connect(&config.database.url, &config.database.pool).await?;
    migrator().run(&pool).await?;
    let mut conn = pool.acquire().await?;
    let mut repo = AdminUsers::new(&mut conn);

    match action {
        AdminCommand::Add { username, email } => {
            lifecycle::validation::check_username(&username).map_err(|reason| anyhow::anyhow!("Invalid username: {reason}"))?;
            let admin = repo.add(&username, &email).await?;
            println!("Added administrator {} <{}>", admin.username, admin.email);
        }
        AdminCommand::Remove { username } => {
            if repo.remove(&username).await? {
                println!("Removed administrator {username}");
            } else {
                anyhow::bail!("{username} is not an administrator");
            }
        }
        AdminCommand::List => {
            let admins = repo.list().await?;
            if admins.is_empty() {
                println!("No administrators configured");
            }
            for admin in admins {
                println!("{}\t{}\t{}", admin.username, admin.email, admin.created_at.format("%Y-%m-%d %H:%M"));
            }
        }
    }

    drop(conn);
    pool.close().await;
    Ok(())
}

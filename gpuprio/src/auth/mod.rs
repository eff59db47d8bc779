//! Authentication and authorization.
//!
//! Authentication is delegated to a reverse proxy that performs the OIDC
//! handshake and forwards the user's identity in trusted headers (see
//! [`crate::config::ProxyHeaderAuthConfig`]). Users are created on first sight.
//!
//! Authorization has two levels: any authenticated user may submit requests and
//! read their own, and administrators (see [`roles`]) may read and act on all
//! of them.
//!
//! # Modules
//!
//! - [`current_user`]: Extractors for the authenticated user in handlers
//! - [`roles`]: Administrator role checks and bootstrap
//!
//! # Usage in Handlers
//!
//! ```ignore
//! async fn list_all(admin: AdminUser, State(state): State<AppState>) -> Result<Json<...>> {
//!     tracing::info!(admin = %admin.0.username, "listing every request");
//!     ...
//! }
//! ```

pub mod current_user;
pub mod roles;

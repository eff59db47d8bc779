use crate::{
    AppState,
    api::models::users::CurrentUser,
    config::ProxyHeaderAuthConfig,
    db::{errors::DbError, handlers::Users, models::users::UserCreateDBRequest},
    errors::{Error, Result},
    lifecycle::validation::check_username,
    types::{Operation, Permission},
};
use axum::{extract::FromRequestParts, http::request::Parts};
use sqlx::PgPool;
use tracing::{debug, instrument, trace};

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the user named by the proxy headers, creating or refreshing their row.
/// Returns:
/// - None: No username header present
/// - Some(Ok(user)): User found or created (`is_admin` is filled in by the caller)
/// - Some(Err(error)): Header present but unusable, or the lookup failed
#[instrument(skip(parts, config, db))]
async fn try_proxy_header_auth(parts: &Parts, config: &ProxyHeaderAuthConfig, db: &PgPool) -> Option<Result<CurrentUser>> {
    let username = header_value(parts, &config.header_name)?;

    if let Err(reason) = check_username(username) {
        return Some(Err(Error::Unauthenticated {
            message: Some(format!("Invalid username from identity provider: {reason}")),
        }));
    }

    let header_email = header_value(parts, &config.email_header_name);
    let display_name = header_value(parts, &config.display_name_header_name);

    let mut tx = match db.begin().await {
        Ok(tx) => tx,
        Err(e) => return Some(Err(DbError::from(e).into())),
    };
    let mut user_repo = Users::new(&mut tx);

    let user = match user_repo.get_by_username(username).await {
        Ok(Some(existing)) => match header_email {
            // keep the stored profile in step with the identity provider
            Some(email) if email != existing.email || (display_name.is_some() && display_name != existing.display_name.as_deref()) => {
                match user_repo.update_profile(username, email, display_name).await {
                    Ok(updated) => updated,
                    Err(e) => return Some(Err(e.into())),
                }
            }
            _ => existing,
        },
        Ok(None) => {
            if !config.auto_create_users {
                return Some(Err(Error::Unauthenticated {
                    message: Some(format!("User '{username}' is not registered")),
                }));
            }

            let email = match (header_email, &config.default_email_domain) {
                (Some(email), _) => email.to_string(),
                (None, Some(domain)) => format!("{username}@{domain}"),
                (None, None) => {
                    return Some(Err(Error::Unauthenticated {
                        message: Some("No email address provided by the identity provider".to_string()),
                    }));
                }
            };

            let create_request = UserCreateDBRequest {
                username: username.to_string(),
                email,
                display_name: display_name.map(str::to_string),
                auth_source: "proxy-header".to_string(),
            };
            match user_repo.create(&create_request).await {
                Ok(created) => {
                    debug!(username = %created.username, "Auto-created user from proxy headers");
                    created
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
        Err(e) => return Some(Err(e.into())),
    };

    if let Err(e) = tx.commit().await {
        return Some(Err(DbError::from(e).into()));
    }

    Some(Ok(CurrentUser {
        id: user.id,
        username: user.username,
        email: user.email,
        display_name: user.display_name,
        is_admin: false,
    }))
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match try_proxy_header_auth(parts, &state.config.auth.proxy_header, &state.db).await {
            Some(Ok(mut user)) => {
                user.is_admin = state.roles.is_admin(&user.username).await?;
                debug!(username = %user.username, is_admin = user.is_admin, "Authenticated user from proxy headers");
                Ok(user)
            }
            Some(Err(e)) => {
                trace!("Proxy header authentication failed: {:?}", e);
                Err(e)
            }
            None => {
                trace!("No authentication credentials found in request");
                Err(Error::Unauthenticated { message: None })
            }
        }
    }
}

/// Extractor that only succeeds for administrators.
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        require_admin(user).map(AdminUser)
    }
}

/// Reject non-administrators.
pub fn require_admin(user: CurrentUser) -> Result<CurrentUser> {
    if user.is_admin {
        Ok(user)
    } else {
        Err(Error::InsufficientPermissions {
            required: Permission::Admin,
            action: Operation::UpdateAll,
            resource: "priority requests".to_string(),
        })
    }
}

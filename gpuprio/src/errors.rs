use crate::db::errors::{ACTIVE_NAME_CONSTRAINT, BUGZILLA_TICKET_CONSTRAINT, DbError};
use crate::lifecycle::state::{PriorityStatus, Transition};
use crate::lifecycle::validation::Violation;
use crate::types::{Operation, Permission};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// User lacks required permissions for the operation
    #[error("Insufficient permissions to {action:?} {resource}")]
    InsufficientPermissions {
        required: Permission,
        action: Operation,
        resource: String,
    },

    /// One or more input rules failed; every violation is listed
    #[error("Validation failed: {}", format_violations(.violations))]
    Validation { violations: Vec<Violation> },

    /// The request is not in a state that allows the action
    #[error("Cannot {attempted} a {from} priority request")]
    InvalidTransition { from: PriorityStatus, attempted: Transition },

    /// Priority name already claimed by another accepted request
    #[error("Priority name '{name}' is already in use")]
    NameConflict { name: String },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Database operation error
    #[error(transparent)]
    Database(#[from] DbError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Conflict error, e.g., for unique constraint violations
    #[error("Conflict: {message}")]
    Conflict { message: String },
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Single-violation shorthand
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            violations: vec![Violation::new(field, message)],
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::InsufficientPermissions { .. } => StatusCode::FORBIDDEN,
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            Error::NameConflict { .. } => StatusCode::CONFLICT,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(db_err) => match db_err {
                DbError::NotFound => StatusCode::NOT_FOUND,
                DbError::UniqueViolation { .. } => StatusCode::CONFLICT,
                DbError::ForeignKeyViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::CheckViolation { .. } => StatusCode::BAD_REQUEST,
                DbError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Conflict { .. } => StatusCode::CONFLICT,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::InsufficientPermissions { action, resource, .. } => {
                format!("Insufficient permissions to {action} {resource}")
            }
            Error::Validation { .. } => "Validation failed".to_string(),
            Error::InvalidTransition { from, attempted } => {
                format!("Cannot {attempted} a priority request that is {from}")
            }
            Error::NameConflict { name } => format!("Priority name '{name}' is already in use"),
            Error::BadRequest { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Database(db_err) => match db_err {
                DbError::NotFound => "Resource not found".to_string(),
                DbError::UniqueViolation { constraint, .. } => match constraint.as_deref() {
                    Some(BUGZILLA_TICKET_CONSTRAINT) => "A priority request for this Bugzilla ticket already exists".to_string(),
                    Some(ACTIVE_NAME_CONSTRAINT) => "This priority name is already in use".to_string(),
                    Some("admin_users_pkey") => "This user is already an administrator".to_string(),
                    Some(c) if c.contains("username") => "This username is already taken".to_string(),
                    _ => "Resource already exists".to_string(),
                },
                DbError::ForeignKeyViolation { .. } => "Invalid reference to related resource".to_string(),
                DbError::CheckViolation { .. } => "Invalid data provided".to_string(),
                DbError::Other(_) => "Database error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            Error::Conflict { message } => message.clone(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Database(DbError::Other(_)) | Error::Internal { .. } | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Database(_) => {
                tracing::warn!("Database constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::InsufficientPermissions { .. } => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::Validation { .. } | Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
            Error::InvalidTransition { .. } | Error::NameConflict { .. } | Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
        }

        let status = self.status_code();

        match &self {
            Error::Validation { violations } => {
                let body = json!({
                    "message": self.user_message(),
                    "violations": violations,
                });
                (status, axum::response::Json(body)).into_response()
            }
            Error::InvalidTransition { from, attempted } => {
                let body = json!({
                    "message": self.user_message(),
                    "status": from,
                    "attempted": attempted,
                });
                (status, axum::response::Json(body)).into_response()
            }
            Error::NameConflict { name } => {
                let body = json!({
                    "message": self.user_message(),
                    "priority_name": name,
                });
                (status, axum::response::Json(body)).into_response()
            }
            Error::Database(DbError::UniqueViolation { constraint, .. }) => {
                let resource = match constraint.as_deref() {
                    Some(BUGZILLA_TICKET_CONSTRAINT) | Some(ACTIVE_NAME_CONSTRAINT) => "priority",
                    Some("admin_users_pkey") => "admin",
                    _ => "unknown",
                };
                let body = json!({
                    "message": self.user_message(),
                    "resource": resource,
                });
                (status, axum::response::Json(body)).into_response()
            }
            _ => {
                // For all other errors, return simple text message
                let user_message = self.user_message();
                (status, user_message).into_response()
            }
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

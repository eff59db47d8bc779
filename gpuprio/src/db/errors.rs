use thiserror::Error;

/// Unified error type for database operations that application code can handle
#[derive(Error, Debug)]
pub enum DbError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
        /// The conflicting value that caused the violation (if extractable)
        conflicting_value: Option<String>,
    },

    /// Foreign key constraint violation
    #[error("Foreign key constraint violation")]
    ForeignKeyViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Check constraint violation
    #[error("Check constraint violation")]
    CheckViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Unique index guarding active priority names
pub const ACTIVE_NAME_CONSTRAINT: &str = "priorities_active_name_unique";

/// Unique constraint on Bugzilla tickets
pub const BUGZILLA_TICKET_CONSTRAINT: &str = "uq_priorities_bugzilla_ticket";

impl DbError {
    /// True if this is a unique violation of the named constraint
    pub fn is_unique_violation_of(&self, name: &str) -> bool {
        matches!(self, DbError::UniqueViolation { constraint: Some(c), .. } if c == name)
    }
}

/// Convert from sqlx::Error using proper sqlx error categorization
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let constraint = db_err.constraint().map(|s| s.to_string());

                    let conflicting_value = db_err
                        .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                        .and_then(|pg_err| pg_err.detail())
                        .and_then(extract_conflicting_value);

                    DbError::UniqueViolation {
                        constraint,
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                        conflicting_value,
                    }
                } else if db_err.is_foreign_key_violation() {
                    DbError::ForeignKeyViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_check_violation() {
                    DbError::CheckViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else {
                    // All other database errors are non-recoverable - convert to anyhow
                    DbError::Other(anyhow::Error::from(err))
                }
            }
            // All other sqlx errors are non-recoverable - convert to anyhow with context
            _ => DbError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Extract the conflicting value from a PostgreSQL unique violation detail
///
/// PostgreSQL unique violation details look like:
/// "Key (priority_name)=(gpu-boost) already exists."
fn extract_conflicting_value(detail: &str) -> Option<String> {
    let start = detail.find("=(")?;
    let rest = &detail[start + 2..];
    let end = rest.find(')')?;
    Some(rest[..end].to_string())
}

/// Type alias for database operation results
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_conflicting_value() {
        assert_eq!(
            extract_conflicting_value("Key (priority_name)=(gpu-boost) already exists."),
            Some("gpu-boost".to_string())
        );
        assert_eq!(extract_conflicting_value("no detail here"), None);
    }

    #[test]
    fn test_is_unique_violation_of() {
        let err = DbError::UniqueViolation {
            constraint: Some(ACTIVE_NAME_CONSTRAINT.to_string()),
            table: Some("priorities".to_string()),
            message: "duplicate key".to_string(),
            conflicting_value: Some("alpha".to_string()),
        };
        assert!(err.is_unique_violation_of(ACTIVE_NAME_CONSTRAINT));
        assert!(!err.is_unique_violation_of(BUGZILLA_TICKET_CONSTRAINT));
        assert!(!DbError::NotFound.is_unique_violation_of(ACTIVE_NAME_CONSTRAINT));
    }
}

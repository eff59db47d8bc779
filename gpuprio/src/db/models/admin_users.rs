//! Database models for administrators.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AdminUser {
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

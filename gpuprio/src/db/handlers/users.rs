//! Database repository for users.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::users::{UserCreateDBRequest, UserDBResponse};

pub struct Users<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Users<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    pub async fn create(&mut self, request: &UserCreateDBRequest) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            INSERT INTO users (username, email, display_name, auth_source)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&request.username)
        .bind(&request.email)
        .bind(&request.display_name)
        .bind(&request.auth_source)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    pub async fn get_by_username(&mut self, username: &str) -> Result<Option<UserDBResponse>> {
        let user = sqlx::query_as::<_, UserDBResponse>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(user)
    }

    /// Refresh the profile fields the identity provider owns.
    #[instrument(skip(self, email, display_name), err)]
    pub async fn update_profile(&mut self, username: &str, email: &str, display_name: Option<&str>) -> Result<UserDBResponse> {
        let user = sqlx::query_as::<_, UserDBResponse>(
            r#"
            UPDATE users
            SET email = $2,
                display_name = COALESCE($3, display_name),
                updated_at = NOW()
            WHERE username = $1
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(email)
        .bind(display_name)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(user)
    }
}

//! Database repository for the administrator role store.

use sqlx::PgConnection;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::admin_users::AdminUser;

pub struct AdminUsers<'c> {
    db: &'c mut PgConnection,
}

impl<'c> AdminUsers<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Grant administrator rights; re-adding an existing admin refreshes the email.
    #[instrument(skip(self, email), err)]
    pub async fn add(&mut self, username: &str, email: &str) -> Result<AdminUser> {
        let admin = sqlx::query_as::<_, AdminUser>(
            r#"
            INSERT INTO admin_users (username, email)
            VALUES ($1, $2)
            ON CONFLICT (username) DO UPDATE SET email = EXCLUDED.email
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(admin)
    }

    /// Grant administrator rights unless already granted. Returns true if a row was created.
    #[instrument(skip(self, email), err)]
    pub async fn add_if_missing(&mut self, username: &str, email: &str) -> Result<bool> {
        let result = sqlx::query("INSERT INTO admin_users (username, email) VALUES ($1, $2) ON CONFLICT (username) DO NOTHING")
            .bind(username)
            .bind(email)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn remove(&mut self, username: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM admin_users WHERE username = $1")
            .bind(username)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    pub async fn is_admin(&mut self, username: &str) -> Result<bool> {
        let is_admin: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM admin_users WHERE username = $1)")
            .bind(username)
            .fetch_one(&mut *self.db)
            .await?;

        Ok(is_admin)
    }

    #[instrument(skip(self), err)]
    pub async fn list(&mut self) -> Result<Vec<AdminUser>> {
        let admins = sqlx::query_as::<_, AdminUser>("SELECT * FROM admin_users ORDER BY username")
            .fetch_all(&mut *self.db)
            .await?;

        Ok(admins)
    }
}

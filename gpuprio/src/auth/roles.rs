//! Administrator role checks.
//!
//! Handlers and the CLI ask a [`RoleChecker`] whether a username holds the
//! administrator role. The production checker reads the `admin_users` table;
//! tests substitute a fixed set.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::instrument;

use crate::config::BootstrapAdmin;
use crate::db::errors::Result;
use crate::db::handlers::AdminUsers;

#[async_trait]
pub trait RoleChecker: Send + Sync {
    async fn is_admin(&self, username: &str) -> Result<bool>;
}

/// Role checks backed by the `admin_users` table.
#[derive(Clone)]
pub struct DbRoleChecker {
    db: PgPool,
}

impl DbRoleChecker {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RoleChecker for DbRoleChecker {
    async fn is_admin(&self, username: &str) -> Result<bool> {
        let mut conn = self.db.acquire().await?;
        AdminUsers::new(&mut conn).is_admin(username).await
    }
}

/// A fixed set of administrators.
#[derive(Debug, Clone, Default)]
pub struct StaticRoleChecker {
    admins: HashSet<String>,
}

impl StaticRoleChecker {
    pub fn new<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admins: admins.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl RoleChecker for StaticRoleChecker {
    async fn is_admin(&self, username: &str) -> Result<bool> {
        Ok(self.admins.contains(username))
    }
}

/// Make sure every configured bootstrap administrator exists.
#[instrument(skip_all, fields(count = admins.len()), err)]
pub async fn bootstrap_admins(db: &PgPool, admins: &[BootstrapAdmin]) -> Result<()> {
    let mut tx = db.begin().await?;
    let mut repo = AdminUsers::new(&mut tx);
    for admin in admins {
        if repo.add_if_missing(&admin.username, &admin.email).await? {
            tracing::info!(username = %admin.username, "Created bootstrap administrator");
        }
    }
    tx.commit().await?;
    Ok(())
}

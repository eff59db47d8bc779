//! Database repository for priority requests and their messages.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::types::Json;
use std::collections::HashMap;
use tracing::instrument;

use crate::config::NameConflictScope;
use crate::db::errors::Result;
use crate::db::models::priorities::{
    PriorityAcceptDBRequest, PriorityCreateDBRequest, PriorityDBResponse, PriorityFilter, PriorityMessage, PriorityRequest,
};
use crate::slurm::SchedulerCommands;
use crate::types::{PriorityId, abbrev_uuid};

/// Repository for priority request operations.
pub struct Priorities<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Priorities<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(requester = %request.requester, ticket = %request.bugzilla_ticket), err)]
    pub async fn create(&mut self, request: &PriorityCreateDBRequest) -> Result<PriorityRequest> {
        let row = sqlx::query_as::<_, PriorityDBResponse>(
            r#"
            INSERT INTO priorities (
                requester, requester_email, bugzilla_ticket, gpu_type, gpu_count,
                duration_days, slurm_project, reason, additional_usernames
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&request.requester)
        .bind(&request.requester_email)
        .bind(&request.bugzilla_ticket)
        .bind(&request.gpu_type)
        .bind(request.gpu_count)
        .bind(request.duration_days)
        .bind(&request.slurm_project)
        .bind(&request.reason)
        .bind(&request.additional_usernames)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: PriorityId) -> Result<Option<PriorityRequest>> {
        let row = sqlx::query_as::<_, PriorityDBResponse>("SELECT * FROM priorities WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(PriorityRequest::try_from).transpose()
    }

    /// Fetch and row-lock a request for the rest of the transaction.
    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn get_for_update(&mut self, id: PriorityId) -> Result<Option<PriorityRequest>> {
        let row = sqlx::query_as::<_, PriorityDBResponse>("SELECT * FROM priorities WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(PriorityRequest::try_from).transpose()
    }

    /// List requests, newest first.
    #[instrument(skip(self, filter), fields(requester = ?filter.requester, status = ?filter.status), err)]
    pub async fn list(&mut self, filter: &PriorityFilter) -> Result<Vec<PriorityRequest>> {
        let rows = sqlx::query_as::<_, PriorityDBResponse>(
            r#"
            SELECT * FROM priorities
            WHERE ($1::text IS NULL OR requester = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3 OR (NOT archived AND (valid_until IS NULL OR valid_until >= $4)))
            ORDER BY created_at DESC, id
            OFFSET $5
            LIMIT $6
            "#,
        )
        .bind(filter.requester.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.show_archived)
        .bind(filter.stale_before)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;

        rows.into_iter().map(PriorityRequest::try_from).collect()
    }

    /// Number of requests matching the filter, ignoring pagination.
    #[instrument(skip(self, filter), err)]
    pub async fn count(&mut self, filter: &PriorityFilter) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM priorities
            WHERE ($1::text IS NULL OR requester = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3 OR (NOT archived AND (valid_until IS NULL OR valid_until >= $4)))
            "#,
        )
        .bind(filter.requester.as_deref())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.show_archived)
        .bind(filter.stale_before)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(count)
    }

    /// Serialize claims on a priority name until the transaction ends.
    #[instrument(skip(self), err)]
    pub async fn lock_name(&mut self, priority_name: &str) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('priority_name:' || $1))")
            .bind(priority_name)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    /// Whether another accepted request already holds `priority_name`.
    #[instrument(skip(self), fields(exclude = %abbrev_uuid(&exclude)), err)]
    pub async fn name_in_use(&mut self, priority_name: &str, exclude: PriorityId, scope: NameConflictScope) -> Result<bool> {
        let include_archived = scope == NameConflictScope::AllAccepted;
        let in_use: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM priorities
                WHERE priority_name = $1
                  AND status = 'accepted'
                  AND id <> $2
                  AND ($3 OR NOT archived)
            )
            "#,
        )
        .bind(priority_name)
        .bind(exclude)
        .bind(include_archived)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(in_use)
    }

    #[instrument(skip(self, request), fields(priority_id = %abbrev_uuid(&id), priority_name = %request.priority_name), err)]
    pub async fn mark_accepted(&mut self, id: PriorityId, request: &PriorityAcceptDBRequest) -> Result<PriorityRequest> {
        let row = sqlx::query_as::<_, PriorityDBResponse>(
            r#"
            UPDATE priorities
            SET status = 'accepted',
                priority_name = $2,
                accepted_at = $3,
                valid_until = $4,
                slurm_commands = $5,
                status_updated_at = $3,
                status_updated_by = $6,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&request.priority_name)
        .bind(request.accepted_at)
        .bind(request.valid_until)
        .bind(Json(&request.commands))
        .bind(&request.accepted_by)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self, reason), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_refused(&mut self, id: PriorityId, reason: &str, refused_by: &str, refused_at: DateTime<Utc>) -> Result<PriorityRequest> {
        let row = sqlx::query_as::<_, PriorityDBResponse>(
            r#"
            UPDATE priorities
            SET status = 'refused',
                refusal_reason = $2,
                status_updated_at = $3,
                status_updated_by = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(refused_at)
        .bind(refused_by)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    /// Replace the name and cached commands of an accepted request.
    #[instrument(skip(self, commands), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn update_name(&mut self, id: PriorityId, priority_name: &str, commands: &SchedulerCommands) -> Result<PriorityRequest> {
        let row = sqlx::query_as::<_, PriorityDBResponse>(
            r#"
            UPDATE priorities
            SET priority_name = $2,
                slurm_commands = $3,
                updated_at = NOW()
            WHERE id = $1 AND status = 'accepted'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(priority_name)
        .bind(Json(commands))
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    /// Replace the additional usernames and, for accepted requests, the cached commands.
    #[instrument(skip(self, usernames, commands), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn update_usernames(
        &mut self,
        id: PriorityId,
        usernames: &[String],
        commands: Option<&SchedulerCommands>,
    ) -> Result<PriorityRequest> {
        let row = sqlx::query_as::<_, PriorityDBResponse>(
            r#"
            UPDATE priorities
            SET additional_usernames = $2,
                slurm_commands = COALESCE($3, slurm_commands),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(usernames)
        .bind(commands.map(Json))
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn set_expiry_job(&mut self, id: PriorityId, expiry_job: &str) -> Result<()> {
        sqlx::query("UPDATE priorities SET expiry_job = $2 WHERE id = $1")
            .bind(id)
            .bind(expiry_job)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn set_archived(&mut self, id: PriorityId, archived: bool) -> Result<PriorityRequest> {
        let row = sqlx::query_as::<_, PriorityDBResponse>(
            r#"
            UPDATE priorities
            SET archived = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(archived)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn touch(&mut self, id: PriorityId) -> Result<()> {
        sqlx::query("UPDATE priorities SET updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&mut self, id: PriorityId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM priorities WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, body), fields(priority_id = %abbrev_uuid(&priority_id)), err)]
    pub async fn add_message(&mut self, priority_id: PriorityId, author: &str, body: &str) -> Result<PriorityMessage> {
        let message = sqlx::query_as::<_, PriorityMessage>(
            r#"
            INSERT INTO priority_messages (priority_id, author, body)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(priority_id)
        .bind(author)
        .bind(body)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(message)
    }

    /// Messages of one request, oldest first.
    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&priority_id)), err)]
    pub async fn list_messages(&mut self, priority_id: PriorityId) -> Result<Vec<PriorityMessage>> {
        let messages = sqlx::query_as::<_, PriorityMessage>(
            "SELECT * FROM priority_messages WHERE priority_id = $1 ORDER BY created_at, id",
        )
        .bind(priority_id)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(messages)
    }

    /// Messages for several requests at once, keyed by request.
    #[instrument(skip(self, ids), fields(count = ids.len()), err)]
    pub async fn list_messages_bulk(&mut self, ids: &[PriorityId]) -> Result<HashMap<PriorityId, Vec<PriorityMessage>>> {
        let messages = sqlx::query_as::<_, PriorityMessage>(
            "SELECT * FROM priority_messages WHERE priority_id = ANY($1) ORDER BY created_at, id",
        )
        .bind(ids)
        .fetch_all(&mut *self.db)
        .await?;

        let mut by_priority: HashMap<PriorityId, Vec<PriorityMessage>> = HashMap::new();
        for message in messages {
            by_priority.entry(message.priority_id).or_default().push(message);
        }
        Ok(by_priority)
    }
}

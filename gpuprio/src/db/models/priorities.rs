//! Database models for priority requests and their messages.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::db::errors::DbError;
use crate::lifecycle::state::{PriorityState, PriorityStatus};
use crate::slurm::{CommandInput, SchedulerCommands};
use crate::types::{MessageId, PriorityId};

/// Database request for creating a priority request
#[derive(Debug, Clone)]
pub struct PriorityCreateDBRequest {
    pub requester: String,
    pub requester_email: String,
    pub bugzilla_ticket: String,
    pub gpu_type: String,
    pub gpu_count: i32,
    pub duration_days: i32,
    pub slurm_project: String,
    pub reason: String,
    pub additional_usernames: Vec<String>,
}

/// Fields written when a request is accepted
#[derive(Debug, Clone)]
pub struct PriorityAcceptDBRequest {
    pub priority_name: String,
    pub accepted_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub commands: SchedulerCommands,
    pub accepted_by: String,
}

/// Row of the `priorities` table
#[derive(Debug, Clone, FromRow)]
pub struct PriorityDBResponse {
    pub id: PriorityId,
    pub requester: String,
    pub requester_email: String,
    pub bugzilla_ticket: String,
    pub gpu_type: String,
    pub gpu_count: i32,
    pub duration_days: i32,
    pub slurm_project: String,
    pub reason: String,
    pub additional_usernames: Vec<String>,
    pub status: String,
    pub priority_name: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub slurm_commands: Option<Json<SchedulerCommands>>,
    pub expiry_job: Option<String>,
    pub refusal_reason: Option<String>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub status_updated_by: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `priority_messages` table
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PriorityMessage {
    pub id: MessageId,
    pub priority_id: PriorityId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A priority request with its status-dependent fields folded into [`PriorityState`].
#[derive(Debug, Clone)]
pub struct PriorityRequest {
    pub id: PriorityId,
    pub requester: String,
    pub requester_email: String,
    pub bugzilla_ticket: String,
    pub gpu_type: String,
    pub gpu_count: i32,
    pub duration_days: i32,
    pub slurm_project: String,
    pub reason: String,
    pub additional_usernames: Vec<String>,
    pub state: PriorityState,
    pub expiry_job: Option<String>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub status_updated_by: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Oldest first; filled in separately from the `priority_messages` table
    pub messages: Vec<PriorityMessage>,
}

impl TryFrom<PriorityDBResponse> for PriorityRequest {
    type Error = DbError;

    fn try_from(row: PriorityDBResponse) -> Result<Self, Self::Error> {
        let status: PriorityStatus = row
            .status
            .parse()
            .map_err(|e: String| DbError::Other(anyhow::anyhow!("priority {}: {e}", row.id)))?;

        let state = match status {
            PriorityStatus::Pending => PriorityState::Pending,
            PriorityStatus::Accepted => match (row.priority_name, row.accepted_at, row.valid_until, row.slurm_commands) {
                (Some(priority_name), Some(accepted_at), Some(valid_until), Some(Json(commands))) => PriorityState::Accepted {
                    priority_name,
                    accepted_at,
                    valid_until,
                    commands,
                },
                _ => {
                    return Err(DbError::Other(anyhow::anyhow!(
                        "priority {} is accepted but is missing acceptance fields",
                        row.id
                    )));
                }
            },
            PriorityStatus::Refused => PriorityState::Refused {
                refused_at: row.status_updated_at.unwrap_or(row.updated_at),
                reason: row.refusal_reason.unwrap_or_default(),
            },
        };

        Ok(Self {
            id: row.id,
            requester: row.requester,
            requester_email: row.requester_email,
            bugzilla_ticket: row.bugzilla_ticket,
            gpu_type: row.gpu_type,
            gpu_count: row.gpu_count,
            duration_days: row.duration_days,
            slurm_project: row.slurm_project,
            reason: row.reason,
            additional_usernames: row.additional_usernames,
            state,
            expiry_job: row.expiry_job,
            status_updated_at: row.status_updated_at,
            status_updated_by: row.status_updated_by,
            archived: row.archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
            messages: Vec::new(),
        })
    }
}

impl PriorityRequest {
    pub fn status(&self) -> PriorityStatus {
        self.state.status()
    }

    /// Generator input for an accepted request, optionally under a different name.
    pub fn command_input<'a>(&'a self, name_override: Option<&'a str>, usernames: &'a [String]) -> Option<CommandInput<'a>> {
        match &self.state {
            PriorityState::Accepted {
                priority_name,
                valid_until,
                ..
            } => Some(CommandInput {
                priority_name: name_override.unwrap_or(priority_name),
                gpu_type: &self.gpu_type,
                gpu_count: self.gpu_count,
                slurm_project: &self.slurm_project,
                requester: &self.requester,
                additional_usernames: usernames,
                valid_until: *valid_until,
                duration_days: self.duration_days,
            }),
            PriorityState::Pending | PriorityState::Refused { .. } => None,
        }
    }

    /// Past its validity window
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.valid_until().is_some_and(|until| now > until)
    }

    /// Expired for longer than `grace`; listings hide these like archived records
    pub fn is_stale(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.state.valid_until().is_some_and(|until| now > until + grace)
    }
}

/// Filter for listing priority requests
#[derive(Debug, Clone)]
pub struct PriorityFilter {
    pub requester: Option<String>,
    pub status: Option<PriorityStatus>,
    /// Include archived and stale records
    pub show_archived: bool,
    /// Accepted records that expired before this instant are stale
    pub stale_before: DateTime<Utc>,
    pub skip: i64,
    pub limit: i64,
}

//! API request/response models for priority requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

use super::pagination::Pagination;
use crate::db::models::priorities::{PriorityMessage, PriorityRequest};
use crate::lifecycle::state::{PriorityState, PriorityStatus};
use crate::types::{MessageId, PriorityId};

/// Submission of a new priority request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriorityCreate {
    /// Digits only
    pub bugzilla_ticket: String,
    pub gpu_type: String,
    pub gpu_count: i32,
    /// Between 1 and 14
    pub duration_days: i32,
    pub slurm_project: String,
    /// Why the priority is needed; must not be blank
    #[serde(default)]
    pub reason: String,
    /// Cluster users who should share the priority; entries may hold several
    /// names separated by commas or whitespace
    #[serde(default)]
    pub additional_usernames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriorityAccept {
    /// QOS name to create on the cluster
    pub priority_name: String,
    /// Sent to the requester and kept on the request; an automatic note is used when absent
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct PriorityRefuse {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriorityRename {
    pub priority_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UsernameAdd {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageCreate {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ArchivedUpdate {
    pub archived: bool,
}

/// Query parameters for listing priority requests
#[serde_as]
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListPrioritiesQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only requests in this status
    pub status: Option<PriorityStatus>,

    /// Only requests by this user (admin listing only)
    pub requester: Option<String>,

    /// Include archived requests and those expired past the grace period
    #[serde_as(as = "Option<DisplayFromStr>")]
    #[param(default = false)]
    pub show_archived: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PriorityMessageResponse {
    pub id: MessageId,
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<PriorityMessage> for PriorityMessageResponse {
    fn from(message: PriorityMessage) -> Self {
        Self {
            id: message.id,
            author: message.author,
            text: message.body,
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PriorityResponse {
    #[schema(value_type = String, format = "uuid")]
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
    pub status: PriorityStatus,
    /// Only set once accepted
    pub priority_name: Option<String>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Cached SLURM commands of an accepted request, in execution order
    pub commands: Option<Vec<String>>,
    /// Handle of the scheduled QOS removal job
    pub expiry_job: Option<String>,
    pub refusal_reason: Option<String>,
    pub status_updated_at: Option<DateTime<Utc>>,
    pub status_updated_by: Option<String>,
    pub archived: bool,
    /// Accepted and past `valid_until`
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<PriorityMessageResponse>,
}

impl From<PriorityRequest> for PriorityResponse {
    fn from(request: PriorityRequest) -> Self {
        let is_expired = request.is_expired(Utc::now());
        let status = request.status();

        let (priority_name, accepted_at, valid_until, commands, refusal_reason) = match request.state {
            PriorityState::Pending => (None, None, None, None, None),
            PriorityState::Accepted {
                priority_name,
                accepted_at,
                valid_until,
                commands,
            } => (Some(priority_name), Some(accepted_at), Some(valid_until), Some(commands.to_vec()), None),
            PriorityState::Refused { reason, .. } => (None, None, None, None, Some(reason)),
        };

        Self {
            id: request.id,
            requester: request.requester,
            requester_email: request.requester_email,
            bugzilla_ticket: request.bugzilla_ticket,
            gpu_type: request.gpu_type,
            gpu_count: request.gpu_count,
            duration_days: request.duration_days,
            slurm_project: request.slurm_project,
            reason: request.reason,
            additional_usernames: request.additional_usernames,
            status,
            priority_name,
            accepted_at,
            valid_until,
            commands,
            expiry_job: request.expiry_job,
            refusal_reason,
            status_updated_at: request.status_updated_at,
            status_updated_by: request.status_updated_by,
            archived: request.archived,
            is_expired,
            created_at: request.created_at,
            updated_at: request.updated_at,
            messages: request.messages.into_iter().map(Into::into).collect(),
        }
    }
}

/// An accepted request plus a warning when its removal could not be scheduled
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AcceptResponse {
    #[serde(flatten)]
    pub priority: PriorityResponse,
    /// Present when the QOS must be removed by hand
    pub scheduling_warning: Option<String>,
}

/// Commands for an accepted request, ready to paste into a shell
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CommandsResponse {
    pub priority_name: String,
    pub commands: Vec<String>,
    /// Annotated script with verification commands
    pub script: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slurm::SchedulerCommands;
    use chrono::Duration;

    fn request(state: PriorityState) -> PriorityRequest {
        let now = Utc::now();
        PriorityRequest {
            id: uuid::Uuid::new_v4(),
            requester: "req".to_string(),
            requester_email: "req@example.com".to_string(),
            bugzilla_ticket: "12345".to_string(),
            gpu_type: "v100".to_string(),
            gpu_count: 2,
            duration_days: 7,
            slurm_project: "proj_a".to_string(),
            reason: String::new(),
            additional_usernames: vec![],
            state,
            expiry_job: None,
            status_updated_at: None,
            status_updated_by: None,
            archived: false,
            created_at: now,
            updated_at: now,
            messages: vec![],
        }
    }

    #[test]
    fn test_accepted_response_flattens_state() {
        let now = Utc::now();
        let response = PriorityResponse::from(request(PriorityState::Accepted {
            priority_name: "alpha".to_string(),
            accepted_at: now - Duration::days(8),
            valid_until: now - Duration::days(1),
            commands: SchedulerCommands {
                create_qos: "create".to_string(),
                assign_users: vec!["assign".to_string()],
                schedule_removal: "remove".to_string(),
            },
        }));

        assert_eq!(response.status, PriorityStatus::Accepted);
        assert_eq!(response.priority_name.as_deref(), Some("alpha"));
        assert_eq!(response.commands, Some(vec!["create".to_string(), "assign".to_string(), "remove".to_string()]));
        assert!(response.is_expired);
        assert!(response.refusal_reason.is_none());
    }

    #[test]
    fn test_refused_response_carries_reason() {
        let response = PriorityResponse::from(request(PriorityState::Refused {
            refused_at: Utc::now(),
            reason: "no capacity".to_string(),
        }));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "refused");
        assert_eq!(json["refusal_reason"], "no capacity");
        assert!(json["priority_name"].is_null());
        assert_eq!(json["is_expired"], false);
    }
}

//! Priority request states and the transitions allowed between them.
//!
//! The status column is a flat string in the database, but in memory the
//! status-dependent fields travel with the variant that owns them: a name and
//! an expiry only exist on [`PriorityState::Accepted`], a refusal reason only
//! on [`PriorityState::Refused`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::slurm::SchedulerCommands;

/// The three lifecycle states of a priority request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PriorityStatus {
    /// Submitted, waiting for an administrator
    Pending,
    /// Approved with a QOS name and an expiry
    Accepted,
    /// Turned down by an administrator
    Refused,
}

impl PriorityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Refused => "refused",
        }
    }
}

impl fmt::Display for PriorityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PriorityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "refused" => Ok(Self::Refused),
            _ => Err(format!("Unknown priority status: {}", s)),
        }
    }
}

/// Administrative actions that depend on the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Accept,
    Refuse,
    Rename,
    AddUsername,
    RemoveUsername,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Refuse => "refuse",
            Self::Rename => "rename",
            Self::AddUsername => "add_username",
            Self::RemoveUsername => "remove_username",
        }
    }

    /// Whether this action can be applied to a request in `status`.
    ///
    /// Every pair is spelled out so a new status or action fails to compile
    /// until its rules are decided.
    pub fn allowed_from(self, status: PriorityStatus) -> bool {
        use PriorityStatus::*;
        match (self, status) {
            (Transition::Accept, Pending) => true,
            (Transition::Accept, Accepted | Refused) => false,
            (Transition::Refuse, Pending) => true,
            (Transition::Refuse, Accepted | Refused) => false,
            (Transition::Rename, Accepted) => true,
            (Transition::Rename, Pending | Refused) => false,
            (Transition::AddUsername, Accepted) => true,
            (Transition::AddUsername, Pending | Refused) => false,
            (Transition::RemoveUsername, Accepted) => true,
            (Transition::RemoveUsername, Pending | Refused) => false,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status together with the fields that only exist in that status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PriorityState {
    Pending,
    Accepted {
        priority_name: String,
        accepted_at: DateTime<Utc>,
        valid_until: DateTime<Utc>,
        commands: SchedulerCommands,
    },
    Refused {
        refused_at: DateTime<Utc>,
        reason: String,
    },
}

impl PriorityState {
    pub fn status(&self) -> PriorityStatus {
        match self {
            PriorityState::Pending => PriorityStatus::Pending,
            PriorityState::Accepted { .. } => PriorityStatus::Accepted,
            PriorityState::Refused { .. } => PriorityStatus::Refused,
        }
    }

    pub fn priority_name(&self) -> Option<&str> {
        match self {
            PriorityState::Accepted { priority_name, .. } => Some(priority_name),
            PriorityState::Pending | PriorityState::Refused { .. } => None,
        }
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        match self {
            PriorityState::Accepted { valid_until, .. } => Some(*valid_until),
            PriorityState::Pending | PriorityState::Refused { .. } => None,
        }
    }

    pub fn commands(&self) -> Option<&SchedulerCommands> {
        match self {
            PriorityState::Accepted { commands, .. } => Some(commands),
            PriorityState::Pending | PriorityState::Refused { .. } => None,
        }
    }
}

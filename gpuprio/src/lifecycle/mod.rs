//! The priority request lifecycle.
//!
//! [`PriorityLifecycle`] owns every state change of a priority request. Each
//! mutation runs in one transaction: the row is locked with `FOR UPDATE`, the
//! transition and input are checked, the change is written and the transaction
//! commits. Side effects that talk to the outside world happen around that
//! transaction, never inside it:
//!
//! - the GPU probe is consulted before a creation transaction opens,
//! - expiry is scheduled after an acceptance has committed,
//! - notifications are handed to the [`Notifier`] last.
//!
//! Priority names are claimed under a transaction-scoped advisory lock keyed on
//! the name, and the partial unique index `priorities_active_name_unique` backs
//! the check for the default [`NameConflictScope::Active`] scope.

use bon::Builder;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::{NameConflictScope, PolicyConfig};
use crate::db::errors::{ACTIVE_NAME_CONSTRAINT, BUGZILLA_TICKET_CONSTRAINT, DbError};
use crate::db::handlers::Priorities;
use crate::db::models::priorities::{PriorityAcceptDBRequest, PriorityCreateDBRequest, PriorityFilter, PriorityRequest};
use crate::errors::{Error, Result};
use crate::expiry::ExpiryScheduler;
use crate::notifications::{NotificationEvent, Notifier};
use crate::probe::{Availability, AvailabilityProbe, GpuSnapshot};
use crate::slurm::{CommandInput, generate_commands};
use crate::types::{PriorityId, abbrev_uuid};

pub mod state;
pub mod validation;

use state::Transition;
use validation::{
    CreateFields, CreateRules, MAX_ADDITIONAL_USERNAMES, check_priority_name, check_username, normalize_usernames, validate_create,
};

/// A submission as it arrives from the requester.
#[derive(Debug, Clone)]
pub struct NewPriorityRequest {
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

/// Result of an acceptance. The acceptance itself always stands; a failure to
/// schedule the removal only shows up as a warning.
#[derive(Debug, Clone)]
pub struct AcceptOutcome {
    pub priority: PriorityRequest,
    pub scheduling_warning: Option<String>,
}

/// GPU types offered to requesters and what the probe currently reports.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuCatalog {
    /// `None` when the probe could not be consulted
    pub snapshot: Option<GpuSnapshot>,
    pub gpu_types: Vec<String>,
}

/// Listing parameters; stale-record cutoff is derived from policy.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub requester: Option<String>,
    pub status: Option<state::PriorityStatus>,
    pub show_archived: bool,
    pub skip: i64,
    pub limit: i64,
}

#[derive(Builder)]
pub struct PriorityLifecycle {
    db: PgPool,
    policy: PolicyConfig,
    probe: Arc<dyn AvailabilityProbe>,
    scheduler: Arc<dyn ExpiryScheduler>,
    notifier: Arc<dyn Notifier>,
    /// Receives a copy of every new request
    #[builder(into)]
    admin_email: String,
}

fn not_found(id: PriorityId) -> Error {
    Error::NotFound {
        resource: "Priority request".to_string(),
        id: id.to_string(),
    }
}

fn ensure_transition(request: &PriorityRequest, attempted: Transition) -> Result<()> {
    let from = request.status();
    if attempted.allowed_from(from) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, attempted })
    }
}

fn name_conflict_on_index(name: &str) -> impl FnOnce(DbError) -> Error + '_ {
    move |e| {
        if e.is_unique_violation_of(ACTIVE_NAME_CONSTRAINT) {
            Error::NameConflict { name: name.to_string() }
        } else {
            e.into()
        }
    }
}

impl PriorityLifecycle {
    /// GPU types offered to requesters: the configured list, extended with any
    /// model the probe reports.
    pub async fn gpu_catalog(&self) -> GpuCatalog {
        let snapshot = self.probe.snapshot().await;
        let mut gpu_types = self.policy.gpu_types.clone();
        if let Some(snapshot) = &snapshot {
            for model in snapshot.keys() {
                if !gpu_types.contains(model) {
                    gpu_types.push(model.clone());
                }
            }
        }
        GpuCatalog { snapshot, gpu_types }
    }

    /// Accepted records that expired before this instant are hidden from listings.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let grace = Duration::from_std(self.policy.archive_grace).unwrap_or_else(|_| Duration::days(7));
        now - grace
    }

    #[instrument(skip(self, request), fields(requester = %request.requester, ticket = %request.bugzilla_ticket), err)]
    pub async fn create(&self, request: NewPriorityRequest) -> Result<PriorityRequest> {
        let gpu_type = request.gpu_type.trim().to_lowercase();
        let bugzilla_ticket = request.bugzilla_ticket.trim().to_string();
        let slurm_project = request.slurm_project.trim().to_string();
        let additional_usernames: Vec<String> = normalize_usernames(&request.additional_usernames)
            .into_iter()
            .filter(|u| *u != request.requester)
            .collect();

        // consulted before any transaction is opened
        let catalog = self.gpu_catalog().await;
        let availability = match &catalog.snapshot {
            Some(snapshot) => match snapshot.get(&gpu_type) {
                Some(count) => Availability::Known(*count),
                None => Availability::Unknown,
            },
            None => Availability::Unknown,
        };

        let fields = CreateFields {
            bugzilla_ticket: &bugzilla_ticket,
            gpu_type: &gpu_type,
            gpu_count: request.gpu_count,
            duration_days: request.duration_days,
            slurm_project: &slurm_project,
            reason: &request.reason,
            additional_usernames: &additional_usernames,
        };
        let rules = CreateRules {
            known_gpu_types: &catalog.gpu_types,
            availability,
            max_gpu_count: self.policy.max_gpu_count,
            max_duration_days: self.policy.max_duration_days,
        };
        validate_create(&fields, &rules).map_err(|violations| Error::Validation { violations })?;

        let db_request = PriorityCreateDBRequest {
            requester: request.requester.clone(),
            requester_email: request.requester_email.clone(),
            bugzilla_ticket: bugzilla_ticket.clone(),
            gpu_type,
            gpu_count: request.gpu_count,
            duration_days: request.duration_days,
            slurm_project,
            reason: request.reason.trim().to_string(),
            additional_usernames,
        };

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let created = Priorities::new(&mut tx).create(&db_request).await.map_err(|e| {
            if e.is_unique_violation_of(BUGZILLA_TICKET_CONSTRAINT) {
                Error::Conflict {
                    message: format!("A priority request for Bugzilla ticket {bugzilla_ticket} already exists"),
                }
            } else {
                e.into()
            }
        })?;
        tx.commit().await.map_err(DbError::from)?;

        info!(priority_id = %abbrev_uuid(&created.id), "Priority request submitted");

        for recipient in [self.admin_email.as_str(), created.requester_email.as_str()] {
            self.notifier.dispatch(NotificationEvent::Created {
                request_id: created.id,
                recipient: recipient.to_string(),
                requester: created.requester.clone(),
                bugzilla_ticket: created.bugzilla_ticket.clone(),
                gpu_type: created.gpu_type.clone(),
                gpu_count: created.gpu_count,
                duration_days: created.duration_days,
                slurm_project: created.slurm_project.clone(),
                reason: created.reason.clone(),
            });
        }

        Ok(created)
    }

    #[instrument(skip(self, message), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn accept(&self, id: PriorityId, priority_name: &str, admin: &str, message: Option<String>) -> Result<AcceptOutcome> {
        let name = priority_name.trim();
        let message = message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty());

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut tx);

        let current = repo.get_for_update(id).await?.ok_or_else(|| not_found(id))?;
        ensure_transition(&current, Transition::Accept)?;
        check_priority_name(name).map_err(|m| Error::validation("priority_name", m))?;

        repo.lock_name(name).await?;
        if repo.name_in_use(name, id, self.policy.name_conflict_scope).await? {
            return Err(Error::NameConflict { name: name.to_string() });
        }

        // stored timestamps keep microseconds, the scheduler must see the same instant
        let accepted_at = Utc::now().trunc_subsecs(6);
        let valid_until = accepted_at + Duration::days(i64::from(current.duration_days));
        let commands = generate_commands(&CommandInput {
            priority_name: name,
            gpu_type: &current.gpu_type,
            gpu_count: current.gpu_count,
            slurm_project: &current.slurm_project,
            requester: &current.requester,
            additional_usernames: &current.additional_usernames,
            valid_until,
            duration_days: current.duration_days,
        });

        let accept_request = PriorityAcceptDBRequest {
            priority_name: name.to_string(),
            accepted_at,
            valid_until,
            commands,
            accepted_by: admin.to_string(),
        };
        let mut accepted = repo
            .mark_accepted(id, &accept_request)
            .await
            .map_err(name_conflict_on_index(name))?;

        let note = message
            .clone()
            .unwrap_or_else(|| format!("Priority accepted and configured with name '{name}'"));
        repo.add_message(id, admin, &note).await?;
        accepted.messages = repo.list_messages(id).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(priority_name = name, %valid_until, "Priority request accepted");

        // The acceptance is committed from here on: failures only produce a warning.
        let scheduling_warning = match self.scheduler.schedule_removal(name, valid_until).await {
            Ok(handle) => match self.record_expiry_job(id, handle.as_str()).await {
                Ok(()) => {
                    accepted.expiry_job = Some(handle.to_string());
                    None
                }
                Err(e) => {
                    warn!(error = %e, %handle, "Scheduled QOS removal but could not record the job");
                    Some(format!("Removal job {handle} was scheduled but could not be recorded on the request"))
                }
            },
            Err(e) => {
                warn!(error = %e, priority_name = name, "QOS removal must be done manually");
                Some(format!(
                    "{e}. Remove QOS '{name}' manually after {} UTC",
                    valid_until.format("%Y-%m-%d %H:%M")
                ))
            }
        };

        self.notifier.dispatch(NotificationEvent::Accepted {
            request_id: id,
            recipient: accepted.requester_email.clone(),
            priority_name: name.to_string(),
            valid_until,
            message,
        });

        Ok(AcceptOutcome {
            priority: accepted,
            scheduling_warning,
        })
    }

    #[instrument(skip(self, reason), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn refuse(&self, id: PriorityId, admin: &str, reason: &str) -> Result<PriorityRequest> {
        let reason = reason.trim();

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut tx);

        let current = repo.get_for_update(id).await?.ok_or_else(|| not_found(id))?;
        ensure_transition(&current, Transition::Refuse)?;

        let mut refused = repo.mark_refused(id, reason, admin, Utc::now()).await?;
        if !reason.is_empty() {
            repo.add_message(id, admin, &format!("Request refused: {reason}")).await?;
        }
        tx.commit().await.map_err(DbError::from)?;

        info!("Priority request refused");
        refused.messages = self.messages_for(id).await?;

        self.notifier.dispatch(NotificationEvent::Refused {
            request_id: id,
            recipient: refused.requester_email.clone(),
            reason: reason.to_string(),
        });

        Ok(refused)
    }

    /// Give an accepted request a new QOS name. The validity window and any
    /// scheduled removal are left alone.
    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn rename(&self, id: PriorityId, new_name: &str, admin: &str) -> Result<PriorityRequest> {
        let name = new_name.trim();

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut tx);

        let current = repo.get_for_update(id).await?.ok_or_else(|| not_found(id))?;
        ensure_transition(&current, Transition::Rename)?;
        check_priority_name(name).map_err(|m| Error::validation("priority_name", m))?;

        repo.lock_name(name).await?;
        if repo.name_in_use(name, id, self.policy.name_conflict_scope).await? {
            return Err(Error::NameConflict { name: name.to_string() });
        }

        let old_name = current.state.priority_name().unwrap_or_default().to_string();
        let input = current
            .command_input(Some(name), &current.additional_usernames)
            .ok_or_else(|| Error::InvalidTransition {
                from: current.status(),
                attempted: Transition::Rename,
            })?;
        let commands = generate_commands(&input);

        let mut renamed = repo.update_name(id, name, &commands).await.map_err(name_conflict_on_index(name))?;
        repo.add_message(id, admin, &format!("Priority renamed from '{old_name}' to '{name}'"))
            .await?;
        tx.commit().await.map_err(DbError::from)?;

        if let Some(job) = &renamed.expiry_job {
            warn!(%old_name, new_name = name, expiry_job = %job, "Scheduled removal still targets the previous QOS name");
        }

        renamed.messages = self.messages_for(id).await?;
        Ok(renamed)
    }

    /// Grant the QOS to one more cluster user. Adding the requester or an
    /// existing member changes nothing.
    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn add_username(&self, id: PriorityId, username: &str, admin: &str) -> Result<PriorityRequest> {
        let username = username.trim();
        check_username(username).map_err(|m| Error::validation("username", m))?;

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut tx);

        let mut current = repo.get_for_update(id).await?.ok_or_else(|| not_found(id))?;
        ensure_transition(&current, Transition::AddUsername)?;

        if current.requester == username || current.additional_usernames.iter().any(|u| u == username) {
            tx.commit().await.map_err(DbError::from)?;
            current.messages = self.messages_for(id).await?;
            return Ok(current);
        }
        if current.additional_usernames.len() >= MAX_ADDITIONAL_USERNAMES {
            return Err(Error::validation(
                "username",
                format!("At most {MAX_ADDITIONAL_USERNAMES} additional usernames are allowed"),
            ));
        }

        let mut usernames = current.additional_usernames.clone();
        usernames.push(username.to_string());
        let commands = current.command_input(None, &usernames).map(|input| generate_commands(&input));

        let mut updated = repo.update_usernames(id, &usernames, commands.as_ref()).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(username, %admin, "Added user to priority");
        updated.messages = self.messages_for(id).await?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn remove_username(&self, id: PriorityId, username: &str, admin: &str) -> Result<PriorityRequest> {
        let username = username.trim();

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut tx);

        let current = repo.get_for_update(id).await?.ok_or_else(|| not_found(id))?;
        ensure_transition(&current, Transition::RemoveUsername)?;

        if !current.additional_usernames.iter().any(|u| u == username) {
            return Err(Error::NotFound {
                resource: "Username".to_string(),
                id: username.to_string(),
            });
        }

        let usernames: Vec<String> = current
            .additional_usernames
            .iter()
            .filter(|u| *u != username)
            .cloned()
            .collect();
        let commands = current.command_input(None, &usernames).map(|input| generate_commands(&input));

        let mut updated = repo.update_usernames(id, &usernames, commands.as_ref()).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(username, %admin, "Removed user from priority");
        updated.messages = self.messages_for(id).await?;
        Ok(updated)
    }

    /// Append a message to the conversation on a request, whatever its status.
    #[instrument(skip(self, text), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn add_message(&self, id: PriorityId, author: &str, text: &str) -> Result<PriorityRequest> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::validation("text", "Message must not be empty"));
        }

        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut tx);

        let mut current = repo.get_for_update(id).await?.ok_or_else(|| not_found(id))?;
        repo.add_message(id, author, text).await?;
        repo.touch(id).await?;
        tx.commit().await.map_err(DbError::from)?;

        current.messages = self.messages_for(id).await?;

        self.notifier.dispatch(NotificationEvent::MessageAdded {
            request_id: id,
            recipient: current.requester_email.clone(),
            author: author.to_string(),
            text: text.to_string(),
        });

        Ok(current)
    }

    /// Hide or restore a request. Restoring an accepted request claims its
    /// name again, so it must still be free.
    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn set_archived(&self, id: PriorityId, archived: bool, admin: &str) -> Result<PriorityRequest> {
        let mut tx = self.db.begin().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut tx);

        let current = repo.get_for_update(id).await?.ok_or_else(|| not_found(id))?;

        let reclaimed_name = match current.state.priority_name() {
            Some(name) if current.archived && !archived => Some(name.to_string()),
            _ => None,
        };
        if let Some(name) = &reclaimed_name {
            repo.lock_name(name).await?;
            // archived holders never count here: this record is the one leaving the archive
            if repo.name_in_use(name, id, NameConflictScope::Active).await? {
                return Err(Error::NameConflict { name: name.clone() });
            }
        }

        let mut updated = repo.set_archived(id, archived).await.map_err(|e| match &reclaimed_name {
            Some(name) => name_conflict_on_index(name)(e),
            None => e.into(),
        })?;
        tx.commit().await.map_err(DbError::from)?;

        info!(archived, %admin, "Changed archive flag");
        updated.messages = self.messages_for(id).await?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn delete(&self, id: PriorityId, admin: &str) -> Result<()> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        if !Priorities::new(&mut conn).delete(id).await? {
            return Err(not_found(id));
        }
        info!(%admin, "Deleted priority request");
        Ok(())
    }

    #[instrument(skip(self), fields(priority_id = %abbrev_uuid(&id)), err)]
    pub async fn get(&self, id: PriorityId) -> Result<PriorityRequest> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut conn);

        let mut request = repo.get_by_id(id).await?.ok_or_else(|| not_found(id))?;
        request.messages = repo.list_messages(id).await?;
        Ok(request)
    }

    /// One page of requests, newest first, plus the total matching count.
    #[instrument(skip(self, query), fields(requester = ?query.requester, status = ?query.status), err)]
    pub async fn list(&self, query: ListQuery) -> Result<(Vec<PriorityRequest>, i64)> {
        let filter = PriorityFilter {
            requester: query.requester,
            status: query.status,
            show_archived: query.show_archived,
            stale_before: self.stale_before(Utc::now()),
            skip: query.skip,
            limit: query.limit,
        };

        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let mut repo = Priorities::new(&mut conn);

        let mut requests = repo.list(&filter).await?;
        let total = repo.count(&filter).await?;

        let ids: Vec<PriorityId> = requests.iter().map(|r| r.id).collect();
        let mut messages = repo.list_messages_bulk(&ids).await?;
        for request in &mut requests {
            request.messages = messages.remove(&request.id).unwrap_or_default();
        }

        Ok((requests, total))
    }

    async fn record_expiry_job(&self, id: PriorityId, handle: &str) -> Result<()> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        Ok(Priorities::new(&mut conn).set_expiry_job(id, handle).await?)
    }

    async fn messages_for(&self, id: PriorityId) -> Result<Vec<crate::db::models::priorities::PriorityMessage>> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        Ok(Priorities::new(&mut conn).list_messages(id).await?)
    }
}

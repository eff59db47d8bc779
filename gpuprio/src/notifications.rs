//! Notification events and their dispatch.
//!
//! The lifecycle engine emits a [`NotificationEvent`] on every transition and
//! hands it to a [`Notifier`]. Dispatch is fire-and-forget: a failed delivery is
//! logged and never affects the transition that produced it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::email::EmailService;
use crate::types::{PriorityId, abbrev_uuid};

/// Payload handed to the dispatcher. The transport decides how to render it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotificationEvent {
    Created {
        request_id: PriorityId,
        recipient: String,
        requester: String,
        bugzilla_ticket: String,
        gpu_type: String,
        gpu_count: i32,
        duration_days: i32,
        slurm_project: String,
        reason: String,
    },
    Accepted {
        request_id: PriorityId,
        recipient: String,
        priority_name: String,
        valid_until: DateTime<Utc>,
        message: Option<String>,
    },
    Refused {
        request_id: PriorityId,
        recipient: String,
        reason: String,
    },
    MessageAdded {
        request_id: PriorityId,
        recipient: String,
        author: String,
        text: String,
    },
}

impl NotificationEvent {
    pub fn request_id(&self) -> PriorityId {
        match self {
            Self::Created { request_id, .. }
            | Self::Accepted { request_id, .. }
            | Self::Refused { request_id, .. }
            | Self::MessageAdded { request_id, .. } => *request_id,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            Self::Created { recipient, .. }
            | Self::Accepted { recipient, .. }
            | Self::Refused { recipient, .. }
            | Self::MessageAdded { recipient, .. } => recipient,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Accepted { .. } => "accepted",
            Self::Refused { .. } => "refused",
            Self::MessageAdded { .. } => "message_added",
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Hand off an event. Must not block and must not fail the caller.
    fn dispatch(&self, event: NotificationEvent);
}

/// Sends each event as an email on a background task.
pub struct EmailNotifier {
    email: Arc<EmailService>,
}

impl EmailNotifier {
    pub fn new(email: Arc<EmailService>) -> Self {
        Self { email }
    }
}

impl Notifier for EmailNotifier {
    fn dispatch(&self, event: NotificationEvent) {
        let email = self.email.clone();
        tokio::spawn(async move {
            let request_id = abbrev_uuid(&event.request_id());
            match email.send_notification(&event).await {
                Ok(()) => tracing::debug!(event = event.kind(), %request_id, "Notification sent"),
                Err(e) => tracing::error!(
                    error = %e,
                    event = event.kind(),
                    %request_id,
                    recipient = event.recipient(),
                    "Failed to send notification"
                ),
            }
        });
    }
}

/// Used when notifications are disabled: events are only logged.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, event: NotificationEvent) {
        tracing::info!(
            event = event.kind(),
            request_id = %abbrev_uuid(&event.request_id()),
            recipient = event.recipient(),
            "Notifications disabled, not sending"
        );
    }
}

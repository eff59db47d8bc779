//! Deferred QOS removal.
//!
//! When a request is accepted, its QOS must disappear at `valid_until`. The
//! [`ExpiryScheduler`] trait hides how that happens: the [`at::AtScheduler`]
//! backend registers a one-shot job with the host's `at(1)` facility, the
//! [`dummy::DummyScheduler`] keeps registrations in memory for development and
//! tests, and [`DisabledScheduler`] always refuses so administrators are told to
//! clean up by hand.
//!
//! Scheduling is attempted after the acceptance has committed and is never
//! retried or polled. Only acceptance schedules a removal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ExpiryConfig;

pub mod at;
pub mod dummy;

/// Create an expiry scheduler from configuration
pub fn create_scheduler(config: &ExpiryConfig) -> Box<dyn ExpiryScheduler> {
    match config {
        ExpiryConfig::At(at_config) => Box::new(at::AtScheduler::from(at_config.clone())),
        ExpiryConfig::Dummy => Box::new(dummy::DummyScheduler::default()),
        ExpiryConfig::Disabled => Box::new(DisabledScheduler),
    }
}

/// Opaque reference to a registered removal job, stored on the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleHandle(String);

impl ScheduleHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScheduleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The removal could not be registered and needs manual cleanup.
#[derive(Debug, thiserror::Error)]
#[error("Expiry scheduling unavailable: {reason}")]
pub struct SchedulingUnavailable {
    pub reason: String,
}

impl SchedulingUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[async_trait]
pub trait ExpiryScheduler: Send + Sync {
    /// Register a one-shot job that removes the QOS `priority_name` at `at_time`.
    async fn schedule_removal(&self, priority_name: &str, at_time: DateTime<Utc>) -> Result<ScheduleHandle, SchedulingUnavailable>;
}

/// Backend used when no deferred execution facility is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledScheduler;

#[async_trait]
impl ExpiryScheduler for DisabledScheduler {
    async fn schedule_removal(&self, _priority_name: &str, _at_time: DateTime<Utc>) -> Result<ScheduleHandle, SchedulingUnavailable> {
        Err(SchedulingUnavailable::new("automatic expiry is disabled"))
    }
}

//! In-memory expiry backend for development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{ExpiryScheduler, ScheduleHandle, SchedulingUnavailable};

/// A removal the dummy backend has accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub handle: ScheduleHandle,
    pub priority_name: String,
    pub at_time: DateTime<Utc>,
}

/// Records every registration and hands out sequential handles.
#[derive(Debug, Default)]
pub struct DummyScheduler {
    next_id: AtomicU64,
    registrations: Mutex<Vec<Registration>>,
}

impl DummyScheduler {
    /// Snapshot of everything registered so far, oldest first
    pub fn registrations(&self) -> Vec<Registration> {
        match self.registrations.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ExpiryScheduler for DummyScheduler {
    async fn schedule_removal(&self, priority_name: &str, at_time: DateTime<Utc>) -> Result<ScheduleHandle, SchedulingUnavailable> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = ScheduleHandle::new(format!("dummy-{id}"));

        tracing::info!(%priority_name, %at_time, %handle, "Dummy scheduler recorded QOS removal");

        let registration = Registration {
            handle: handle.clone(),
            priority_name: priority_name.to_string(),
            at_time,
        };
        match self.registrations.lock() {
            Ok(mut guard) => guard.push(registration),
            Err(poisoned) => poisoned.into_inner().push(registration),
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_registrations_in_order() {
        let scheduler = DummyScheduler::default();
        let when = Utc::now();

        let first = scheduler.schedule_removal("alpha", when).await.unwrap();
        let second = scheduler.schedule_removal("beta", when).await.unwrap();

        assert_eq!(first.as_str(), "dummy-1");
        assert_eq!(second.as_str(), "dummy-2");

        let registrations = scheduler.registrations();
        assert_eq!(registrations.len(), 2);
        assert_eq!(registrations[0].priority_name, "alpha");
        assert_eq!(registrations[1].priority_name, "beta");
        assert_eq!(registrations[1].at_time, when);
    }
}

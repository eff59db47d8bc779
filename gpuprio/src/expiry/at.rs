//! `at(1)` expiry backend.
//!
//! Runs `<binary> -t <YYYYMMDDhhmm>` and feeds the removal command on stdin.
//! `at` reports the created job as `job <n> at <date>`, usually on stderr.
//! The stamp is UTC, so `at` runs with `TZ=UTC` whatever the host zone is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use super::{ExpiryScheduler, ScheduleHandle, SchedulingUnavailable};
use crate::config::AtConfig;
use crate::slurm::{at_timestamp, removal_command};

pub struct AtScheduler {
    binary: PathBuf,
    timeout: Duration,
}

impl From<AtConfig> for AtScheduler {
    fn from(config: AtConfig) -> Self {
        Self {
            binary: config.binary,
            timeout: config.timeout,
        }
    }
}

/// Find the job number in `at` output.
pub fn parse_job_id(output: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("job"), Some(id)) => id.parse().ok(),
            _ => None,
        }
    })
}

impl AtScheduler {
    async fn run(&self, stamp: &str, command: &str) -> Result<std::process::Output, SchedulingUnavailable> {
        let mut child = Command::new(&self.binary)
            .arg("-t")
            .arg(stamp)
            .env("TZ", "UTC")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SchedulingUnavailable::new(format!("failed to start {}: {e}", self.binary.display())))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{command}\n").as_bytes())
                .await
                .map_err(|e| SchedulingUnavailable::new(format!("failed to write job to at: {e}")))?;
            // closing stdin submits the job
            drop(stdin);
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| SchedulingUnavailable::new(format!("failed to wait for at: {e}")))
    }
}

#[async_trait]
impl ExpiryScheduler for AtScheduler {
    #[instrument(skip(self), fields(binary = %self.binary.display()))]
    async fn schedule_removal(&self, priority_name: &str, at_time: DateTime<Utc>) -> Result<ScheduleHandle, SchedulingUnavailable> {
        let stamp = at_timestamp(at_time);
        let command = removal_command(priority_name);

        let output = match tokio::time::timeout(self.timeout, self.run(&stamp, &command)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "at did not finish in time");
                return Err(SchedulingUnavailable::new(format!("at timed out after {:?}", self.timeout)));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            warn!(status = %output.status, %stderr, "at rejected the removal job");
            return Err(SchedulingUnavailable::new(format!(
                "at exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let handle = match parse_job_id(&stderr).or_else(|| parse_job_id(&stdout)) {
            Some(id) => ScheduleHandle::new(format!("at-job-{id}")),
            None => ScheduleHandle::new(format!("at-{stamp}")),
        };

        info!(%handle, %stamp, "Scheduled QOS removal");
        Ok(handle)
    }
}

//! GPU availability probe.
//!
//! Availability comes from an external executable that prints one
//! `<model> <count>` pair per line. The probe is advisory: a missing script, a
//! timeout, a non-zero exit or garbage output all collapse to
//! [`Availability::Unknown`], and callers then skip the upper-bound check and
//! fall back to the configured GPU type list.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::ProbeConfig;

/// Free GPU counts keyed by lowercase model name
pub type GpuSnapshot = BTreeMap<String, u32>;

/// Result of asking the probe about one GPU model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Known(u32),
    Unknown,
}

#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    /// Current counts for every model the probe reports, or `None` if the probe
    /// could not be consulted.
    async fn snapshot(&self) -> Option<GpuSnapshot>;

    async fn get_available(&self, gpu_type: &str) -> Availability {
        match self.snapshot().await {
            Some(snapshot) => match snapshot.get(&gpu_type.to_lowercase()) {
                Some(count) => Availability::Known(*count),
                None => Availability::Unknown,
            },
            None => Availability::Unknown,
        }
    }
}

/// Parse probe output, ignoring malformed lines.
///
/// Returns `None` when no line could be parsed.
pub fn parse_probe_output(output: &str) -> Option<GpuSnapshot> {
    let mut snapshot = GpuSnapshot::new();
    for line in output.lines() {
        let mut parts = line.split_whitespace();
        let (Some(model), Some(count), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        match count.parse::<u32>() {
            Ok(count) => {
                snapshot.insert(model.to_lowercase(), count);
            }
            Err(_) => debug!(line, "Ignoring malformed probe line"),
        }
    }
    if snapshot.is_empty() { None } else { Some(snapshot) }
}

/// Runs the configured executable with no arguments under a hard timeout.
pub struct ScriptProbe {
    path: PathBuf,
    timeout: Duration,
}

impl ScriptProbe {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self { path, timeout }
    }
}

#[async_trait]
impl AvailabilityProbe for ScriptProbe {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn snapshot(&self) -> Option<GpuSnapshot> {
        let child = Command::new(&self.path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to run GPU probe");
                return None;
            }
            Err(_) => {
                warn!(timeout = ?self.timeout, "GPU probe timed out");
                return None;
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, %stderr, "GPU probe exited with failure");
            return None;
        }

        let snapshot = parse_probe_output(&String::from_utf8_lossy(&output.stdout));
        if snapshot.is_none() {
            warn!("GPU probe produced no parseable lines");
        }
        snapshot
    }
}

/// Fixed answer, used when no probe is configured and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticProbe {
    snapshot: Option<GpuSnapshot>,
}

impl StaticProbe {
    pub fn new(snapshot: GpuSnapshot) -> Self {
        Self { snapshot: Some(snapshot) }
    }

    /// A probe that never answers
    pub fn unavailable() -> Self {
        Self { snapshot: None }
    }
}

#[async_trait]
impl AvailabilityProbe for StaticProbe {
    async fn snapshot(&self) -> Option<GpuSnapshot> {
        self.snapshot.clone()
    }
}

pub fn create_probe(config: &ProbeConfig) -> Box<dyn AvailabilityProbe> {
    match &config.path {
        Some(path) => Box::new(ScriptProbe::new(path.clone(), config.timeout)),
        None => Box::new(StaticProbe::unavailable()),
    }
}

//! API models for GPU availability.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Free GPUs per model as reported by the probe.
pub type AvailableGpus = BTreeMap<String, u32>;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GpuCatalogResponse {
    /// Free GPUs per model as reported by the probe; empty when the probe is unavailable
    pub gpus: AvailableGpus,
    /// Whether the probe answered
    pub probe_available: bool,
    /// GPU types a request may ask for
    pub gpu_types: Vec<String>,
}

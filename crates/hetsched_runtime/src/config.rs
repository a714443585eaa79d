//! Runtime configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::host::HostDeviceSpec;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::SchedulerPolicy;

/// Constructor-time runtime settings.
///
/// ```json
/// {
///   "scheduler": "pams",
///   "host_devices": [
///     { "name": "cpu", "device_type": "cpu", "compute_units": 4 },
///     { "name": "gpu", "device_type": "gpu", "compute_units": 32 }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scheduling policy.
    pub scheduler: SchedulerPolicy,
    /// Simulated host devices. Empty means one detected CPU.
    pub host_devices: Vec<HostDeviceSpec>,
}

impl RuntimeConfig {
    /// Set the scheduling policy.
    pub fn with_scheduler(mut self, policy: SchedulerPolicy) -> Self {
        self.scheduler = policy;
        self
    }

    /// Add a host device.
    pub fn with_host_device(mut self, spec: HostDeviceSpec) -> Self {
        self.host_devices.push(spec);
        self
    }

    /// Parse from JSON text.
    pub fn from_json(json: &str) -> RuntimeResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| RuntimeError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> RuntimeResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| RuntimeError::Config(format!("Failed to serialize config: {}", e)))
    }
}

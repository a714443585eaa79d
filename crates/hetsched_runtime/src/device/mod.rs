//! Device abstractions for heterogeneous task execution.
//!
//! A [`Device`] is a handle to one execution unit discovered by a backend at
//! startup. It owns the backend's execution queue for that unit; the queue
//! lives exactly as long as the device.

mod registry;

pub use registry::*;

pub use crate::error::Platform;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::backend::DeviceQueue;
use crate::error::{RuntimeError, RuntimeResult};

/// Device type enumeration.
///
/// Scheduling policies route work by device type, so every backend maps its
/// native device classes onto these three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum DeviceType {
    /// General purpose processor.
    Cpu = 0,
    /// Graphics processor.
    Gpu = 1,
    /// Any other accelerator (DSP, NPU, FPGA...).
    Accelerator = 2,
}

impl DeviceType {
    /// All device types, in score order.
    pub const ALL: [DeviceType; 3] = [DeviceType::Cpu, DeviceType::Gpu, DeviceType::Accelerator];

    /// Check if this is a GPU device type.
    pub fn is_gpu(&self) -> bool {
        matches!(self, DeviceType::Gpu)
    }

    /// Index into per-type tables.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            DeviceType::Cpu => "CPU",
            DeviceType::Gpu => "GPU",
            DeviceType::Accelerator => "Accelerator",
        })
    }
}

impl std::str::FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(DeviceType::Cpu),
            "gpu" => Ok(DeviceType::Gpu),
            "accelerator" | "acc" => Ok(DeviceType::Accelerator),
            other => Err(format!("unknown device type '{}'", other)),
        }
    }
}

/// Unique device identifier, assigned once and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u32);

impl DeviceId {
    /// Create a device ID from a raw value.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("#{}", self.0))
    }
}

/// Hands out monotonically increasing device ids.
///
/// Owned by the runtime's registry construction step; two runtimes have
/// independent allocators.
#[derive(Debug, Default)]
pub struct DeviceIdAllocator {
    next: AtomicU32,
}

impl DeviceIdAllocator {
    /// Create an allocator starting at id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id.
    pub fn allocate(&self) -> DeviceId {
        DeviceId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }
}

/// One execution unit and its execution queue.
pub struct Device {
    id: DeviceId,
    device_type: DeviceType,
    platform: Platform,
    name: String,
    compute_units: u32,
    queue: Arc<dyn DeviceQueue>,
}

impl Device {
    /// Create a device. Called by backends during discovery.
    pub fn new(
        id: DeviceId,
        device_type: DeviceType,
        platform: Platform,
        name: impl Into<String>,
        compute_units: u32,
        queue: Arc<dyn DeviceQueue>,
    ) -> Self {
        Self {
            id,
            device_type,
            platform,
            name: name.into(),
            compute_units,
            queue,
        }
    }

    /// Device id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Device type.
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    /// Backend platform tag.
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parallel compute units.
    pub fn compute_units(&self) -> u32 {
        self.compute_units
    }

    /// The backend execution queue.
    pub fn queue(&self) -> &Arc<dyn DeviceQueue> {
        &self.queue
    }

    /// Block until every command enqueued on this device has completed.
    pub fn finish(&self) -> RuntimeResult<()> {
        self.queue.finish().map_err(|e| RuntimeError::DeviceFinish {
            device: self.id,
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("device_type", &self.device_type)
            .field("platform", &self.platform)
            .field("name", &self.name)
            .field("compute_units", &self.compute_units)
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.device_type, self.id, self.name)
    }
}

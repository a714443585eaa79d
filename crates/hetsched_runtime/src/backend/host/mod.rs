//! In-process host backend.
//!
//! Kernels are Rust functions collected in a [`KernelLibrary`]. Each host
//! device is a simulated execution unit presented as a CPU, GPU or
//! accelerator, so heterogeneous scheduling runs without vendor drivers.
//! Kernels execute synchronously on the calling worker thread.

mod library;

pub use library::*;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::backend::{Backend, DeviceMemory, DeviceQueue, ProgramObject, ProgramSource};
use crate::device::{Device, DeviceId, DeviceIdAllocator, DeviceType};
use crate::error::{Platform, RuntimeError, RuntimeResult};
use crate::memory::{BufferMapping, MapAccess};

/// Description of one simulated host device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostDeviceSpec {
    /// Human-readable name.
    pub name: String,
    /// Type the device is presented as.
    pub device_type: DeviceType,
    /// Reported compute units.
    #[serde(default = "default_compute_units")]
    pub compute_units: u32,
    /// Largest single allocation in bytes, unlimited if unset.
    #[serde(default)]
    pub max_allocation: Option<usize>,
}

fn default_compute_units() -> u32 {
    1
}

impl HostDeviceSpec {
    /// A device of the given type.
    pub fn new(name: impl Into<String>, device_type: DeviceType, compute_units: u32) -> Self {
        Self {
            name: name.into(),
            device_type,
            compute_units,
            max_allocation: None,
        }
    }

    /// A CPU device.
    pub fn cpu(name: impl Into<String>, compute_units: u32) -> Self {
        Self::new(name, DeviceType::Cpu, compute_units)
    }

    /// A GPU device.
    pub fn gpu(name: impl Into<String>, compute_units: u32) -> Self {
        Self::new(name, DeviceType::Gpu, compute_units)
    }

    /// An accelerator device.
    pub fn accelerator(name: impl Into<String>, compute_units: u32) -> Self {
        Self::new(name, DeviceType::Accelerator, compute_units)
    }

    /// One CPU device covering every logical core of this machine.
    pub fn detect_cpu() -> Self {
        Self::cpu("Host CPU", num_cpus::get() as u32)
    }

    /// Limit single allocations to `bytes`.
    pub fn with_max_allocation(mut self, bytes: usize) -> Self {
        self.max_allocation = Some(bytes);
        self
    }
}

/// Host device memory.
pub struct HostMemory {
    size: usize,
    data: Mutex<Vec<u8>>,
}

impl HostMemory {
    /// Allocate `size` zeroed bytes.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            data: Mutex::new(vec![0u8; size]),
        }
    }
}

impl DeviceMemory for HostMemory {
    fn size(&self) -> usize {
        self.size
    }

    fn map(&self, access: MapAccess) -> RuntimeResult<BufferMapping<'_>> {
        let guard = self
            .data
            .try_lock()
            .ok_or_else(|| RuntimeError::MappingFailed("Buffer already mapped".to_string()))?;
        let bytes = parking_lot::MutexGuard::map(guard, |data| data.as_mut_slice());
        Ok(BufferMapping::new(bytes, access))
    }
}

/// Execution queue of a host device.
///
/// Launches run synchronously, so the queue is always drained.
#[derive(Debug, Default)]
pub struct HostQueue {
    max_allocation: Option<usize>,
    launches: AtomicU64,
    allocations: AtomicU64,
}

impl HostQueue {
    fn new(max_allocation: Option<usize>) -> Self {
        Self {
            max_allocation,
            ..Self::default()
        }
    }

    /// Kernels launched on this queue.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }

    /// Allocations made on this queue.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    pub(crate) fn record_launch(&self) {
        self.launches.fetch_add(1, Ordering::Relaxed);
    }
}

impl DeviceQueue for HostQueue {
    fn allocate(&self, size: usize) -> RuntimeResult<Arc<dyn DeviceMemory>> {
        if let Some(limit) = self.max_allocation {
            if size > limit {
                return Err(RuntimeError::allocation(
                    size,
                    format!("exceeds device limit of {} bytes", limit),
                ));
            }
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(HostMemory::new(size)))
    }

    fn finish(&self) -> RuntimeResult<()> {
        std::sync::atomic::fence(Ordering::SeqCst);
        Ok(())
    }
}

/// Host backend.
pub struct HostBackend {
    specs: Vec<HostDeviceSpec>,
    queues: RwLock<HashMap<DeviceId, Arc<HostQueue>>>,
}

impl HostBackend {
    /// A backend exposing one device per spec.
    pub fn new(specs: Vec<HostDeviceSpec>) -> Self {
        Self {
            specs,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// A backend exposing one CPU device sized to this machine.
    pub fn detect() -> Self {
        Self::new(vec![HostDeviceSpec::detect_cpu()])
    }

    /// Queue of a device discovered by this backend.
    pub fn queue(&self, id: DeviceId) -> Option<Arc<HostQueue>> {
        self.queues.read().get(&id).cloned()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::detect()
    }
}

impl Backend for HostBackend {
    fn platform(&self) -> Platform {
        Platform::Host
    }

    fn name(&self) -> &str {
        "host"
    }

    fn discover(&self, ids: &DeviceIdAllocator) -> RuntimeResult<Vec<Device>> {
        let mut queues = self.queues.write();

        Ok(self
            .specs
            .iter()
            .map(|spec| {
                let id = ids.allocate();
                let queue = Arc::new(HostQueue::new(spec.max_allocation));
                queues.insert(id, queue.clone());
                Device::new(
                    id,
                    spec.device_type,
                    Platform::Host,
                    spec.name.clone(),
                    spec.compute_units,
                    queue,
                )
            })
            .collect())
    }

    fn compile(
        &self,
        device: &Device,
        source: &ProgramSource,
        _flags: Option<&str>,
    ) -> RuntimeResult<Arc<dyn ProgramObject>> {
        let queue = self.queue(device.id()).ok_or_else(|| {
            RuntimeError::backend(
                Platform::Host,
                format!("device {} was not discovered by this backend", device.id()),
            )
        })?;

        match source {
            ProgramSource::Text(text) => Err(RuntimeError::backend(
                Platform::Host,
                format!(
                    "{}: cannot build kernel source text ({} bytes)",
                    device,
                    text.len()
                ),
            )),
            ProgramSource::Host(library) => {
                if !library.supports(device.device_type()) {
                    return Err(RuntimeError::backend(
                        Platform::Host,
                        format!(
                            "{}: kernel library does not target {} devices",
                            device,
                            device.device_type()
                        ),
                    ));
                }
                Ok(Arc::new(HostProgramObject::new(
                    library.clone(),
                    device.id(),
                    queue,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discover(specs: Vec<HostDeviceSpec>) -> (HostBackend, Vec<Device>) {
        let backend = HostBackend::new(specs);
        let devices = backend.discover(&DeviceIdAllocator::new()).unwrap();
        (backend, devices)
    }

    #[test]
    fn test_host_discovery() {
        let (backend, devices) = discover(vec![
            HostDeviceSpec::cpu("cpu", 8),
            HostDeviceSpec::gpu("gpu", 64),
        ]);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].device_type(), DeviceType::Gpu);
        assert_eq!(devices[1].compute_units(), 64);
        assert!(backend.queue(devices[0].id()).is_some());
    }

    #[test]
    fn test_host_memory_mapping() {
        let memory = HostMemory::new(8);
        {
            let mut mapping = memory.map(MapAccess::Write).unwrap();
            mapping.set::<u32>(1, 7);

            // A second mapping while the first is live is refused.
            assert!(matches!(
                memory.map(MapAccess::Read),
                Err(RuntimeError::MappingFailed(_))
            ));
        }
        let mapping = memory.map(MapAccess::Read).unwrap();
        assert_eq!(mapping.get::<u32>(1), Some(7));
    }

    #[test]
    fn test_allocation_limit() {
        let (_, devices) = discover(vec![HostDeviceSpec::cpu("small", 1).with_max_allocation(16)]);
        let queue = devices[0].queue();
        assert!(queue.allocate(16).is_ok());
        assert!(matches!(
            queue.allocate(17),
            Err(RuntimeError::BufferConstruction { size: 17, .. })
        ));
    }

    #[test]
    fn test_compile_failures() {
        let (backend, devices) = discover(vec![
            HostDeviceSpec::cpu("cpu", 1),
            HostDeviceSpec::gpu("gpu", 1),
        ]);

        let text = ProgramSource::Text("__kernel void k() {}".to_string());
        assert!(backend.compile(&devices[0], &text, None).is_err());

        let library = KernelLibrary::new()
            .with_kernel("noop", |_| Ok(()))
            .restrict_to([DeviceType::Gpu]);
        let source = ProgramSource::from(library);
        assert!(backend.compile(&devices[0], &source, None).is_err());
        assert!(backend.compile(&devices[1], &source, None).unwrap().valid());
    }

    #[test]
    fn test_spec_from_json() {
        let spec: HostDeviceSpec =
            serde_json::from_str(r#"{"name": "dsp", "device_type": "accelerator"}"#).unwrap();
        assert_eq!(spec.device_type, DeviceType::Accelerator);
        assert_eq!(spec.compute_units, 1);
        assert_eq!(spec.max_allocation, None);
    }
}

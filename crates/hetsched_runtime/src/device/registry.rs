//! Fixed registry of the devices discovered at startup.

use std::sync::Arc;

use super::{Device, DeviceId, DeviceIdAllocator, DeviceType};
use crate::backend::Backend;
use crate::error::{RuntimeError, RuntimeResult};

/// Ordered, immutable set of devices.
///
/// Built once from every backend's discovery and never mutated afterwards;
/// device order is discovery order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<Device>>,
}

impl DeviceRegistry {
    /// Run discovery on every backend, assigning ids from `ids`.
    ///
    /// Backends that fail discovery are skipped with a warning. An empty
    /// result is [`RuntimeError::NoDevices`].
    pub fn discover(backends: &[Arc<dyn Backend>], ids: &DeviceIdAllocator) -> RuntimeResult<Self> {
        let mut devices = Vec::new();

        for backend in backends {
            match backend.discover(ids) {
                Ok(found) => {
                    tracing::info!(
                        "Discovered {} {} device(s)",
                        found.len(),
                        backend.platform()
                    );
                    devices.extend(found.into_iter().map(Arc::new));
                }
                Err(e) => {
                    tracing::warn!("{} discovery failed: {}", backend.platform(), e);
                }
            }
        }

        if devices.is_empty() {
            return Err(RuntimeError::NoDevices);
        }

        Ok(Self { devices })
    }

    /// Build a registry from already constructed devices.
    pub fn from_devices(devices: Vec<Arc<Device>>) -> Self {
        Self { devices }
    }

    /// Get a device by ID.
    pub fn get(&self, id: DeviceId) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.id() == id)
    }

    /// All devices in discovery order.
    pub fn all(&self) -> &[Arc<Device>] {
        &self.devices
    }

    /// Get all devices of a specific type.
    pub fn of_type(&self, device_type: DeviceType) -> impl Iterator<Item = &Arc<Device>> {
        self.devices
            .iter()
            .filter(move |d| d.device_type() == device_type)
    }

    /// Whether at least one device of `device_type` exists.
    pub fn has_type(&self, device_type: DeviceType) -> bool {
        self.of_type(device_type).next().is_some()
    }

    /// Get the total number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// One line per device, for logs and the CLI.
    pub fn summary(&self) -> Vec<String> {
        self.devices
            .iter()
            .map(|d| {
                format!(
                    "{:>4}  {:<11} {:<12} {:>3} CUs  {}",
                    d.id(),
                    d.device_type(),
                    d.platform(),
                    d.compute_units(),
                    d.name()
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::{HostBackend, HostDeviceSpec};

    fn backend(specs: Vec<HostDeviceSpec>) -> Arc<dyn Backend> {
        Arc::new(HostBackend::new(specs))
    }

    #[test]
    fn test_registry_discovery_order() {
        let ids = DeviceIdAllocator::new();
        let registry = DeviceRegistry::discover(
            &[
                backend(vec![HostDeviceSpec::cpu("cpu0", 4)]),
                backend(vec![
                    HostDeviceSpec::gpu("gpu0", 16),
                    HostDeviceSpec::accelerator("dsp0", 2),
                ]),
            ],
            &ids,
        )
        .unwrap();

        assert_eq!(registry.len(), 3);
        let raw: Vec<u32> = registry.all().iter().map(|d| d.id().raw()).collect();
        assert_eq!(raw, vec![0, 1, 2]);
        assert_eq!(registry.of_type(DeviceType::Gpu).count(), 1);
        assert!(registry.has_type(DeviceType::Accelerator));
        assert_eq!(registry.get(DeviceId::new(1)).unwrap().name(), "gpu0");
        assert_eq!(registry.summary().len(), 3);
    }

    #[test]
    fn test_registry_empty_is_error() {
        let ids = DeviceIdAllocator::new();
        let err = DeviceRegistry::discover(&[backend(vec![])], &ids).unwrap_err();
        assert!(matches!(err, RuntimeError::NoDevices));
    }
}

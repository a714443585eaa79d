//! Programs: one source compiled for every device that accepts it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::backend::{Backend, ProgramObject, ProgramSource};
use crate::device::{DeviceId, DeviceRegistry, DeviceType};
use crate::error::{RuntimeError, RuntimeResult};
use crate::runtime::Runtime;

/// Per-device program objects built from one source.
///
/// Devices whose build failed have no entry. A program therefore restricts
/// the tasks using it to the devices it covers.
#[derive(Clone, Default)]
pub struct Program {
    objects: BTreeMap<DeviceId, (DeviceType, Arc<dyn ProgramObject>)>,
    device_types: BTreeSet<DeviceType>,
}

impl Program {
    /// Compile `source` on every device of `runtime`.
    ///
    /// Build failures on individual devices are logged and skipped; the call
    /// fails only when no device accepted the source.
    pub fn compile(
        runtime: &Runtime,
        source: impl Into<ProgramSource>,
        flags: Option<&str>,
    ) -> RuntimeResult<Arc<Self>> {
        Self::build(runtime.registry(), runtime.backends(), &source.into(), flags).map(Arc::new)
    }

    pub(crate) fn build(
        registry: &DeviceRegistry,
        backends: &[Arc<dyn Backend>],
        source: &ProgramSource,
        flags: Option<&str>,
    ) -> RuntimeResult<Self> {
        let mut program = Program::default();
        let mut logs = Vec::new();

        for device in registry.all() {
            let Some(backend) = backends.iter().find(|b| b.platform() == device.platform()) else {
                continue;
            };

            match backend.compile(device, source, flags) {
                Ok(object) if object.valid() => {
                    program.insert(device.id(), device.device_type(), object)
                }
                Ok(_) => {
                    tracing::warn!("Program object for {} is not valid", device);
                    logs.push(format!("{}: invalid program object", device));
                }
                Err(e) => {
                    tracing::warn!("Compilation failed on {}: {}", device, e);
                    logs.push(e.to_string());
                }
            }
        }

        if program.objects.is_empty() {
            if logs.is_empty() {
                logs.push("no backend can build this source".to_string());
            }
            return Err(RuntimeError::ProgramCompilation(logs.join("\n")));
        }

        tracing::debug!(
            "Program built for {} device(s): {:?}",
            program.objects.len(),
            program.device_types
        );
        Ok(program)
    }

    fn insert(&mut self, id: DeviceId, device_type: DeviceType, object: Arc<dyn ProgramObject>) {
        self.objects.insert(id, (device_type, object));
        self.device_types.insert(device_type);
    }

    /// Merge programs in preference order.
    ///
    /// A later program only contributes device types that no earlier program
    /// already covers. An empty list is [`RuntimeError::EmptyProgram`].
    pub fn merge(programs: &[Arc<Program>]) -> RuntimeResult<Self> {
        if programs.is_empty() {
            return Err(RuntimeError::EmptyProgram);
        }

        let mut merged = Program::default();
        for program in programs {
            let covered = merged.device_types.clone();
            for (id, (device_type, object)) in &program.objects {
                if !covered.contains(device_type) {
                    merged.insert(*id, *device_type, object.clone());
                }
            }
        }
        Ok(merged)
    }

    /// Assemble a program from already built per-device objects.
    pub fn from_objects(
        objects: impl IntoIterator<Item = (DeviceId, DeviceType, Arc<dyn ProgramObject>)>,
    ) -> Self {
        let mut program = Program::default();
        for (id, device_type, object) in objects {
            program.insert(id, device_type, object);
        }
        program
    }

    /// Whether the program built for device `id`.
    pub fn has_device_id(&self, id: DeviceId) -> bool {
        self.objects.contains_key(&id)
    }

    /// Whether the program built for at least one device of `device_type`.
    pub fn has_device_type(&self, device_type: DeviceType) -> bool {
        self.device_types.contains(&device_type)
    }

    /// Devices the program built for, in id order.
    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.objects.keys().copied()
    }

    /// Device types the program covers.
    pub fn device_types(&self) -> &BTreeSet<DeviceType> {
        &self.device_types
    }

    /// Program object for device `id`.
    pub fn object(&self, id: DeviceId) -> Option<&Arc<dyn ProgramObject>> {
        self.objects.get(&id).map(|(_, object)| object)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("devices", &self.objects.keys().collect::<Vec<_>>())
            .field("device_types", &self.device_types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::host::{HostBackend, HostDeviceSpec, KernelLibrary};
    use crate::device::DeviceIdAllocator;

    fn setup() -> (DeviceRegistry, Vec<Arc<dyn Backend>>) {
        let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(HostBackend::new(vec![
            HostDeviceSpec::cpu("cpu", 4),
            HostDeviceSpec::gpu("gpu", 32),
            HostDeviceSpec::accelerator("npu", 2),
        ]))];
        let registry = DeviceRegistry::discover(&backends, &DeviceIdAllocator::new()).unwrap();
        (registry, backends)
    }

    fn library(types: &[DeviceType]) -> ProgramSource {
        KernelLibrary::new()
            .with_kernel("noop", |_| Ok(()))
            .restrict_to(types.iter().copied())
            .into()
    }

    #[test]
    fn test_failed_devices_are_excluded() {
        let (registry, backends) = setup();
        let program =
            Program::build(&registry, &backends, &library(&[DeviceType::Gpu]), None).unwrap();

        assert!(program.has_device_type(DeviceType::Gpu));
        assert!(!program.has_device_type(DeviceType::Cpu));
        assert!(program.has_device_id(DeviceId::new(1)));
        assert!(!program.has_device_id(DeviceId::new(0)));
        assert_eq!(program.device_ids().count(), 1);
        assert!(program.object(DeviceId::new(1)).is_some());
    }

    #[test]
    fn test_all_devices_fail() {
        let (registry, backends) = setup();
        let source = ProgramSource::Text("__kernel void k() {}".to_string());
        let err = Program::build(&registry, &backends, &source, None).unwrap_err();
        match err {
            RuntimeError::ProgramCompilation(log) => assert_eq!(log.lines().count(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_preference_order() {
        let (registry, backends) = setup();
        let gpu_first = Arc::new(
            Program::build(&registry, &backends, &library(&[DeviceType::Gpu]), None).unwrap(),
        );
        let all = Arc::new(
            Program::build(
                &registry,
                &backends,
                &library(&[DeviceType::Cpu, DeviceType::Gpu, DeviceType::Accelerator]),
                None,
            )
            .unwrap(),
        );

        let merged = Program::merge(&[gpu_first.clone(), all.clone()]).unwrap();
        assert_eq!(merged.device_ids().count(), 3);
        // The GPU entry comes from the preferred program.
        assert!(Arc::ptr_eq(
            merged.object(DeviceId::new(1)).unwrap(),
            gpu_first.object(DeviceId::new(1)).unwrap()
        ));
        assert!(Arc::ptr_eq(
            merged.object(DeviceId::new(0)).unwrap(),
            all.object(DeviceId::new(0)).unwrap()
        ));

        assert!(matches!(Program::merge(&[]), Err(RuntimeError::EmptyProgram)));
    }
}

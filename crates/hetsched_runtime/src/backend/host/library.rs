//! Host kernel libraries and their per-device program and kernel objects.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use super::HostQueue;
use crate::backend::{KernelArg, KernelObject, ProgramObject};
use crate::device::{DeviceId, DeviceType};
use crate::error::{RuntimeError, RuntimeResult};
use crate::kernel::{Scalar, WorkRange};
use crate::memory::{BufferMapping, MapAccess};

/// Signature of a host kernel.
pub type HostKernelFn = dyn Fn(&mut HostKernelContext<'_>) -> RuntimeResult<()> + Send + Sync;

/// Named host kernels, the host backend's program source.
#[derive(Clone, Default)]
pub struct KernelLibrary {
    kernels: BTreeMap<String, Arc<HostKernelFn>>,
    targets: Option<BTreeSet<DeviceType>>,
}

impl KernelLibrary {
    /// Create an empty library targeting every device type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a kernel.
    pub fn with_kernel<F>(mut self, name: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(&mut HostKernelContext<'_>) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.register(name, kernel);
        self
    }

    /// Add or replace a kernel.
    pub fn register<F>(&mut self, name: impl Into<String>, kernel: F)
    where
        F: Fn(&mut HostKernelContext<'_>) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(kernel));
    }

    /// Only build for devices of the given types.
    pub fn restrict_to(mut self, types: impl IntoIterator<Item = DeviceType>) -> Self {
        self.targets = Some(types.into_iter().collect());
        self
    }

    /// Whether the library builds for `device_type`.
    pub fn supports(&self, device_type: DeviceType) -> bool {
        self.targets
            .as_ref()
            .map_or(true, |targets| targets.contains(&device_type))
    }

    /// Look up a kernel.
    pub fn get(&self, name: &str) -> Option<Arc<HostKernelFn>> {
        self.kernels.get(name).cloned()
    }

    /// Kernel names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.kernels.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for KernelLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelLibrary")
            .field("kernels", &self.names())
            .field("targets", &self.targets)
            .finish()
    }
}

/// A kernel library built for one host device.
pub struct HostProgramObject {
    library: Arc<KernelLibrary>,
    device: DeviceId,
    queue: Arc<HostQueue>,
}

impl HostProgramObject {
    pub(crate) fn new(library: Arc<KernelLibrary>, device: DeviceId, queue: Arc<HostQueue>) -> Self {
        Self {
            library,
            device,
            queue,
        }
    }
}

impl ProgramObject for HostProgramObject {
    fn valid(&self) -> bool {
        true
    }

    fn create_kernel_object(&self, name: &str) -> RuntimeResult<Box<dyn KernelObject>> {
        let func = self.library.get(name).ok_or_else(|| {
            RuntimeError::kernel_construction(name, "no such kernel in library")
        })?;

        Ok(Box::new(HostKernelObject {
            name: name.to_string(),
            func,
            device: self.device,
            queue: self.queue.clone(),
            args: Vec::new(),
        }))
    }
}

/// Argument slots available to one host kernel.
pub const MAX_KERNEL_ARGS: u32 = 64;

/// A host kernel with its bound arguments.
pub struct HostKernelObject {
    name: String,
    func: Arc<HostKernelFn>,
    device: DeviceId,
    queue: Arc<HostQueue>,
    args: Vec<Option<KernelArg>>,
}

impl KernelObject for HostKernelObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_arg(&mut self, index: u32, arg: KernelArg) -> RuntimeResult<()> {
        if index >= MAX_KERNEL_ARGS {
            return Err(RuntimeError::KernelArg {
                index,
                reason: format!(
                    "kernel '{}' accepts at most {} arguments",
                    self.name, MAX_KERNEL_ARGS
                ),
            });
        }
        let slot = index as usize;
        if self.args.len() <= slot {
            self.args.resize(slot + 1, None);
        }
        self.args[slot] = Some(arg);
        Ok(())
    }

    fn run(&mut self, range: WorkRange) -> RuntimeResult<()> {
        if let Some(missing) = self.args.iter().position(Option::is_none) {
            return Err(RuntimeError::KernelArg {
                index: missing as u32,
                reason: format!("argument of kernel '{}' was never set", self.name),
            });
        }

        let mut ctx = HostKernelContext {
            range,
            device: self.device,
            args: &self.args,
        };
        self.queue.record_launch();

        (self.func)(&mut ctx).map_err(|e| match e {
            e @ RuntimeError::KernelExecution { .. } => e,
            other => RuntimeError::kernel_execution(&self.name, self.device, other.to_string()),
        })
    }
}

/// What a host kernel sees while it runs.
pub struct HostKernelContext<'a> {
    range: WorkRange,
    device: DeviceId,
    args: &'a [Option<KernelArg>],
}

impl<'a> HostKernelContext<'a> {
    /// Work range of this launch.
    pub fn range(&self) -> WorkRange {
        self.range
    }

    /// Device executing the kernel.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Number of argument slots.
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    fn arg(&self, index: usize) -> RuntimeResult<&'a KernelArg> {
        self.args
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| RuntimeError::KernelArg {
                index: index as u32,
                reason: "not set".to_string(),
            })
    }

    /// Map buffer argument `index` for reading and writing.
    ///
    /// Two live mappings of the same allocation are refused.
    pub fn buffer(&self, index: usize) -> RuntimeResult<BufferMapping<'a>> {
        match self.arg(index)? {
            KernelArg::Buffer(memory) => memory.map(MapAccess::ReadWrite),
            KernelArg::Scalar(_) => Err(RuntimeError::KernelArg {
                index: index as u32,
                reason: "expected a buffer, found a scalar".to_string(),
            }),
        }
    }

    /// Scalar argument `index`.
    pub fn scalar(&self, index: usize) -> RuntimeResult<Scalar> {
        match self.arg(index)? {
            KernelArg::Scalar(value) => Ok(*value),
            KernelArg::Buffer(_) => Err(RuntimeError::KernelArg {
                index: index as u32,
                reason: "expected a scalar, found a buffer".to_string(),
            }),
        }
    }

    /// Scalar argument `index` as `i32`.
    pub fn i32(&self, index: usize) -> RuntimeResult<i32> {
        match self.scalar(index)? {
            Scalar::I32(v) => Ok(v),
            other => Err(type_mismatch(index, "i32", other)),
        }
    }

    /// Scalar argument `index` as `u32`.
    pub fn u32(&self, index: usize) -> RuntimeResult<u32> {
        match self.scalar(index)? {
            Scalar::U32(v) => Ok(v),
            other => Err(type_mismatch(index, "u32", other)),
        }
    }

    /// Scalar argument `index` as `f32`.
    pub fn f32(&self, index: usize) -> RuntimeResult<f32> {
        match self.scalar(index)? {
            Scalar::F32(v) => Ok(v),
            other => Err(type_mismatch(index, "f32", other)),
        }
    }
}

fn type_mismatch(index: usize, expected: &str, found: Scalar) -> RuntimeError {
    RuntimeError::KernelArg {
        index: index as u32,
        reason: format!("expected {}, found {:?}", expected, found),
    }
}

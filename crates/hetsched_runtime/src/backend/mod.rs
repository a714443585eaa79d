//! Backend capability interface.
//!
//! A backend exposes the devices of one platform and the per-device objects
//! the scheduling engine drives: execution queues, memory, compiled programs
//! and kernel objects. The engine only talks to these traits; each platform
//! implements them once and is selected by the device's platform tag.

pub mod host;

use std::fmt;
use std::sync::Arc;

use crate::device::{Device, DeviceIdAllocator};
use crate::error::{Platform, RuntimeResult};
use crate::kernel::{Scalar, WorkRange};
use crate::memory::{BufferMapping, MapAccess};

use self::host::KernelLibrary;

/// Platform backend: discovery and program compilation.
pub trait Backend: Send + Sync + 'static {
    /// Platform tag of every device this backend discovers.
    fn platform(&self) -> Platform;

    /// Get the backend name identifier.
    fn name(&self) -> &str;

    /// Enumerate the backend's devices, assigning ids from `ids`.
    fn discover(&self, ids: &DeviceIdAllocator) -> RuntimeResult<Vec<Device>>;

    /// Build `source` for one device.
    ///
    /// Failure is reported per device; the caller decides whether it is
    /// fatal.
    fn compile(
        &self,
        device: &Device,
        source: &ProgramSource,
        flags: Option<&str>,
    ) -> RuntimeResult<Arc<dyn ProgramObject>>;
}

/// Program source handed to [`Backend::compile`].
#[derive(Clone)]
pub enum ProgramSource {
    /// Kernel source text for a compiling backend.
    Text(String),
    /// Library of host kernels.
    Host(Arc<KernelLibrary>),
}

impl fmt::Debug for ProgramSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramSource::Text(text) => write!(f, "Text({} bytes)", text.len()),
            ProgramSource::Host(library) => write!(f, "Host({:?})", library.names()),
        }
    }
}

impl From<KernelLibrary> for ProgramSource {
    fn from(library: KernelLibrary) -> Self {
        ProgramSource::Host(Arc::new(library))
    }
}

impl From<Arc<KernelLibrary>> for ProgramSource {
    fn from(library: Arc<KernelLibrary>) -> Self {
        ProgramSource::Host(library)
    }
}

/// Execution queue owned by a device.
pub trait DeviceQueue: Send + Sync {
    /// Allocate `size` bytes of device memory.
    fn allocate(&self, size: usize) -> RuntimeResult<Arc<dyn DeviceMemory>>;

    /// Block until every enqueued command has completed.
    fn finish(&self) -> RuntimeResult<()>;
}

/// Device-resident allocation.
///
/// The allocation is released when the last handle is dropped.
pub trait DeviceMemory: Send + Sync {
    /// Size in bytes.
    fn size(&self) -> usize;

    /// Map the allocation for host access.
    ///
    /// The memory is unmapped when the mapping is dropped.
    fn map(&self, access: MapAccess) -> RuntimeResult<BufferMapping<'_>>;
}

/// Program compiled for one device.
pub trait ProgramObject: Send + Sync {
    /// Whether the program built successfully.
    fn valid(&self) -> bool;

    /// Instantiate the named entry point.
    fn create_kernel_object(&self, name: &str) -> RuntimeResult<Box<dyn KernelObject>>;
}

/// One instantiated entry point with its argument bindings.
pub trait KernelObject: Send {
    /// Entry point name.
    fn name(&self) -> &str;

    /// Bind argument `index`.
    fn set_arg(&mut self, index: u32, arg: KernelArg) -> RuntimeResult<()>;

    /// Launch over `range` on the owning device's queue.
    fn run(&mut self, range: WorkRange) -> RuntimeResult<()>;
}

/// Kernel argument value.
#[derive(Clone)]
pub enum KernelArg {
    /// Device memory resident on the kernel's device.
    Buffer(Arc<dyn DeviceMemory>),
    /// Primitive value.
    Scalar(Scalar),
}

impl fmt::Debug for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::Buffer(memory) => write!(f, "Buffer({} bytes)", memory.size()),
            KernelArg::Scalar(value) => write!(f, "Scalar({:?})", value),
        }
    }
}

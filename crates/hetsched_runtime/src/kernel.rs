//! Kernels: one device entry point with its work range and arguments.

use std::fmt;
use std::sync::Arc;

use crate::backend::{KernelArg, KernelObject, ProgramObject};
use crate::device::Device;
use crate::error::{RuntimeError, RuntimeResult};
use crate::memory::Buffer;

/// Work range of a kernel launch, 1 to 3 axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkRange {
    /// Work items along x.
    pub x: usize,
    /// Work items along y.
    pub y: usize,
    /// Work items along z.
    pub z: usize,
}

impl WorkRange {
    /// A 3-axis range.
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// A 1-axis range.
    pub fn linear(x: usize) -> Self {
        Self::new(x, 1, 1)
    }

    /// A 2-axis range.
    pub fn planar(x: usize, y: usize) -> Self {
        Self::new(x, y, 1)
    }

    /// Number of axes in use.
    pub fn dimensions(&self) -> u32 {
        if self.z > 1 {
            3
        } else if self.y > 1 {
            2
        } else {
            1
        }
    }

    /// Total work items, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    /// Total work items, or `None` on overflow.
    pub fn checked_len(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    /// Whether the range covers no work items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for WorkRange {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl fmt::Display for WorkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Primitive kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(missing_docs)]
pub enum Scalar {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    /// Size in bytes when passed to a device.
    pub fn size(&self) -> usize {
        match self {
            Scalar::I8(_) | Scalar::U8(_) => 1,
            Scalar::I16(_) | Scalar::U16(_) => 2,
            Scalar::I32(_) | Scalar::U32(_) | Scalar::F32(_) => 4,
            Scalar::I64(_) | Scalar::U64(_) | Scalar::F64(_) => 8,
        }
    }
}

macro_rules! impl_scalar_from {
    ($($t:ty => $variant:ident),*) => {
        $(
            impl From<$t> for Scalar {
                fn from(value: $t) -> Self {
                    Scalar::$variant(value)
                }
            }
        )*
    };
}

impl_scalar_from!(
    i8 => I8, u8 => U8, i16 => I16, u16 => U16, i32 => I32,
    u32 => U32, i64 => I64, u64 => U64, f32 => F32, f64 => F64
);

/// One entry point of a task's program, instantiated on the task's device.
///
/// Kernels are created by [`Task::add_kernel`](crate::task::Task::add_kernel)
/// and configured inside the task's configuration callback, on the worker
/// thread of the device that will run them.
pub struct Kernel {
    name: String,
    device: Arc<Device>,
    object: Box<dyn KernelObject>,
    range: Option<WorkRange>,
    inferred: Option<WorkRange>,
}

impl Kernel {
    pub(crate) fn new(
        name: &str,
        device: Arc<Device>,
        program: &dyn ProgramObject,
    ) -> RuntimeResult<Self> {
        let object = program.create_kernel_object(name)?;
        Ok(Self {
            name: name.to_string(),
            device,
            object,
            range: None,
            inferred: None,
        })
    }

    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device the kernel will run on.
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Set the work range explicitly.
    pub fn set_work_range(&mut self, range: WorkRange) -> &mut Self {
        self.range = Some(range);
        self
    }

    /// Set the work range from per-axis sizes.
    pub fn set_work_size(&mut self, x: usize, y: usize, z: usize) -> &mut Self {
        self.set_work_range(WorkRange::new(x, y, z))
    }

    /// Effective work range: explicit, else inferred from the first
    /// element-typed buffer argument, else 1x1x1.
    pub fn work_range(&self) -> WorkRange {
        self.range.or(self.inferred).unwrap_or_default()
    }

    /// Bind `buffer` as argument `index`, making it resident on this
    /// kernel's device.
    pub fn set_buffer(&mut self, index: u32, buffer: &Arc<Buffer>) -> RuntimeResult<&mut Self> {
        let memory = buffer.bind(&self.device)?;
        self.object.set_arg(index, KernelArg::Buffer(memory))?;

        if self.inferred.is_none() {
            if let Some(extent) = buffer.extent() {
                self.inferred = Some(WorkRange::new(extent.x, extent.y, extent.z));
            }
        }
        Ok(self)
    }

    /// Bind a primitive value as argument `index`.
    pub fn set_scalar(&mut self, index: u32, value: impl Into<Scalar>) -> RuntimeResult<&mut Self> {
        self.object.set_arg(index, KernelArg::Scalar(value.into()))?;
        Ok(self)
    }

    /// Bind the input buffer (argument 0).
    pub fn set_input(&mut self, buffer: &Arc<Buffer>) -> RuntimeResult<&mut Self> {
        self.set_buffer(0, buffer)
    }

    /// Bind the output buffer (argument 1).
    pub fn set_output(&mut self, buffer: &Arc<Buffer>) -> RuntimeResult<&mut Self> {
        self.set_buffer(1, buffer)
    }

    pub(crate) fn run(&mut self) -> RuntimeResult<()> {
        let range = self.work_range();
        if range.checked_len().is_none() {
            return Err(RuntimeError::kernel_execution(
                &self.name,
                self.device.id(),
                format!("work range {} overflows", range),
            ));
        }
        tracing::trace!("Launching '{}' over {} on {}", self.name, range, self.device.id());
        self.object.run(range)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("device", &self.device.id())
            .field("range", &self.work_range())
            .finish()
    }
}

//! Cross-device buffers with lazy, at-most-once migration.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::DeviceMemory;
use crate::device::{Device, DeviceId};
use crate::error::{RuntimeError, RuntimeResult};

use super::transfer::{copy_through_host, download, upload};
use super::{CopySource, Element, HostArray, TransferDirection, TransferStats};

/// Element layouts understood by [`Buffer::for_elements`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 8-bit integer.
    Byte,
    /// Two 8-bit integers.
    Byte2,
    /// Four 8-bit integers.
    Byte4,
    /// 8-bit RGBA pixel.
    Rgba,
    /// 16-bit character.
    Char,
    /// Two 16-bit characters.
    Char2,
    /// Four 16-bit characters.
    Char4,
    /// 16-bit integer.
    Short,
    /// Two 16-bit integers.
    Short2,
    /// Four 16-bit integers.
    Short4,
    /// 32-bit integer.
    Int,
    /// Two 32-bit integers.
    Int2,
    /// Four 32-bit integers.
    Int4,
    /// 32-bit float.
    Float,
    /// Two 32-bit floats.
    Float2,
    /// Four 32-bit floats.
    Float4,
}

impl ElementType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            ElementType::Byte => 1,
            ElementType::Byte2 | ElementType::Char | ElementType::Short => 2,
            ElementType::Byte4
            | ElementType::Rgba
            | ElementType::Char2
            | ElementType::Short2
            | ElementType::Int
            | ElementType::Float => 4,
            ElementType::Char4
            | ElementType::Short4
            | ElementType::Int2
            | ElementType::Float2 => 8,
            ElementType::Int4 | ElementType::Float4 => 16,
        }
    }

    /// Bytes needed for `count` elements, or `None` on overflow.
    pub fn size_for(&self, count: usize) -> Option<usize> {
        self.size().checked_mul(count)
    }
}

/// Element layout and extent of an element-typed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent {
    /// Element layout.
    pub element: ElementType,
    /// Elements along x.
    pub x: usize,
    /// Elements along y.
    pub y: usize,
    /// Elements along z.
    pub z: usize,
}

impl Extent {
    /// Total number of elements, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        self.checked_len().unwrap_or(usize::MAX)
    }

    /// Total number of elements, or `None` on overflow.
    pub fn checked_len(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    /// Whether the extent holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Binding {
    Unbound,
    Bound {
        device: Arc<Device>,
        memory: Arc<dyn DeviceMemory>,
    },
}

struct BufferState {
    binding: Binding,
    pending: Option<CopySource>,
    stats: TransferStats,
}

/// A block of memory that lives on at most one device at a time.
///
/// Device storage is allocated on the first [`bind`](Buffer::bind) and moved
/// when a different device binds it. A pending copy source set with
/// [`set_source`](Buffer::set_source) or
/// [`set_array_source`](Buffer::set_array_source) is applied at the next bind
/// and takes precedence over data left on a previous device.
///
/// Binding happens from the worker thread running the task that uses the
/// buffer. Callers must not hand the same buffer to two tasks that can run
/// concurrently on different devices.
pub struct Buffer {
    size: usize,
    extent: Option<Extent>,
    state: Mutex<BufferState>,
}

impl Buffer {
    /// Create a buffer of `size` bytes.
    pub fn new(size: usize) -> RuntimeResult<Arc<Self>> {
        Self::build(size, None)
    }

    /// Create a buffer holding `x * y * z` elements of `element`.
    pub fn for_elements(
        element: ElementType,
        x: usize,
        y: usize,
        z: usize,
    ) -> RuntimeResult<Arc<Self>> {
        let extent = Extent { element, x, y, z };
        let size = extent
            .checked_len()
            .and_then(|count| element.size_for(count))
            .ok_or_else(|| {
                RuntimeError::allocation(
                    usize::MAX,
                    format!(
                        "{}x{}x{} elements of {:?} overflow the address space",
                        x, y, z, element
                    ),
                )
            })?;
        Self::build(size, Some(extent))
    }

    fn build(size: usize, extent: Option<Extent>) -> RuntimeResult<Arc<Self>> {
        if size == 0 {
            return Err(RuntimeError::allocation(0, "buffer size must be non-zero"));
        }

        Ok(Arc::new(Self {
            size,
            extent,
            state: Mutex::new(BufferState {
                binding: Binding::Unbound,
                pending: None,
                stats: TransferStats::default(),
            }),
        }))
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Element extent, for element-typed buffers.
    pub fn extent(&self) -> Option<Extent> {
        self.extent
    }

    /// Device currently holding the buffer, if any.
    pub fn device_id(&self) -> Option<DeviceId> {
        match &self.state.lock().binding {
            Binding::Bound { device, .. } => Some(device.id()),
            Binding::Unbound => None,
        }
    }

    /// Whether device storage has been allocated.
    pub fn is_bound(&self) -> bool {
        self.device_id().is_some()
    }

    /// Whether a copy source is waiting for the next bind.
    pub fn has_pending_source(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Transfers performed so far.
    pub fn transfer_stats(&self) -> TransferStats {
        self.state.lock().stats
    }

    /// Copy `data` in on the next bind. Replaces any unconsumed source.
    pub fn set_source(&self, data: impl Into<Arc<[u8]>>) -> RuntimeResult<()> {
        self.replace_source(CopySource::Host(data.into()))
    }

    /// Copy typed `values` in on the next bind.
    pub fn set_elements<T: Element>(&self, values: &[T]) -> RuntimeResult<()> {
        self.set_source(super::to_bytes(values))
    }

    /// Copy a managed array or bitmap in on the next bind.
    pub fn set_array_source(&self, array: Arc<dyn HostArray>) -> RuntimeResult<()> {
        self.replace_source(CopySource::Array(array))
    }

    fn replace_source(&self, source: CopySource) -> RuntimeResult<()> {
        if source.len() != self.size {
            return Err(RuntimeError::SizeMismatch {
                expected: self.size,
                got: source.len(),
            });
        }

        if let Some(previous) = self.state.lock().pending.replace(source) {
            tracing::debug!("Discarding unconsumed copy source {:?}", previous);
        }
        Ok(())
    }

    /// Make the buffer resident on `device` and return its storage there.
    ///
    /// Allocates on a new device, then fills the allocation from the pending
    /// source if one exists, otherwise from the previous device's storage.
    /// The previous allocation is released afterwards.
    pub fn bind(&self, device: &Arc<Device>) -> RuntimeResult<Arc<dyn DeviceMemory>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let current = match &state.binding {
            Binding::Bound { device: bound, memory } if bound.id() == device.id() => {
                Some(memory.clone())
            }
            _ => None,
        };

        let memory = match current {
            Some(memory) => memory,
            None => {
                let memory = device.queue().allocate(self.size)?;

                if state.pending.is_none() {
                    if let Binding::Bound {
                        device: old_device,
                        memory: old_memory,
                    } = &state.binding
                    {
                        old_device.finish()?;
                        let bytes = copy_through_host(old_memory.as_ref(), memory.as_ref())?;
                        state.stats.record(TransferDirection::DeviceToDeviceStaged, bytes);
                        tracing::debug!(
                            "Migrated {} bytes from device {} to device {}",
                            bytes,
                            old_device.id(),
                            device.id()
                        );
                    }
                }

                state.binding = Binding::Bound {
                    device: device.clone(),
                    memory: memory.clone(),
                };
                memory
            }
        };

        Self::apply_pending(state, memory.as_ref())?;
        Ok(memory)
    }

    fn apply_pending(state: &mut BufferState, memory: &dyn DeviceMemory) -> RuntimeResult<()> {
        if let Some(source) = state.pending.take() {
            match upload(&source, memory) {
                Ok(bytes) => state.stats.record(TransferDirection::HostToDevice, bytes),
                Err(e) => {
                    state.pending = Some(source);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Copy the buffer contents into `dst`.
    ///
    /// A pending source is applied to the current device first. An unbound
    /// buffer with a pending source reads the source directly.
    pub fn copy_to(&self, dst: &mut [u8]) -> RuntimeResult<()> {
        if dst.len() != self.size {
            return Err(RuntimeError::SizeMismatch {
                expected: self.size,
                got: dst.len(),
            });
        }

        let mut state = self.state.lock();
        let memory = match &state.binding {
            Binding::Bound { memory, .. } => memory.clone(),
            Binding::Unbound => {
                return match &state.pending {
                    Some(source) => source.read_into(dst),
                    None => Err(RuntimeError::BufferEmpty),
                };
            }
        };

        Self::apply_pending(&mut state, memory.as_ref())?;
        let bytes = download(memory.as_ref(), dst)?;
        state.stats.record(TransferDirection::DeviceToHost, bytes);
        Ok(())
    }

    /// Copy the buffer contents into a managed array or bitmap.
    pub fn copy_to_array(&self, array: &dyn HostArray) -> RuntimeResult<()> {
        let data = self.to_vec()?;
        array.write_from(&data)
    }

    /// Copy the buffer contents into a new vector.
    pub fn to_vec(&self) -> RuntimeResult<Vec<u8>> {
        let mut data = vec![0u8; self.size];
        self.copy_to(&mut data)?;
        Ok(data)
    }

    /// Copy the buffer contents out as typed elements.
    pub fn to_vec_of<T: Element>(&self) -> RuntimeResult<Vec<T>> {
        Ok(super::from_bytes(&self.to_vec()?))
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let device = match &state.binding {
            Binding::Bound { device, .. } => Some(device.id()),
            Binding::Unbound => None,
        };
        f.debug_struct("Buffer")
            .field("size", &self.size)
            .field("extent", &self.extent)
            .field("device", &device)
            .field("pending", &state.pending)
            .finish()
    }
}

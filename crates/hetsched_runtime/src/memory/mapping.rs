//! Host mappings of device memory.

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::error::{RuntimeError, RuntimeResult};

/// How a mapping will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapAccess {
    /// Host reads device contents.
    Read,
    /// Host overwrites device contents.
    Write,
    /// Both.
    ReadWrite,
}

impl MapAccess {
    /// Whether the host may write through this mapping.
    pub fn writable(&self) -> bool {
        matches!(self, MapAccess::Write | MapAccess::ReadWrite)
    }
}

/// Buffer mapping for host access.
///
/// Provides a safe interface for reading and writing device memory from the
/// host. The memory is unmapped when the mapping is dropped. Writes through
/// a [`MapAccess::Read`] mapping are refused.
pub struct BufferMapping<'a> {
    bytes: Box<dyn DerefMut<Target = [u8]> + 'a>,
    access: MapAccess,
}

impl<'a> BufferMapping<'a> {
    /// Create a mapping over a guard that dereferences to the mapped bytes.
    pub fn new(bytes: impl DerefMut<Target = [u8]> + 'a, access: MapAccess) -> Self {
        Self {
            bytes: Box::new(bytes),
            access,
        }
    }

    /// Get the size of the mapped region.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Access requested when mapping.
    pub fn access(&self) -> MapAccess {
        self.access
    }

    /// Get the mapped memory as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the mapped memory as a mutable byte slice.
    pub fn as_slice_mut(&mut self) -> RuntimeResult<&mut [u8]> {
        if !self.access.writable() {
            return Err(RuntimeError::MappingFailed("mapping is read-only".to_string()));
        }
        Ok(&mut **self.bytes)
    }

    /// Read a typed value at a byte offset.
    pub fn read<T: Element>(&self, offset: usize) -> Option<T> {
        let end = offset.checked_add(T::SIZE)?;
        self.bytes.get(offset..end).map(T::from_bytes)
    }

    /// Write a typed value at a byte offset.
    pub fn write<T: Element>(&mut self, offset: usize, value: T) -> bool {
        if !self.access.writable() {
            return false;
        }
        let Some(end) = offset.checked_add(T::SIZE) else {
            return false;
        };
        match self.bytes.get_mut(offset..end) {
            Some(dst) => {
                value.write_bytes(dst);
                true
            }
            None => false,
        }
    }

    /// Read the `index`-th element of type `T`.
    pub fn get<T: Element>(&self, index: usize) -> Option<T> {
        self.read(index.checked_mul(T::SIZE)?)
    }

    /// Write the `index`-th element of type `T`.
    pub fn set<T: Element>(&mut self, index: usize, value: T) -> bool {
        match index.checked_mul(T::SIZE) {
            Some(offset) => self.write(offset, value),
            None => false,
        }
    }

    /// Number of whole `T` elements in the mapping.
    pub fn len_of<T: Element>(&self) -> usize {
        self.size() / T::SIZE
    }

    /// Decode the whole mapping as elements of type `T`.
    pub fn to_vec_of<T: Element>(&self) -> Vec<T> {
        self.bytes.chunks_exact(T::SIZE).map(T::from_bytes).collect()
    }

    /// Copy data from a slice into the mapping.
    pub fn copy_from_slice(&mut self, offset: usize, data: &[u8]) -> bool {
        if !self.access.writable() {
            return false;
        }
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        match self.bytes.get_mut(offset..end) {
            Some(dst) => {
                dst.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Copy data from the mapping into a slice.
    pub fn copy_to_slice(&self, offset: usize, dst: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(dst.len()) else {
            return false;
        };
        match self.bytes.get(offset..end) {
            Some(src) => {
                dst.copy_from_slice(src);
                true
            }
            None => false,
        }
    }
}

impl Deref for BufferMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl fmt::Debug for BufferMapping<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferMapping")
            .field("size", &self.size())
            .field("access", &self.access)
            .finish()
    }
}

/// Plain numeric element stored in device memory in native byte order.
pub trait Element: Copy + Send + Sync + 'static {
    /// Size in bytes.
    const SIZE: usize;

    /// Decode from exactly `SIZE` bytes.
    fn from_bytes(bytes: &[u8]) -> Self;

    /// Encode into exactly `SIZE` bytes.
    fn write_bytes(self, out: &mut [u8]);
}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl Element for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn from_bytes(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_ne_bytes(raw)
                }

                fn write_bytes(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

impl_element!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

/// Encode a slice of elements as bytes.
pub fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * T::SIZE];
    for (chunk, value) in out.chunks_exact_mut(T::SIZE).zip(values) {
        value.write_bytes(chunk);
    }
    out
}

/// Decode bytes as a vector of elements; trailing partial elements are ignored.
pub fn from_bytes<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::SIZE).map(T::from_bytes).collect()
}

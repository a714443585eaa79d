//! Host-side copy sources and destinations.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{RuntimeError, RuntimeResult};

/// Kind of host object backing a [`HostArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostArrayKind {
    /// Managed primitive array.
    PrimitiveArray,
    /// Managed bitmap (pixel rows).
    Bitmap,
}

/// A host object whose storage must be pinned while it is copied.
///
/// Implementations pin the storage for the duration of each call and unpin
/// it before returning, so a buffer may hold the handle for an arbitrary
/// time without keeping the object pinned.
pub trait HostArray: Send + Sync {
    /// Kind of object.
    fn kind(&self) -> HostArrayKind;

    /// Size of the pinned storage in bytes.
    fn len_bytes(&self) -> usize;

    /// Pin, copy the whole storage into `dst`, unpin.
    fn read_into(&self, dst: &mut [u8]) -> RuntimeResult<()>;

    /// Pin, overwrite the whole storage from `src`, unpin.
    fn write_from(&self, src: &[u8]) -> RuntimeResult<()>;
}

/// In-process [`HostArray`] backed by a locked byte vector.
pub struct ManagedArray {
    kind: HostArrayKind,
    data: Mutex<Vec<u8>>,
}

impl ManagedArray {
    /// A primitive array holding `bytes`.
    pub fn primitive(bytes: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            kind: HostArrayKind::PrimitiveArray,
            data: Mutex::new(bytes),
        })
    }

    /// A zero-filled RGBA bitmap of `width` x `height` pixels.
    pub fn bitmap(width: usize, height: usize) -> RuntimeResult<Arc<Self>> {
        let size = width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| {
                RuntimeError::allocation(
                    usize::MAX,
                    format!("{}x{} bitmap overflows the address space", width, height),
                )
            })?;
        Ok(Arc::new(Self {
            kind: HostArrayKind::Bitmap,
            data: Mutex::new(vec![0u8; size]),
        }))
    }

    /// Snapshot of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl HostArray for ManagedArray {
    fn kind(&self) -> HostArrayKind {
        self.kind
    }

    fn len_bytes(&self) -> usize {
        self.data.lock().len()
    }

    fn read_into(&self, dst: &mut [u8]) -> RuntimeResult<()> {
        let data = self.data.lock();
        if data.len() != dst.len() {
            return Err(RuntimeError::SizeMismatch {
                expected: dst.len(),
                got: data.len(),
            });
        }
        dst.copy_from_slice(&data);
        Ok(())
    }

    fn write_from(&self, src: &[u8]) -> RuntimeResult<()> {
        let mut data = self.data.lock();
        if data.len() != src.len() {
            return Err(RuntimeError::SizeMismatch {
                expected: src.len(),
                got: data.len(),
            });
        }
        data.copy_from_slice(src);
        Ok(())
    }
}

impl fmt::Debug for ManagedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedArray")
            .field("kind", &self.kind)
            .field("len_bytes", &self.len_bytes())
            .finish()
    }
}

/// Data waiting to be copied into a buffer on its next bind.
#[derive(Clone)]
pub enum CopySource {
    /// Host memory owned by the buffer until consumed.
    Host(Arc<[u8]>),
    /// Managed array or bitmap, pinned only while copying.
    Array(Arc<dyn HostArray>),
}

impl CopySource {
    /// Size of the source in bytes.
    pub fn len(&self) -> usize {
        match self {
            CopySource::Host(bytes) => bytes.len(),
            CopySource::Array(array) => array.len_bytes(),
        }
    }

    /// Whether the source holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the whole source into `dst`.
    pub fn read_into(&self, dst: &mut [u8]) -> RuntimeResult<()> {
        match self {
            CopySource::Host(bytes) => {
                if bytes.len() != dst.len() {
                    return Err(RuntimeError::SizeMismatch {
                        expected: dst.len(),
                        got: bytes.len(),
                    });
                }
                dst.copy_from_slice(bytes);
                Ok(())
            }
            CopySource::Array(array) => array.read_into(dst),
        }
    }
}

impl fmt::Debug for CopySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopySource::Host(bytes) => write!(f, "Host({} bytes)", bytes.len()),
            CopySource::Array(array) => {
                write!(f, "Array({:?}, {} bytes)", array.kind(), array.len_bytes())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_array_roundtrip() {
        let array = ManagedArray::primitive(vec![1, 2, 3, 4]);
        let mut out = [0u8; 4];
        array.read_into(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        array.write_from(&[4, 3, 2, 1]).unwrap();
        assert_eq!(array.snapshot(), vec![4, 3, 2, 1]);

        let err = array.write_from(&[0; 3]).unwrap_err();
        assert!(matches!(err, RuntimeError::SizeMismatch { .. }));
    }

    #[test]
    fn test_bitmap_size() {
        let bitmap = ManagedArray::bitmap(3, 2).unwrap();
        assert_eq!(bitmap.kind(), HostArrayKind::Bitmap);
        assert_eq!(bitmap.len_bytes(), 24);

        assert!(matches!(
            ManagedArray::bitmap(usize::MAX / 2, 3),
            Err(RuntimeError::BufferConstruction { .. })
        ));
    }

    #[test]
    fn test_copy_source_len() {
        let host = CopySource::Host(Arc::from(vec![0u8; 8]));
        assert_eq!(host.len(), 8);
        let array = CopySource::Array(ManagedArray::primitive(vec![0u8; 3]));
        assert_eq!(array.len(), 3);
        assert!(!array.is_empty());
    }
}

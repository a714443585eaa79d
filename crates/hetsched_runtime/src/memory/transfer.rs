//! Host-mediated memory transfers.

use crate::backend::DeviceMemory;
use crate::error::{RuntimeError, RuntimeResult};

use super::{CopySource, MapAccess};

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Host to device.
    HostToDevice,
    /// Device to host.
    DeviceToHost,
    /// Device to device via host staging.
    DeviceToDeviceStaged,
}

/// Transfer statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Total bytes transferred.
    pub total_bytes: u64,
    /// Number of transfers.
    pub transfer_count: u64,
    /// Bytes transferred host to device.
    pub h2d_bytes: u64,
    /// Host to device transfers.
    pub h2d_count: u64,
    /// Bytes transferred device to host.
    pub d2h_bytes: u64,
    /// Device to host transfers.
    pub d2h_count: u64,
    /// Bytes staged through the host between two devices.
    pub d2d_bytes: u64,
    /// Staged device to device transfers.
    pub d2d_count: u64,
}

impl TransferStats {
    /// Account for one transfer.
    pub fn record(&mut self, direction: TransferDirection, bytes: usize) {
        let bytes = bytes as u64;
        self.total_bytes += bytes;
        self.transfer_count += 1;
        match direction {
            TransferDirection::HostToDevice => {
                self.h2d_bytes += bytes;
                self.h2d_count += 1;
            }
            TransferDirection::DeviceToHost => {
                self.d2h_bytes += bytes;
                self.d2h_count += 1;
            }
            TransferDirection::DeviceToDeviceStaged => {
                self.d2d_bytes += bytes;
                self.d2d_count += 1;
            }
        }
    }
}

/// Copy a pending source into device memory.
pub fn upload(source: &CopySource, dst: &dyn DeviceMemory) -> RuntimeResult<usize> {
    if source.len() != dst.size() {
        return Err(RuntimeError::SizeMismatch {
            expected: dst.size(),
            got: source.len(),
        });
    }

    let mut mapping = dst.map(MapAccess::Write)?;
    source.read_into(mapping.as_slice_mut()?)?;
    Ok(dst.size())
}

/// Copy device memory into a host slice of the same size.
pub fn download(src: &dyn DeviceMemory, dst: &mut [u8]) -> RuntimeResult<usize> {
    if dst.len() != src.size() {
        return Err(RuntimeError::SizeMismatch {
            expected: src.size(),
            got: dst.len(),
        });
    }

    let mapping = src.map(MapAccess::Read)?;
    dst.copy_from_slice(mapping.as_slice());
    Ok(dst.len())
}

/// Copy between two device allocations by mapping both into host memory.
///
/// The source is mapped readable and the destination writable; both are
/// unmapped before returning.
pub fn copy_through_host(src: &dyn DeviceMemory, dst: &dyn DeviceMemory) -> RuntimeResult<usize> {
    if src.size() != dst.size() {
        return Err(RuntimeError::BufferCopy(format!(
            "Staged copy size {} does not match destination size {}",
            src.size(),
            dst.size()
        )));
    }

    let old = src.map(MapAccess::Read)?;
    let mut new = dst.map(MapAccess::Write)?;
    new.as_slice_mut()?.copy_from_slice(old.as_slice());
    Ok(src.size())
}

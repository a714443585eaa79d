//! Memory management abstractions.
//!
//! This module provides the cross-device [`Buffer`], host mappings of device
//! memory, host-side copy sources, and host-mediated transfer utilities.

mod buffer;
mod mapping;
mod source;
mod transfer;

pub use buffer::*;
pub use mapping::*;
pub use source::*;
pub use transfer::*;

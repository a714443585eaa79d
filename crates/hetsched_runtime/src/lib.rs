//! # hetsched_runtime
//!
//! Task scheduling and execution across heterogeneous devices.
//!
//! A [`Runtime`] owns a fixed set of devices discovered at startup, one
//! worker thread per device, and a [`Scheduler`] deciding which queued
//! [`Task`] a device may take next:
//!
//! - **FCFS**: one global FIFO with strict head-of-line blocking
//! - **HEFT**: CPU and GPU queues, dual-eligible tasks balanced by summed scores
//! - **PAMS**: CPU and GPU lists ordered by speed-up ratio
//!
//! [`Buffer`]s live on at most one device and migrate lazily: they are bound
//! when a kernel on the executing device first uses them, and old contents
//! are copied through host memory only when no fresher source is pending.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hetsched_runtime::prelude::*;
//!
//! # fn main() -> RuntimeResult<()> {
//! let runtime = Runtime::builder()
//!     .with_policy(SchedulerPolicy::Heft)
//!     .with_host_device(HostDeviceSpec::cpu("cpu", 4))
//!     .with_host_device(HostDeviceSpec::gpu("gpu", 32))
//!     .build()?;
//!
//! let library = KernelLibrary::new().with_kernel("increment", |ctx| {
//!     let mut data = ctx.buffer(0)?;
//!     for i in 0..data.len_of::<i32>() {
//!         if let Some(v) = data.get::<i32>(i) {
//!             data.set(i, v + 1);
//!         }
//!     }
//!     Ok(())
//! });
//! let program = Program::compile(&runtime, library, None)?;
//!
//! let buffer = Buffer::for_elements(ElementType::Int, 4, 1, 1)?;
//! buffer.set_elements(&[1i32, 2, 3, 4])?;
//!
//! let input = buffer.clone();
//! runtime.submit(
//!     Task::new(program)
//!         .with_kernel("increment")
//!         .on_config(move |_, kernels| {
//!             kernels.kernel("increment")?.set_input(&input)?;
//!             Ok(())
//!         }),
//! )?;
//! runtime.finish()?;
//!
//! assert_eq!(buffer.to_vec_of::<i32>()?, vec![2, 3, 4, 5]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod kernel;
pub mod memory;
pub mod program;
pub mod runtime;
pub mod scheduler;
pub mod task;
pub mod worker;

pub use backend::host::{HostBackend, HostDeviceSpec, HostKernelContext, KernelLibrary};
pub use backend::{Backend, ProgramSource};
pub use config::RuntimeConfig;
pub use device::{Device, DeviceId, DeviceRegistry, DeviceType, Platform};
pub use error::{RuntimeError, RuntimeResult, TaskFailure};
pub use kernel::{Kernel, Scalar, WorkRange};
pub use memory::{Buffer, ElementType, ManagedArray, TransferStats};
pub use program::Program;
pub use runtime::{Runtime, RuntimeBuilder};
pub use scheduler::{FcfsScheduler, HeftScheduler, PamsScheduler, Scheduler, SchedulerPolicy};
pub use task::{KernelSet, Score, Task, TaskId};
pub use worker::{HostBridge, WorkerStatus};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::backend::host::{HostDeviceSpec, HostKernelContext, KernelLibrary};
    pub use crate::config::RuntimeConfig;
    pub use crate::device::{Device, DeviceId, DeviceType};
    pub use crate::error::{RuntimeError, RuntimeResult};
    pub use crate::kernel::{Scalar, WorkRange};
    pub use crate::memory::{Buffer, ElementType};
    pub use crate::program::Program;
    pub use crate::runtime::Runtime;
    pub use crate::scheduler::SchedulerPolicy;
    pub use crate::task::{KernelSet, Score, Task};
}

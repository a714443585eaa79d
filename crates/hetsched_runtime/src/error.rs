//! Unified error types for hetsched_runtime.

use std::fmt;

use crate::device::DeviceId;
use crate::task::TaskId;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Unified error type for the scheduling and execution engine.
///
/// Errors fall into three groups: construction errors (an object failed to
/// allocate or compile), execution errors (a kernel launch, copy or device
/// finish failed while a task ran) and usage errors (programmer mistakes that
/// are reported immediately and never retried). See
/// [`RuntimeError::is_usage_error`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Device failed to construct or initialize.
    #[error("Device construction failed: {0}")]
    DeviceConstruction(String),

    /// Device failed to drain its execution queue.
    #[error("Device {device} failed to finish: {reason}")]
    DeviceFinish {
        /// Device whose queue failed.
        device: DeviceId,
        /// Reason reported by the backend.
        reason: String,
    },

    /// Device memory allocation failed.
    #[error("Buffer allocation failed: size={size}, reason={reason}")]
    BufferConstruction {
        /// Requested allocation size in bytes.
        size: usize,
        /// Reason for allocation failure.
        reason: String,
    },

    /// Copying data into or out of a buffer failed.
    #[error("Buffer copy failed: {0}")]
    BufferCopy(String),

    /// A copy-out was requested from a buffer that holds no data.
    #[error("Buffer is empty: no device data and no pending copy source")]
    BufferEmpty,

    /// Source or destination length does not match the buffer size.
    #[error("Size mismatch: buffer holds {expected} bytes, got {got}")]
    SizeMismatch {
        /// Buffer size in bytes.
        expected: usize,
        /// Offered size in bytes.
        got: usize,
    },

    /// Mapping device memory for host access failed.
    #[error("Buffer mapping failed: {0}")]
    MappingFailed(String),

    /// A program failed to compile on every targeted device.
    #[error("Program compilation failed on all devices:\n{0}")]
    ProgramCompilation(String),

    /// A kernel object could not be created from a program object.
    #[error("Kernel construction failed for '{kernel}': {reason}")]
    KernelConstruction {
        /// Kernel name.
        kernel: String,
        /// Reason for failure.
        reason: String,
    },

    /// Setting a kernel argument failed.
    #[error("Kernel argument {index} rejected: {reason}")]
    KernelArg {
        /// Argument index.
        index: u32,
        /// Reason for rejection.
        reason: String,
    },

    /// A kernel launch failed.
    #[error("Kernel '{kernel}' failed on device {device}: {reason}")]
    KernelExecution {
        /// Kernel name.
        kernel: String,
        /// Device the kernel ran on.
        device: DeviceId,
        /// Reason reported by the backend.
        reason: String,
    },

    /// A task callback or kernel panicked on a worker thread.
    #[error("Task {task} panicked on device {device}: {message}")]
    TaskPanicked {
        /// Task that panicked.
        task: TaskId,
        /// Device the task ran on.
        device: DeviceId,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// One or more tasks failed since the last `finish()`.
    #[error("{} task(s) failed; first: {}", .failures.len(), first_failure(.failures))]
    TasksFailed {
        /// Every failure, in completion order.
        failures: Vec<TaskFailure>,
    },

    /// Lookup of a kernel name that the task never added.
    #[error("Invalid kernel name: {0}")]
    InvalidKernel(String),

    /// A task was created from an empty program set.
    #[error("No programs specified")]
    EmptyProgram,

    /// A task targets device types the active scheduler cannot serve.
    #[error("Scheduler {scheduler} only supports CPU and GPU workers")]
    UnsupportedDeviceType {
        /// Name of the scheduling policy.
        scheduler: &'static str,
    },

    /// A task's programs cover none of the runtime's devices.
    #[error("Task '{0}' has no compiled program for any device of this runtime")]
    NoEligibleDevice(String),

    /// Affinity scores must be positive and finite.
    #[error("Invalid affinity score: {0}")]
    InvalidScore(String),

    /// The runtime found no devices on any backend.
    #[error("No devices found on any backend")]
    NoDevices,

    /// The runtime failed to construct.
    #[error("Runtime construction failed: {0}")]
    RuntimeConstruction(String),

    /// Runtime configuration could not be read or parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Attaching or detaching a worker thread to the host runtime failed.
    #[error("Host bridge error: {0}")]
    HostBridge(String),

    /// Backend-specific error.
    #[error("{platform} error: {message}")]
    Backend {
        /// Which platform produced the error.
        platform: Platform,
        /// Error message from the backend.
        message: String,
    },
}

/// Platform tag of a backend, carried by devices and backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// In-process host backend running Rust kernels.
    Host,
    /// OpenCL-like backend.
    OpenCl,
    /// RenderScript-like backend.
    RenderScript,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Platform::Host => "Host",
            Platform::OpenCl => "OpenCL",
            Platform::RenderScript => "RenderScript",
        })
    }
}

/// A task that failed while a worker executed it.
#[derive(Debug)]
pub struct TaskFailure {
    /// The failed task.
    pub task: TaskId,
    /// Task label.
    pub label: String,
    /// Device the task ran on.
    pub device: DeviceId,
    /// What went wrong.
    pub error: RuntimeError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task {} ('{}') on device {}: {}",
            self.task, self.label, self.device, self.error
        )
    }
}

fn first_failure(failures: &[TaskFailure]) -> String {
    failures
        .first()
        .map(|f| f.to_string())
        .unwrap_or_else(|| "<none>".to_string())
}

impl RuntimeError {
    /// Create a backend-specific error.
    pub fn backend(platform: Platform, message: impl Into<String>) -> Self {
        RuntimeError::Backend {
            platform,
            message: message.into(),
        }
    }

    /// Create an allocation error.
    pub fn allocation(size: usize, reason: impl Into<String>) -> Self {
        RuntimeError::BufferConstruction {
            size,
            reason: reason.into(),
        }
    }

    /// Create a kernel execution error.
    pub fn kernel_execution(
        kernel: impl Into<String>,
        device: DeviceId,
        reason: impl Into<String>,
    ) -> Self {
        RuntimeError::KernelExecution {
            kernel: kernel.into(),
            device,
            reason: reason.into(),
        }
    }

    /// Create a kernel construction error.
    pub fn kernel_construction(kernel: impl Into<String>, reason: impl Into<String>) -> Self {
        RuntimeError::KernelConstruction {
            kernel: kernel.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a programmer error rather than a device failure.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            RuntimeError::InvalidKernel(_)
                | RuntimeError::EmptyProgram
                | RuntimeError::UnsupportedDeviceType { .. }
                | RuntimeError::NoEligibleDevice(_)
                | RuntimeError::InvalidScore(_)
                | RuntimeError::BufferEmpty
                | RuntimeError::SizeMismatch { .. }
        )
    }
}

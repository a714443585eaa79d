//! Tasks: ordered kernels sharing one device assignment.

use std::fmt;
use std::sync::Arc;

use crate::device::{Device, DeviceType};
use crate::error::{RuntimeError, RuntimeResult};
use crate::kernel::Kernel;
use crate::program::Program;

/// Runtime-assigned task identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Create a task ID from a raw value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Relative execution cost of a task on each device type.
///
/// Scores are positive; 1.0 everywhere means "equally suited". Policies
/// compare them, so only ratios and sums matter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Score {
    /// Cost on a CPU.
    pub cpu: f64,
    /// Cost on a GPU.
    pub gpu: f64,
    /// Cost on an accelerator.
    pub accelerator: f64,
}

impl Score {
    /// CPU and GPU scores; accelerator defaults to 1.0.
    pub fn new(cpu: f64, gpu: f64) -> Self {
        Self {
            cpu,
            gpu,
            accelerator: 1.0,
        }
    }

    /// Set the accelerator score.
    pub fn with_accelerator(mut self, accelerator: f64) -> Self {
        self.accelerator = accelerator;
        self
    }

    /// Score for one device type.
    pub fn for_type(&self, device_type: DeviceType) -> f64 {
        match device_type {
            DeviceType::Cpu => self.cpu,
            DeviceType::Gpu => self.gpu,
            DeviceType::Accelerator => self.accelerator,
        }
    }

    /// Reject non-positive or non-finite scores.
    pub fn validate(&self) -> RuntimeResult<()> {
        for device_type in DeviceType::ALL {
            let value = self.for_type(device_type);
            if !value.is_finite() || value <= 0.0 {
                return Err(RuntimeError::InvalidScore(format!(
                    "{} score must be positive and finite, got {}",
                    device_type, value
                )));
            }
        }
        Ok(())
    }
}

impl Default for Score {
    fn default() -> Self {
        Self {
            cpu: 1.0,
            gpu: 1.0,
            accelerator: 1.0,
        }
    }
}

/// Kernels of a running task, in execution order.
pub struct KernelSet {
    kernels: Vec<Kernel>,
}

impl KernelSet {
    /// Kernel added under `name`; the first one if the name was added twice.
    pub fn kernel(&mut self, name: &str) -> RuntimeResult<&mut Kernel> {
        self.kernels
            .iter_mut()
            .find(|k| k.name() == name)
            .ok_or_else(|| RuntimeError::InvalidKernel(name.to_string()))
    }

    /// Look up a kernel without mutating it.
    pub fn get(&self, name: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|k| k.name() == name)
    }

    /// Kernels in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Kernel> {
        self.kernels.iter()
    }

    /// Number of kernels.
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    /// Whether the task has no kernels.
    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// Callback run with the chosen device and the task's kernels.
pub type KernelFn = Box<dyn FnOnce(&Arc<Device>, &mut KernelSet) -> RuntimeResult<()> + Send>;

/// An ordered group of kernels executed on one device.
///
/// A task runs once: the worker that pops it instantiates its kernels on its
/// device, invokes the configuration callback, runs the kernels in the order
/// they were added, waits for the device, then invokes the completion
/// callback.
pub struct Task {
    id: Option<TaskId>,
    label: String,
    program: Arc<Program>,
    score: Score,
    kernel_names: Vec<String>,
    config: Option<KernelFn>,
    completion: Option<KernelFn>,
}

impl Task {
    /// A task over one program.
    pub fn new(program: Arc<Program>) -> Self {
        Self {
            id: None,
            label: String::new(),
            program,
            score: Score::default(),
            kernel_names: Vec::new(),
            config: None,
            completion: None,
        }
    }

    /// A task over several programs, merged in preference order.
    pub fn from_programs(programs: Vec<Arc<Program>>) -> RuntimeResult<Self> {
        match programs.len() {
            0 => Err(RuntimeError::EmptyProgram),
            1 => Ok(Self::new(programs.into_iter().next().ok_or(RuntimeError::EmptyProgram)?)),
            _ => Ok(Self::new(Arc::new(Program::merge(&programs)?))),
        }
    }

    /// Set a label used in logs and failure reports.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the affinity score.
    pub fn with_score(mut self, score: Score) -> Self {
        self.score = score;
        self
    }

    /// Append a kernel to run after the ones already added.
    pub fn add_kernel(&mut self, name: impl Into<String>) -> &mut Self {
        self.kernel_names.push(name.into());
        self
    }

    /// Builder form of [`add_kernel`](Task::add_kernel).
    pub fn with_kernel(mut self, name: impl Into<String>) -> Self {
        self.add_kernel(name);
        self
    }

    /// Set the configuration callback, run right before the kernels.
    pub fn on_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Arc<Device>, &mut KernelSet) -> RuntimeResult<()> + Send + 'static,
    {
        self.config = Some(Box::new(f));
        self
    }

    /// Set the completion callback, run after the device finished.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&Arc<Device>, &mut KernelSet) -> RuntimeResult<()> + Send + 'static,
    {
        self.completion = Some(Box::new(f));
        self
    }

    /// Id assigned at submission.
    pub fn id(&self) -> Option<TaskId> {
        self.id
    }

    pub(crate) fn assign_id(&mut self, id: TaskId) {
        self.id = Some(id);
        if self.label.is_empty() {
            self.label = id.to_string();
        }
    }

    /// Label for logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Program the task's kernels come from.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Affinity score.
    pub fn score(&self) -> &Score {
        &self.score
    }

    /// Kernel names in execution order.
    pub fn kernel_names(&self) -> &[String] {
        &self.kernel_names
    }

    /// Run the task on `device`, consuming it.
    pub(crate) fn execute(mut self, device: &Arc<Device>) -> RuntimeResult<()> {
        let object = self
            .program
            .object(device.id())
            .ok_or_else(|| RuntimeError::NoEligibleDevice(self.label.clone()))?
            .clone();

        let mut kernels = KernelSet {
            kernels: self
                .kernel_names
                .iter()
                .map(|name| Kernel::new(name, device.clone(), object.as_ref()))
                .collect::<RuntimeResult<_>>()?,
        };

        if let Some(config) = self.config.take() {
            config(device, &mut kernels)?;
        }

        for kernel in kernels.kernels.iter_mut() {
            kernel.run()?;
        }
        device.finish()?;

        if let Some(completion) = self.completion.take() {
            completion(device, &mut kernels)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("score", &self.score)
            .field("kernels", &self.kernel_names)
            .field("program", &self.program)
            .finish()
    }
}

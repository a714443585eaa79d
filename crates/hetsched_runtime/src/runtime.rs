//! The runtime: devices, one worker per device, and a scheduling policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::backend::host::{HostBackend, HostDeviceSpec};
use crate::backend::Backend;
use crate::config::RuntimeConfig;
use crate::device::{Device, DeviceId, DeviceIdAllocator, DeviceRegistry};
use crate::error::{RuntimeError, RuntimeResult, TaskFailure};
use crate::scheduler::{Scheduler, SchedulerPolicy};
use crate::task::{Task, TaskId};
use crate::worker::{HostBridge, Worker, WorkerContext, WorkerSignal, WorkerStatus};

#[derive(Default)]
struct TrackerState {
    pending: usize,
    completed: u64,
    failures: Vec<TaskFailure>,
}

/// Counts submitted tasks until workers report them done.
pub(crate) struct CompletionTracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
}

impl CompletionTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            idle: Condvar::new(),
        }
    }

    pub(crate) fn submitted(&self) {
        self.state.lock().pending += 1;
    }

    /// Undo `submitted` for a task the scheduler refused.
    pub(crate) fn withdrawn(&self) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }

    pub(crate) fn completed(&self, failure: Option<TaskFailure>) {
        let mut state = self.state.lock();
        state.pending = state.pending.saturating_sub(1);
        state.completed += 1;
        if let Some(failure) = failure {
            state.failures.push(failure);
        }
        if state.pending == 0 {
            self.idle.notify_all();
        }
    }

    /// Block until nothing is pending, then take the collected failures.
    pub(crate) fn wait_idle(&self) -> Vec<TaskFailure> {
        let mut state = self.state.lock();
        while state.pending > 0 {
            self.idle.wait(&mut state);
        }
        std::mem::take(&mut state.failures)
    }

    pub(crate) fn pending(&self) -> usize {
        self.state.lock().pending
    }

    pub(crate) fn completed_count(&self) -> u64 {
        self.state.lock().completed
    }
}

/// Builder for [`Runtime`].
///
/// Host devices come from [`with_host_devices`](RuntimeBuilder::with_host_devices)
/// or the configuration. With none given, a single CPU device is detected,
/// unless other backends were added, in which case those supply all devices.
#[derive(Default)]
pub struct RuntimeBuilder {
    policy: SchedulerPolicy,
    scheduler: Option<Arc<dyn Scheduler>>,
    host_devices: Vec<HostDeviceSpec>,
    backends: Vec<Arc<dyn Backend>>,
    bridge: Option<Arc<dyn HostBridge>>,
}

impl RuntimeBuilder {
    /// Start with the defaults: FCFS and one detected CPU.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a configuration.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.policy = config.scheduler;
        self.host_devices = config.host_devices;
        self
    }

    /// Use a built-in scheduling policy.
    pub fn with_policy(mut self, policy: SchedulerPolicy) -> Self {
        self.policy = policy;
        self.scheduler = None;
        self
    }

    /// Use a custom scheduler instead of a built-in policy.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Add one simulated host device.
    pub fn with_host_device(mut self, spec: HostDeviceSpec) -> Self {
        self.host_devices.push(spec);
        self
    }

    /// Replace the simulated host devices.
    pub fn with_host_devices(mut self, specs: Vec<HostDeviceSpec>) -> Self {
        self.host_devices = specs;
        self
    }

    /// Add a backend discovered after the host backend.
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Attach every worker thread to a host runtime.
    pub fn with_host_bridge(mut self, bridge: Arc<dyn HostBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Discover devices and start one worker per device.
    pub fn build(self) -> RuntimeResult<Runtime> {
        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
        if !self.host_devices.is_empty() {
            backends.push(Arc::new(HostBackend::new(self.host_devices)));
        } else if self.backends.is_empty() {
            backends.push(Arc::new(HostBackend::detect()));
        }
        backends.extend(self.backends);

        let ids = DeviceIdAllocator::new();
        let registry = DeviceRegistry::discover(&backends, &ids)?;
        let scheduler = self.scheduler.unwrap_or_else(|| self.policy.build());
        let tracker = Arc::new(CompletionTracker::new());

        let signals: Vec<Arc<WorkerSignal>> =
            registry.all().iter().map(|_| WorkerSignal::new()).collect();
        let peers: Arc<[Arc<WorkerSignal>]> = Arc::from(signals.clone());

        let mut workers = Vec::with_capacity(registry.len());
        for (device, signal) in registry.all().iter().zip(signals) {
            // Workers spawned so far are killed and joined on early return.
            workers.push(Worker::spawn(WorkerContext {
                device: device.clone(),
                scheduler: scheduler.clone(),
                tracker: tracker.clone(),
                signal,
                peers: peers.clone(),
                bridge: self.bridge.clone(),
            })?);
        }

        tracing::info!(
            "Runtime started with {} device(s) using {} scheduler",
            registry.len(),
            scheduler.name()
        );

        Ok(Runtime {
            backends,
            registry,
            ids,
            scheduler,
            tracker,
            peers,
            workers,
            next_task: AtomicU64::new(1),
        })
    }
}

/// Schedules tasks over a fixed set of devices.
///
/// One worker thread per device pulls tasks from the scheduler. Buffers
/// handed to a task must not be used by another task running concurrently
/// on a different device; rebinding is only safe from the single worker
/// currently executing the task that owns the buffer.
pub struct Runtime {
    backends: Vec<Arc<dyn Backend>>,
    registry: DeviceRegistry,
    ids: DeviceIdAllocator,
    scheduler: Arc<dyn Scheduler>,
    tracker: Arc<CompletionTracker>,
    peers: Arc<[Arc<WorkerSignal>]>,
    workers: Vec<Worker>,
    next_task: AtomicU64,
}

impl Runtime {
    /// Runtime with the given policy over one detected CPU device.
    pub fn new(policy: SchedulerPolicy) -> RuntimeResult<Self> {
        Self::builder().with_policy(policy).build()
    }

    /// Runtime from a configuration.
    pub fn from_config(config: RuntimeConfig) -> RuntimeResult<Self> {
        Self::builder().with_config(config).build()
    }

    /// Start building a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Queue a task and wake every worker.
    ///
    /// Usage errors (invalid score, no device of this runtime covered by the
    /// task's program, a device type the policy cannot serve) are reported
    /// here and the task is dropped.
    pub fn submit(&self, mut task: Task) -> RuntimeResult<TaskId> {
        task.score().validate()?;

        let covered = self
            .registry
            .all()
            .iter()
            .any(|d| task.program().has_device_id(d.id()));
        if !covered {
            return Err(RuntimeError::NoEligibleDevice(if task.label().is_empty() {
                "task".to_string()
            } else {
                task.label().to_string()
            }));
        }

        let id = TaskId::new(self.next_task.fetch_add(1, Ordering::Relaxed));
        task.assign_id(id);
        tracing::debug!("Submitting {} ({}) to {}", id, task.label(), self.scheduler.name());

        self.tracker.submitted();
        if let Err(e) = self.scheduler.push(task) {
            self.tracker.withdrawn();
            return Err(e);
        }

        self.wake_all();
        Ok(id)
    }

    /// Block until every submitted task has run.
    ///
    /// Failures collected since the previous call are returned as
    /// [`RuntimeError::TasksFailed`]; the runtime stays usable either way.
    pub fn finish(&self) -> RuntimeResult<()> {
        let failures = self.tracker.wait_idle();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::TasksFailed { failures })
        }
    }

    /// Whether any submitted task is queued or still running.
    pub fn has_work(&self) -> bool {
        self.scheduler.has_work() || self.tracker.pending() > 0
    }

    /// Devices in discovery order.
    pub fn devices(&self) -> &[Arc<Device>] {
        self.registry.all()
    }

    /// Device lookup.
    pub fn device(&self, id: DeviceId) -> Option<&Arc<Device>> {
        self.registry.get(id)
    }

    /// The device registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Backends devices were discovered from.
    pub fn backends(&self) -> &[Arc<dyn Backend>] {
        &self.backends
    }

    /// Number of device ids handed out.
    pub fn allocated_device_ids(&self) -> u32 {
        self.ids.allocated()
    }

    /// Name of the active policy.
    pub fn scheduler_name(&self) -> &'static str {
        self.scheduler.name()
    }

    /// Status of each device's worker.
    pub fn worker_states(&self) -> Vec<(DeviceId, WorkerStatus)> {
        self.workers
            .iter()
            .map(|w| (w.device().id(), w.status()))
            .collect()
    }

    /// Tasks run so far, failed ones included.
    pub fn completed_count(&self) -> u64 {
        self.tracker.completed_count()
    }

    fn wake_all(&self) {
        for signal in self.peers.iter() {
            signal.wake();
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let failures = self.tracker.wait_idle();
        if !failures.is_empty() {
            tracing::warn!("{} task(s) failed after the last finish", failures.len());
        }

        for signal in self.peers.iter() {
            signal.kill();
        }
        self.workers.clear();
        tracing::info!("Runtime stopped");
    }
}

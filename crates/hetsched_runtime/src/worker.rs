//! Per-device worker threads.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::device::Device;
use crate::error::{RuntimeError, RuntimeResult, TaskFailure};
use crate::runtime::CompletionTracker;
use crate::scheduler::Scheduler;
use crate::task::Task;

/// Hooks for running worker threads under a managed host runtime.
///
/// `attach` runs once on each worker thread before it takes any task, and
/// `detach` once before the thread exits.
pub trait HostBridge: Send + Sync {
    /// Register the current thread with the host runtime.
    fn attach(&self, device: &Device) -> RuntimeResult<()>;

    /// Unregister the current thread.
    fn detach(&self, device: &Device);
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerStatus {
    /// Waiting for work.
    Idle,
    /// Executing a task.
    Running,
    /// Exited its loop.
    Killed,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Killed => write!(f, "killed"),
        }
    }
}

struct SignalState {
    notified: bool,
    killed: bool,
    status: WorkerStatus,
}

/// Wake-up channel of one worker.
pub(crate) struct WorkerSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl WorkerSignal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SignalState {
                notified: false,
                killed: false,
                status: WorkerStatus::Idle,
            }),
            cond: Condvar::new(),
        })
    }

    /// Ask the worker to look for work again.
    pub(crate) fn wake(&self) {
        let mut state = self.state.lock();
        state.notified = true;
        self.cond.notify_one();
    }

    /// Ask the worker to exit once it finds no more work.
    pub(crate) fn kill(&self) {
        let mut state = self.state.lock();
        state.killed = true;
        self.cond.notify_one();
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        self.state.lock().status
    }

    fn set_status(&self, status: WorkerStatus) {
        self.state.lock().status = status;
    }

    /// Block until woken. Returns `false` if the worker should exit.
    fn wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.notified {
            state.notified = false;
            return true;
        }
        if state.killed {
            state.status = WorkerStatus::Killed;
            return false;
        }

        tracing::trace!("Worker sleeping");
        self.cond.wait(&mut state);
        state.notified = false;
        true
    }
}

/// Everything a worker thread needs.
pub(crate) struct WorkerContext {
    pub device: Arc<Device>,
    pub scheduler: Arc<dyn Scheduler>,
    pub tracker: Arc<CompletionTracker>,
    pub signal: Arc<WorkerSignal>,
    pub peers: Arc<[Arc<WorkerSignal>]>,
    pub bridge: Option<Arc<dyn HostBridge>>,
}

/// One dedicated thread pulling tasks for one device.
pub(crate) struct Worker {
    device: Arc<Device>,
    signal: Arc<WorkerSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread and wait until it is attached.
    pub(crate) fn spawn(ctx: WorkerContext) -> RuntimeResult<Self> {
        let device = ctx.device.clone();
        let signal = ctx.signal.clone();
        let (attached_tx, attached_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name(format!("hetsched-worker-{}", device.id().raw()))
            .spawn(move || run(ctx, attached_tx))
            .map_err(|e| {
                RuntimeError::RuntimeConstruction(format!("failed to spawn worker thread: {}", e))
            })?;

        let attached = attached_rx.recv().unwrap_or_else(|_| {
            Err(RuntimeError::HostBridge(
                "worker exited before attaching".to_string(),
            ))
        });

        if let Err(e) = attached {
            let _ = handle.join();
            return Err(e);
        }

        Ok(Self {
            device,
            signal,
            handle: Some(handle),
        })
    }

    pub(crate) fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        self.signal.status()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.signal.kill();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Worker for device {} panicked", self.device.id());
            }
        }
    }
}

fn run(ctx: WorkerContext, attached: mpsc::Sender<RuntimeResult<()>>) {
    let span = tracing::info_span!("worker", device = %ctx.device.id());
    let _enter = span.enter();

    if let Some(bridge) = &ctx.bridge {
        if let Err(e) = bridge.attach(&ctx.device) {
            let message = format!("attach failed on device {}: {}", ctx.device.id(), e);
            ctx.signal.set_status(WorkerStatus::Killed);
            let _ = attached.send(Err(RuntimeError::HostBridge(message)));
            return;
        }
    }
    let _ = attached.send(Ok(()));
    tracing::debug!("Worker started on {}", ctx.device);

    loop {
        match ctx.scheduler.pop(&ctx.device) {
            Some(task) => {
                // The queue head moved; peers blocked behind it may now proceed.
                if ctx.scheduler.has_work() {
                    for peer in ctx.peers.iter().filter(|p| !Arc::ptr_eq(p, &ctx.signal)) {
                        peer.wake();
                    }
                }

                ctx.signal.set_status(WorkerStatus::Running);
                let failure = execute(task, &ctx.device);
                ctx.signal.set_status(WorkerStatus::Idle);
                ctx.tracker.completed(failure);
            }
            None => {
                if !ctx.signal.wait() {
                    break;
                }
            }
        }
    }

    if let Some(bridge) = &ctx.bridge {
        bridge.detach(&ctx.device);
    }
    tracing::debug!("Worker stopped on {}", ctx.device);
}

/// Run one task, converting errors and panics into a failure record.
fn execute(task: Task, device: &Arc<Device>) -> Option<TaskFailure> {
    let id = task.id().unwrap_or_default();
    let label = task.label().to_string();
    tracing::debug!("Running {} ({}) on {}", id, label, device);

    let result = match panic::catch_unwind(AssertUnwindSafe(|| task.execute(device))) {
        Ok(result) => result,
        Err(payload) => Err(RuntimeError::TaskPanicked {
            task: id,
            device: device.id(),
            message: panic_message(payload.as_ref()),
        }),
    };

    match result {
        Ok(()) => None,
        Err(error) => {
            tracing::error!("Task {} ({}) failed on {}: {}", id, label, device, error);
            Some(TaskFailure {
                task: id,
                label,
                device: device.id(),
                error,
            })
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use crate::scheduler::testing::{device, task};
    use crate::scheduler::FcfsScheduler;
    use crate::task::Score;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBridge {
        attached: AtomicUsize,
        detached: AtomicUsize,
        refuse: bool,
    }

    impl HostBridge for CountingBridge {
        fn attach(&self, _device: &Device) -> RuntimeResult<()> {
            if self.refuse {
                return Err(RuntimeError::HostBridge("no host runtime".into()));
            }
            self.attached.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn detach(&self, _device: &Device) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context(bridge: Option<Arc<dyn HostBridge>>) -> WorkerContext {
        let signal = WorkerSignal::new();
        WorkerContext {
            device: Arc::new(device(0, DeviceType::Cpu)),
            scheduler: Arc::new(FcfsScheduler::new()),
            tracker: Arc::new(CompletionTracker::new()),
            peers: Arc::from(vec![signal.clone()]),
            signal,
            bridge,
        }
    }

    #[test]
    fn test_bridge_attach_and_detach() {
        let bridge = Arc::new(CountingBridge {
            attached: AtomicUsize::new(0),
            detached: AtomicUsize::new(0),
            refuse: false,
        });
        let worker = Worker::spawn(context(Some(bridge.clone()))).unwrap();
        assert_eq!(bridge.attached.load(Ordering::SeqCst), 1);

        drop(worker);
        assert_eq!(bridge.detached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bridge_refusal_aborts_spawn() {
        let bridge = Arc::new(CountingBridge {
            attached: AtomicUsize::new(0),
            detached: AtomicUsize::new(0),
            refuse: true,
        });
        let err = Worker::spawn(context(Some(bridge))).err().unwrap();
        assert!(matches!(err, RuntimeError::HostBridge(_)));
    }

    #[test]
    fn test_failed_task_is_reported() {
        let ctx = context(None);
        let tracker = ctx.tracker.clone();
        let scheduler = ctx.scheduler.clone();
        let signal = ctx.signal.clone();
        let dev = ctx.device.clone();
        let worker = Worker::spawn(ctx).unwrap();

        // Placeholder programs cannot create kernels, so the task fails.
        let mut t = task("broken", &[dev.as_ref()], Score::default()).with_kernel("k");
        t.assign_id(crate::task::TaskId::new(1));
        tracker.submitted();
        scheduler.push(t).unwrap();
        signal.wake();

        let failures = tracker.wait_idle();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].label, "broken");
        assert_eq!(worker.status(), WorkerStatus::Idle);
    }

    #[test]
    fn test_kill_stops_idle_worker() {
        let ctx = context(None);
        let signal = ctx.signal.clone();
        let worker = Worker::spawn(ctx).unwrap();
        drop(worker);
        assert_eq!(signal.status(), WorkerStatus::Killed);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}

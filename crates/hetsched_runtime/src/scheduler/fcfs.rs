//! First-come-first-served policy.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::Scheduler;
use crate::device::Device;
use crate::error::RuntimeResult;
use crate::task::Task;

/// One global FIFO queue.
///
/// Only the head of the queue may be taken, and only by a device its program
/// covers. A head task that no ready device can run blocks every task behind
/// it.
#[derive(Default)]
pub struct FcfsScheduler {
    queue: Mutex<VecDeque<Task>>,
}

impl FcfsScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for FcfsScheduler {
    fn name(&self) -> &'static str {
        "fcfs"
    }

    fn push(&self, task: Task) -> RuntimeResult<()> {
        self.queue.lock().push_back(task);
        Ok(())
    }

    fn pop(&self, device: &Device) -> Option<Task> {
        let mut queue = self.queue.lock();
        if queue.front()?.program().has_device_id(device.id()) {
            queue.pop_front()
        } else {
            None
        }
    }

    fn has_work(&self) -> bool {
        !self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use crate::scheduler::testing::{device, task};
    use crate::task::Score;

    #[test]
    fn test_submission_order() {
        let cpu = device(0, DeviceType::Cpu);
        let sched = FcfsScheduler::new();
        for label in ["a", "b", "c"] {
            sched.push(task(label, &[&cpu], Score::default())).unwrap();
        }

        let order: Vec<String> = std::iter::from_fn(|| sched.pop(&cpu))
            .map(|t| t.label().to_string())
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(!sched.has_work());
    }

    #[test]
    fn test_head_of_line_blocking() {
        let cpu = device(0, DeviceType::Cpu);
        let gpu = device(1, DeviceType::Gpu);
        let sched = FcfsScheduler::new();
        sched.push(task("gpu-only", &[&gpu], Score::default())).unwrap();
        sched.push(task("cpu-only", &[&cpu], Score::default())).unwrap();

        // The CPU task is stuck behind the GPU task, however often we ask.
        for _ in 0..3 {
            assert!(sched.pop(&cpu).is_none());
        }
        assert!(sched.has_work());

        assert_eq!(sched.pop(&gpu).unwrap().label(), "gpu-only");
        assert_eq!(sched.pop(&cpu).unwrap().label(), "cpu-only");
        assert!(!sched.has_work());
    }

    #[test]
    fn test_empty_scheduler() {
        let sched = FcfsScheduler::new();
        assert!(!sched.has_work());
        assert!(sched.pop(&device(0, DeviceType::Cpu)).is_none());
    }

    #[test]
    fn test_matches_device_id_not_type() {
        let cpu0 = device(0, DeviceType::Cpu);
        let cpu1 = device(1, DeviceType::Cpu);
        let sched = FcfsScheduler::new();
        sched.push(task("pinned", &[&cpu1], Score::default())).unwrap();

        assert!(sched.pop(&cpu0).is_none());
        assert!(sched.pop(&cpu1).is_some());
    }
}

//! Earliest-finish-time style policy over CPU and GPU queues.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::Scheduler;
use crate::device::{Device, DeviceType};
use crate::error::{RuntimeError, RuntimeResult};
use crate::task::Task;

/// FIFO queue plus the summed scores of the tasks in it.
#[derive(Default)]
struct Lane {
    tasks: VecDeque<(f64, Task)>,
    score_sum: f64,
}

impl Lane {
    fn push(&mut self, score: f64, task: Task) {
        self.score_sum += score;
        self.tasks.push_back((score, task));
    }

    fn pop_for(&mut self, device: &Device) -> Option<Task> {
        let (_, head) = self.tasks.front()?;
        if !head.program().has_device_id(device.id()) {
            return None;
        }

        let (score, task) = self.tasks.pop_front()?;
        self.score_sum = if self.tasks.is_empty() {
            0.0
        } else {
            self.score_sum - score
        };
        Some(task)
    }
}

/// Two queues, one per device type.
///
/// A task eligible for both types joins whichever queue would have the lower
/// summed score with it added, so load is balanced by estimated cost rather
/// than task count. Tasks eligible for neither CPU nor GPU are rejected.
#[derive(Default)]
pub struct HeftScheduler {
    cpu: Mutex<Lane>,
    gpu: Mutex<Lane>,
}

impl HeftScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Summed scores of the CPU and GPU queues.
    pub fn score_sums(&self) -> (f64, f64) {
        let cpu = self.cpu.lock();
        let gpu = self.gpu.lock();
        (cpu.score_sum, gpu.score_sum)
    }
}

impl Scheduler for HeftScheduler {
    fn name(&self) -> &'static str {
        "heft"
    }

    fn push(&self, task: Task) -> RuntimeResult<()> {
        let score = *task.score();
        let on_cpu = task.program().has_device_type(DeviceType::Cpu);
        let on_gpu = task.program().has_device_type(DeviceType::Gpu);

        match (on_cpu, on_gpu) {
            (true, true) => {
                let mut cpu = self.cpu.lock();
                let mut gpu = self.gpu.lock();
                if cpu.score_sum + score.cpu < gpu.score_sum + score.gpu {
                    tracing::debug!("{} routed to CPU queue", task.label());
                    cpu.push(score.cpu, task);
                } else {
                    tracing::debug!("{} routed to GPU queue", task.label());
                    gpu.push(score.gpu, task);
                }
            }
            (true, false) => self.cpu.lock().push(score.cpu, task),
            (false, true) => self.gpu.lock().push(score.gpu, task),
            (false, false) => {
                return Err(RuntimeError::UnsupportedDeviceType {
                    scheduler: self.name(),
                })
            }
        }
        Ok(())
    }

    fn pop(&self, device: &Device) -> Option<Task> {
        match device.device_type() {
            DeviceType::Cpu => self.cpu.lock().pop_for(device),
            DeviceType::Gpu => self.gpu.lock().pop_for(device),
            DeviceType::Accelerator => None,
        }
    }

    fn has_work(&self) -> bool {
        let cpu = self.cpu.lock();
        let gpu = self.gpu.lock();
        !cpu.tasks.is_empty() || !gpu.tasks.is_empty()
    }
}

//! Performance-aware multi-queue policy.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use super::Scheduler;
use crate::device::{Device, DeviceType};
use crate::error::{RuntimeError, RuntimeResult};
use crate::task::Task;

#[derive(Debug, Clone, Copy)]
struct Entry {
    ratio: f64,
    seq: u64,
}

#[derive(Default)]
struct Queues {
    tasks: HashMap<u64, Task>,
    cpu: VecDeque<Entry>,
    gpu: VecDeque<Entry>,
    next_seq: u64,
}

impl Queues {
    fn list(&mut self, device_type: DeviceType) -> Option<&mut VecDeque<Entry>> {
        match device_type {
            DeviceType::Cpu => Some(&mut self.cpu),
            DeviceType::Gpu => Some(&mut self.gpu),
            DeviceType::Accelerator => None,
        }
    }
}

/// Insert before the first entry with a strictly lower ratio, so equal
/// ratios keep submission order.
fn insert_sorted(list: &mut VecDeque<Entry>, entry: Entry) {
    let at = list
        .iter()
        .position(|e| entry.ratio > e.ratio)
        .unwrap_or(list.len());
    list.insert(at, entry);
}

/// Two lists ordered by descending speed-up ratio.
///
/// The CPU list ranks by `gpu / cpu` score, so tasks that gain least from a
/// GPU run on CPUs first; the GPU list ranks by `cpu / gpu`. A task eligible
/// for both types sits in both lists and leaves both when either device type
/// takes it.
#[derive(Default)]
pub struct PamsScheduler {
    queues: Mutex<Queues>,
}

impl PamsScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels in the list of `device_type`, head first.
    pub fn snapshot(&self, device_type: DeviceType) -> Vec<String> {
        let mut queues = self.queues.lock();
        let seqs: Vec<u64> = match queues.list(device_type) {
            Some(list) => list.iter().map(|e| e.seq).collect(),
            None => return Vec::new(),
        };
        seqs.iter()
            .filter_map(|seq| queues.tasks.get(seq).map(|t| t.label().to_string()))
            .collect()
    }
}

impl Scheduler for PamsScheduler {
    fn name(&self) -> &'static str {
        "pams"
    }

    fn push(&self, task: Task) -> RuntimeResult<()> {
        let on_cpu = task.program().has_device_type(DeviceType::Cpu);
        let on_gpu = task.program().has_device_type(DeviceType::Gpu);
        if !on_cpu && !on_gpu {
            return Err(RuntimeError::UnsupportedDeviceType {
                scheduler: self.name(),
            });
        }

        let score = *task.score();
        let mut queues = self.queues.lock();
        let seq = queues.next_seq;
        queues.next_seq += 1;

        if on_gpu {
            insert_sorted(
                &mut queues.gpu,
                Entry {
                    ratio: score.cpu / score.gpu,
                    seq,
                },
            );
        }
        if on_cpu {
            insert_sorted(
                &mut queues.cpu,
                Entry {
                    ratio: score.gpu / score.cpu,
                    seq,
                },
            );
        }
        tracing::debug!(
            "{} queued (cpu ratio {:.3}, gpu ratio {:.3})",
            task.label(),
            score.gpu / score.cpu,
            score.cpu / score.gpu
        );
        queues.tasks.insert(seq, task);
        Ok(())
    }

    fn pop(&self, device: &Device) -> Option<Task> {
        let mut guard = self.queues.lock();
        let queues = &mut *guard;

        let head = queues.list(device.device_type())?.front()?.seq;
        if !queues.tasks.get(&head)?.program().has_device_id(device.id()) {
            return None;
        }

        queues.cpu.retain(|e| e.seq != head);
        queues.gpu.retain(|e| e.seq != head);
        queues.tasks.remove(&head)
    }

    fn has_work(&self) -> bool {
        let queues = self.queues.lock();
        !queues.cpu.is_empty() || !queues.gpu.is_empty()
    }
}

//! Task scheduling policies.
//!
//! A [`Scheduler`] holds submitted tasks and decides which one a requesting
//! device may take next. `push` and `pop` never block on work; a device that
//! finds nothing eligible gets `None` back and decides itself whether to
//! sleep.

mod fcfs;
mod heft;
mod pams;

pub use fcfs::FcfsScheduler;
pub use heft::HeftScheduler;
pub use pams::PamsScheduler;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::RuntimeResult;
use crate::task::Task;

/// Scheduling policy over queued tasks.
pub trait Scheduler: Send + Sync {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// Take ownership of a task and enqueue it.
    ///
    /// Fails only for tasks the policy cannot ever serve.
    fn push(&self, task: Task) -> RuntimeResult<()>;

    /// Take the next task `device` may run under this policy, if any.
    fn pop(&self, device: &Device) -> Option<Task>;

    /// Snapshot of whether any task is queued.
    fn has_work(&self) -> bool;
}

/// Built-in scheduling policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerPolicy {
    /// One global FIFO with head-of-line blocking.
    #[default]
    Fcfs,
    /// Per-type queues balanced by summed scores.
    Heft,
    /// Per-type queues ordered by speed-up ratio.
    Pams,
}

impl SchedulerPolicy {
    /// All policies.
    pub const ALL: [SchedulerPolicy; 3] = [
        SchedulerPolicy::Fcfs,
        SchedulerPolicy::Heft,
        SchedulerPolicy::Pams,
    ];

    /// Create a scheduler implementing this policy.
    pub fn build(&self) -> Arc<dyn Scheduler> {
        match self {
            SchedulerPolicy::Fcfs => Arc::new(FcfsScheduler::new()),
            SchedulerPolicy::Heft => Arc::new(HeftScheduler::new()),
            SchedulerPolicy::Pams => Arc::new(PamsScheduler::new()),
        }
    }
}

impl fmt::Display for SchedulerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerPolicy::Fcfs => write!(f, "fcfs"),
            SchedulerPolicy::Heft => write!(f, "heft"),
            SchedulerPolicy::Pams => write!(f, "pams"),
        }
    }
}

impl FromStr for SchedulerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fcfs" => Ok(SchedulerPolicy::Fcfs),
            "heft" => Ok(SchedulerPolicy::Heft),
            "pams" => Ok(SchedulerPolicy::Pams),
            other => Err(format!(
                "unknown scheduler '{}', expected one of: fcfs, heft, pams",
                other
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse_and_display() {
        for policy in SchedulerPolicy::ALL {
            assert_eq!(policy.to_string().parse::<SchedulerPolicy>().unwrap(), policy);
            assert_eq!(policy.build().name(), policy.to_string());
        }
        assert_eq!("PAMS".parse::<SchedulerPolicy>().unwrap(), SchedulerPolicy::Pams);
        assert!("round-robin".parse::<SchedulerPolicy>().is_err());
        assert_eq!(SchedulerPolicy::default(), SchedulerPolicy::Fcfs);
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&SchedulerPolicy::Heft).unwrap();
        assert_eq!(json, "\"heft\"");
        let back: SchedulerPolicy = serde_json::from_str("\"pams\"").unwrap();
        assert_eq!(back, SchedulerPolicy::Pams);
    }
}

use std::time::Duration;

use finality_core::participant::GroupId;

use crate::run::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Announce the wave and schedule its spawn.
    PrepareWave,
    SpawnWave,
}

/// Deferred work aimed at one specific run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTask {
    pub fire_at: Duration,
    pub run_id: RunId,
    pub group: GroupId,
    pub wave: u32,
    pub kind: TaskKind,
}

/// Tasks ordered by fire time; ties fire in insertion order.
#[derive(Debug, Default)]
pub struct Schedule {
    tasks: Vec<ScheduledTask>,
}

impl Schedule {
    pub fn push(&mut self, task: ScheduledTask) {
        let idx = self.tasks.partition_point(|t| t.fire_at <= task.fire_at);
        self.tasks.insert(idx, task);
    }

    /// Remove and return the earliest task due at `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<ScheduledTask> {
        if self.tasks.first().is_some_and(|t| t.fire_at <= now) {
            Some(self.tasks.remove(0))
        } else {
            None
        }
    }

    /// Drop every task aimed at `run_id`.
    pub fn cancel_run(&mut self, run_id: RunId) {
        self.tasks.retain(|t| t.run_id != run_id);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Throttle for a periodic sweep driven by the coordinator clock.
#[derive(Debug)]
pub struct SweepTimer {
    interval: Duration,
    last: Duration,
}

impl SweepTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Duration::ZERO,
        }
    }

    pub fn due(&mut self, now: Duration) -> bool {
        if now.saturating_sub(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

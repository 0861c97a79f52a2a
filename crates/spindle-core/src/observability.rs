use serde::{Deserialize, Serialize};

use crate::domain::LifecycleState;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub waiting: usize,
    pub running: usize,
    pub done: usize,
}

impl TaskCounts {
    pub fn record(&mut self, lifecycle: LifecycleState) {
        match lifecycle {
            LifecycleState::Waiting => self.waiting += 1,
            LifecycleState::Running => self.running += 1,
            LifecycleState::Done => self.done += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.waiting + self.running + self.done
    }
}

impl FromIterator<LifecycleState> for TaskCounts {
    fn from_iter<I: IntoIterator<Item = LifecycleState>>(iter: I) -> Self {
        let mut counts = TaskCounts::default();
        for lifecycle in iter {
            counts.record(lifecycle);
        }
        counts
    }
}

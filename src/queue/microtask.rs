//! FIFO queue of immediate continuations.

use std::collections::VecDeque;

use crate::task::{PendingTask, TaskInfo};

#[derive(Debug, Default)]
pub(crate) struct MicrotaskQueue {
    tasks: VecDeque<PendingTask>,
}

impl MicrotaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, task: PendingTask) {
        self.tasks.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<PendingTask> {
        self.tasks.pop_front()
    }

    pub(crate) fn clear(&mut self) -> Vec<PendingTask> {
        self.tasks.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn infos(&self) -> Vec<TaskInfo> {
        self.tasks.iter().map(TaskInfo::from).collect()
    }
}

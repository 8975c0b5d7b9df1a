//! Time-ordered queue of delayed callbacks.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::task::{PendingTask, TaskId, TaskInfo};

/// Ordering key: due time first, then insertion sequence.
type Key = (Duration, u64);

/// Which queued tasks a pop may return.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Eligibility {
    /// Any task that is due.
    Any,
    /// Only tasks enqueued before the given generation; newer ones are skipped.
    Before(u64),
    /// Only tasks enqueued before the given generation; stop at the first newer
    /// task that is due earlier, so time order is never violated.
    BeforeOrYield(u64),
}

#[derive(Debug, Default)]
pub(crate) struct MacrotaskQueue {
    tasks: BTreeMap<Key, PendingTask>,
    index: HashMap<TaskId, Key>,
    next_seq: u64,
}

impl MacrotaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds a task. Equal due times keep insertion order.
    pub(crate) fn push(&mut self, task: PendingTask) {
        let key = (task.due, self.next_seq);
        self.next_seq += 1;
        self.index.insert(task.id, key);
        self.tasks.insert(key, task);
    }

    /// Removes a task by id.
    pub(crate) fn remove(&mut self, id: TaskId) -> Option<PendingTask> {
        let key = self.index.remove(&id)?;
        self.tasks.remove(&key)
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    /// Pops the earliest task due at or before `limit`.
    pub(crate) fn pop_due(&mut self, limit: Duration, eligibility: Eligibility) -> Option<PendingTask> {
        let mut chosen = None;
        for (key, task) in self.tasks.range(..=(limit, u64::MAX)) {
            match eligibility {
                Eligibility::Any => {}
                Eligibility::Before(generation) if task.generation >= generation => continue,
                Eligibility::BeforeOrYield(generation) if task.generation >= generation => break,
                Eligibility::Before(_) | Eligibility::BeforeOrYield(_) => {}
            }
            chosen = Some(*key);
            break;
        }
        let task = self.tasks.remove(&chosen?)?;
        self.index.remove(&task.id);
        Some(task)
    }

    /// Latest due time among non-periodic tasks enqueued before `generation`.
    pub(crate) fn last_one_shot_due(&self, generation: u64) -> Option<Duration> {
        self.tasks
            .values()
            .rev()
            .find(|task| task.period.is_none() && task.generation < generation)
            .map(|task| task.due)
    }

    /// Removes every periodic task.
    pub(crate) fn drain_periodic(&mut self) -> Vec<PendingTask> {
        let keys: Vec<Key> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.period.is_some())
            .map(|(key, _)| *key)
            .collect();
        keys.into_iter()
            .filter_map(|key| self.tasks.remove(&key))
            .inspect(|task| {
                self.index.remove(&task.id);
            })
            .collect()
    }

    /// Removes every task.
    pub(crate) fn clear(&mut self) -> Vec<PendingTask> {
        self.index.clear();
        std::mem::take(&mut self.tasks).into_values().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn periodic_count(&self) -> usize {
        self.tasks.values().filter(|t| t.period.is_some()).count()
    }

    pub(crate) fn one_shot_count(&self) -> usize {
        self.len() - self.periodic_count()
    }

    /// Due time of the earliest task.
    pub(crate) fn next_due(&self) -> Option<Duration> {
        self.tasks.keys().next().map(|(due, _)| *due)
    }

    /// Tasks in execution order.
    pub(crate) fn infos(&self) -> Vec<TaskInfo> {
        self.tasks.values().map(TaskInfo::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Callback, TaskKind};

    fn task(due_ms: u64, generation: u64) -> PendingTask {
        PendingTask {
            id: TaskId::next(),
            kind: TaskKind::Macro,
            due: Duration::from_millis(due_ms),
            period: None,
            generation,
            callback: Callback::once(|| ()),
        }
    }

    fn periodic(due_ms: u64) -> PendingTask {
        PendingTask {
            period: Some(Duration::from_millis(due_ms)),
            ..task(due_ms, 0)
        }
    }

    #[test]
    fn test_pop_orders_by_due_then_insertion() {
        let mut queue = MacrotaskQueue::new();
        let a = task(10, 0);
        let b = task(0, 0);
        let c = task(10, 0);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        queue.push(a);
        queue.push(b);
        queue.push(c);

        let limit = Duration::from_millis(10);
        let order: Vec<TaskId> = std::iter::from_fn(|| queue.pop_due(limit, Eligibility::Any))
            .map(|t| t.id)
            .collect();
        assert_eq!(order, vec![b_id, a_id, c_id]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_respects_limit() {
        let mut queue = MacrotaskQueue::new();
        queue.push(task(5, 0));
        queue.push(task(15, 0));

        assert!(queue.pop_due(Duration::from_millis(10), Eligibility::Any).is_some());
        assert!(queue.pop_due(Duration::from_millis(10), Eligibility::Any).is_none());
        assert_eq!(queue.next_due(), Some(Duration::from_millis(15)));
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = MacrotaskQueue::new();
        let t = task(5, 0);
        let id = t.id;
        queue.push(t);

        assert!(queue.contains(id));
        assert!(queue.remove(id).is_some());
        assert!(!queue.contains(id));
        assert!(queue.remove(id).is_none());
    }

    #[test]
    fn test_before_skips_newer_generation() {
        let mut queue = MacrotaskQueue::new();
        let newer = task(0, 3);
        let older = task(5, 1);
        let older_id = older.id;
        queue.push(newer);
        queue.push(older);

        let popped = queue
            .pop_due(Duration::from_millis(10), Eligibility::Before(2))
            .unwrap();
        assert_eq!(popped.id, older_id);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_before_or_yield_stops_at_earlier_newer_task() {
        let mut queue = MacrotaskQueue::new();
        queue.push(task(0, 3));
        queue.push(task(5, 1));

        assert!(queue
            .pop_due(Duration::from_millis(10), Eligibility::BeforeOrYield(2))
            .is_none());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_last_one_shot_due_ignores_periodic_and_newer() {
        let mut queue = MacrotaskQueue::new();
        queue.push(task(10, 0));
        queue.push(periodic(50));
        queue.push(task(30, 4));

        assert_eq!(queue.last_one_shot_due(1), Some(Duration::from_millis(10)));
        assert_eq!(queue.last_one_shot_due(5), Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_drain_periodic() {
        let mut queue = MacrotaskQueue::new();
        queue.push(task(10, 0));
        queue.push(periodic(20));
        queue.push(periodic(30));

        assert_eq!(queue.periodic_count(), 2);
        assert_eq!(queue.drain_periodic().len(), 2);
        assert_eq!(queue.periodic_count(), 0);
        assert_eq!(queue.one_shot_count(), 1);
    }

    #[test]
    fn test_clear() {
        let mut queue = MacrotaskQueue::new();
        queue.push(task(10, 0));
        queue.push(task(20, 0));

        assert_eq!(queue.clear().len(), 2);
        assert!(queue.is_empty());
        assert!(queue.infos().is_empty());
    }
}

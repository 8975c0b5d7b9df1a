//! Property tests for execution order and virtual time.
//!
//! Verifies FIFO order at equal due times, tick bounds, the microtask fixed
//! point, and the flush pass budget.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{active_scheduler, init_test_logging, log, record, test_proptest_config};
use proptest::prelude::*;
use testkit_vtime::{Error, Scheduler, SchedulerConfig};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_delays() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..200, 1..40)
}

/// Indices of `delays` in the order the scheduler must run them.
fn expected_order(delays: &[u64], limit: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..delays.len()).filter(|&i| delays[i] <= limit).collect();
    order.sort_by_key(|&i| (delays[i], i));
    order
}

fn chain(scheduler: Scheduler, runs: Arc<AtomicUsize>, remaining: usize) {
    runs.fetch_add(1, Ordering::SeqCst);
    if remaining > 0 {
        let s = scheduler.clone();
        scheduler
            .schedule_delayed(1, move || chain(s, runs, remaining - 1))
            .unwrap();
    }
}

fn microtask_chain(scheduler: Scheduler, runs: Arc<AtomicUsize>, remaining: usize) {
    runs.fetch_add(1, Ordering::SeqCst);
    if remaining > 0 {
        let s = scheduler.clone();
        scheduler
            .schedule_immediate(move || microtask_chain(s, runs, remaining - 1))
            .unwrap();
    }
}

// ============================================================================
// Ordering
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    /// Tasks with the same delay run in the order they were scheduled.
    #[test]
    fn equal_delays_run_in_insertion_order(delay in 0u64..1_000, count in 1usize..50) {
        init_test_logging();
        let (scheduler, _scope) = active_scheduler(SchedulerConfig::new());
        let log = log();
        for i in 0..count {
            scheduler.schedule_delayed(delay, record(&log, i)).unwrap();
        }

        scheduler.tick(delay).unwrap();
        prop_assert_eq!(log.lock().clone(), (0..count).collect::<Vec<_>>());
    }

    /// tick(n) runs exactly the tasks due within n, in (due, insertion)
    /// order, and ends at exactly now + n.
    #[test]
    fn tick_runs_only_due_tasks(delays in arb_delays(), amount in 0u64..250) {
        init_test_logging();
        let (scheduler, _scope) = active_scheduler(SchedulerConfig::new());
        let log = log();
        for (i, delay) in delays.iter().enumerate() {
            scheduler.schedule_delayed(*delay, record(&log, i)).unwrap();
        }

        let before = scheduler.now();
        scheduler.tick(amount).unwrap();
        prop_assert_eq!(log.lock().clone(), expected_order(&delays, amount));
        prop_assert_eq!(scheduler.now(), before + Duration::from_millis(amount));
    }

    /// Split ticks run the same tasks in the same order as one long tick.
    #[test]
    fn split_ticks_match_single_tick(delays in arb_delays(), split in 0u64..200) {
        init_test_logging();
        let (scheduler, _scope) = active_scheduler(SchedulerConfig::new());
        let log = log();
        for (i, delay) in delays.iter().enumerate() {
            scheduler.schedule_delayed(*delay, record(&log, i)).unwrap();
        }

        scheduler.tick(split).unwrap();
        scheduler.tick(200 - split).unwrap();
        prop_assert_eq!(log.lock().clone(), expected_order(&delays, 200));
        prop_assert!(scheduler.is_idle());
    }

    /// flush() runs everything in order and reports the latest due time as
    /// elapsed.
    #[test]
    fn flush_runs_all_in_order(delays in arb_delays()) {
        init_test_logging();
        let (scheduler, _scope) = active_scheduler(SchedulerConfig::new());
        let log = log();
        for (i, delay) in delays.iter().enumerate() {
            scheduler.schedule_delayed(*delay, record(&log, i)).unwrap();
        }

        let elapsed = scheduler.flush().unwrap();
        let latest = delays.iter().copied().max().unwrap_or(0);
        prop_assert_eq!(elapsed, Duration::from_millis(latest));
        prop_assert_eq!(log.lock().clone(), expected_order(&delays, u64::MAX));
    }

    /// Cancelled tasks never run and the rest keep their order.
    #[test]
    fn cancelled_tasks_are_skipped(
        delays in arb_delays(),
        cancel_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        init_test_logging();
        let (scheduler, _scope) = active_scheduler(SchedulerConfig::new());
        let log = log();
        let ids: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(i, delay)| scheduler.schedule_delayed(*delay, record(&log, i)).unwrap())
            .collect();
        for (i, id) in ids.iter().enumerate() {
            if cancel_mask[i] {
                prop_assert!(scheduler.cancel(*id));
            }
        }

        scheduler.flush().unwrap();
        let expected: Vec<usize> = expected_order(&delays, u64::MAX)
            .into_iter()
            .filter(|&i| !cancel_mask[i])
            .collect();
        prop_assert_eq!(log.lock().clone(), expected);
    }
}

// ============================================================================
// Fixed Points And Budgets
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(100))]

    /// Microtasks enqueued by microtasks run before flush_microtasks returns.
    #[test]
    fn microtask_drain_reaches_fixed_point(depth in 0usize..200) {
        init_test_logging();
        let (scheduler, _scope) = active_scheduler(SchedulerConfig::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let s = scheduler.clone();
        let r = Arc::clone(&runs);
        scheduler.schedule_immediate(move || microtask_chain(s, r, depth)).unwrap();

        prop_assert_eq!(scheduler.flush_microtasks().unwrap(), depth + 1);
        prop_assert_eq!(runs.load(Ordering::SeqCst), depth + 1);
        prop_assert!(scheduler.is_idle());
    }

    /// A task that reschedules itself N times flushes iff N <= max_passes.
    #[test]
    fn flush_budget_bounds_reschedules(reschedules in 0usize..30, max_passes in 0usize..30) {
        init_test_logging();
        let (scheduler, _scope) = active_scheduler(SchedulerConfig::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let s = scheduler.clone();
        let r = Arc::clone(&runs);
        scheduler.schedule_delayed(1, move || chain(s, r, reschedules)).unwrap();

        let result = scheduler.flush_with_limit(max_passes);
        if reschedules <= max_passes {
            prop_assert_eq!(result.unwrap(), Duration::from_millis(reschedules as u64 + 1));
            prop_assert!(scheduler.is_idle());
        } else {
            let is_limit = matches!(
                result,
                Err(Error::DrainLimitExceeded { pending: 1, .. })
            );
            prop_assert!(is_limit);
            prop_assert_eq!(runs.load(Ordering::SeqCst), max_passes + 1);
        }
    }
}

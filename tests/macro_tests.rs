//! Integration tests for the `#[testkit_vtime::test]` macro.

#![cfg(feature = "macros")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use testkit_vtime::{Error, Scheduler};

/// Basic test without scheduler injection.
#[testkit_vtime::test]
fn test_basic() {
    assert_eq!(2 + 2, 4);
}

/// Test with Scheduler injection.
#[testkit_vtime::test]
fn test_with_scheduler(scheduler: Scheduler) {
    assert!(scheduler.describe_state().scope_active);
    assert_eq!(scheduler.now(), Duration::ZERO);

    scheduler.tick(10).unwrap();
    assert_eq!(scheduler.now(), Duration::from_millis(10));
}

/// Test with a borrowed Scheduler.
#[testkit_vtime::test]
fn test_with_scheduler_ref(scheduler: &Scheduler) {
    scheduler.schedule_delayed(50, || ()).unwrap();
    assert_eq!(scheduler.flush().unwrap(), Duration::from_millis(50));
}

/// Test with custom start time.
#[testkit_vtime::test(start_time = 1000)]
fn test_start_time(scheduler: Scheduler) {
    assert_eq!(scheduler.now(), Duration::from_secs(1));
}

/// Test with a tight pass budget.
#[testkit_vtime::test(max_passes = 1)]
fn test_max_passes(scheduler: Scheduler) {
    let s = scheduler.clone();
    scheduler
        .schedule_delayed(1, move || {
            let s2 = s.clone();
            s.schedule_delayed(1, move || {
                s2.schedule_delayed(1, || ()).unwrap();
            })
            .unwrap();
        })
        .unwrap();

    assert!(matches!(
        scheduler.flush(),
        Err(Error::DrainLimitExceeded { max_passes: 1, .. })
    ));
    scheduler.flush().unwrap();
}

/// Test with auto-render enabled.
#[testkit_vtime::test(auto_render = true)]
fn test_auto_render(scheduler: Scheduler) {
    let renders = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&renders);
    scheduler.on_drain_step_rendered(move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    scheduler.schedule_delayed(1, || ()).unwrap();
    scheduler.schedule_delayed(2, || ()).unwrap();

    scheduler.tick(2).unwrap();
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

/// Leaked tasks fail the test under the fail policy.
#[testkit_vtime::test(leak = "fail")]
#[should_panic(expected = "still in the queue")]
fn test_leak_fails(scheduler: Scheduler) {
    scheduler.schedule_delayed(100, || ()).unwrap();
}

/// Leaked tasks are only reported by default.
#[testkit_vtime::test]
fn test_leak_reported(scheduler: Scheduler) {
    scheduler.schedule_periodic(100, || ()).unwrap();
}

/// Async body awaiting virtual sleeps.
#[testkit_vtime::test]
async fn test_async_with_scheduler(scheduler: Scheduler) {
    let sleep = scheduler.sleep(100).unwrap();
    scheduler.tick(100).unwrap();
    sleep.await;
    assert_eq!(scheduler.now(), Duration::from_millis(100));
}

/// Async body with a fallible return type.
#[testkit_vtime::test]
async fn test_async_result(scheduler: Scheduler) -> Result<(), Error> {
    let handle = scheduler.spawn(async { 7 })?;
    scheduler.flush_microtasks()?;
    assert_eq!(handle.await, Some(7));
    Ok(())
}

/// Multiple configuration options.
#[testkit_vtime::test(start_time = 500, max_passes = 3, leak = "ignore")]
fn test_combined_config(scheduler: Scheduler) {
    assert_eq!(scheduler.now(), Duration::from_millis(500));
    assert_eq!(scheduler.config().max_passes, 3);
    scheduler.schedule_delayed(1, || ()).unwrap();
}

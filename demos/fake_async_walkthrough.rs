//! Example: Driving application timers with virtual time
//!
//! A small search box debounces keystrokes through `AsyncSeams`. In production
//! the seams go to Tokio; here an interception scope redirects them into a
//! `Scheduler`, so the test decides when time passes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use testkit_vtime::prelude::*;

/// Debounced search: only the last query typed within `delay` is sent.
struct SearchBox {
    seams: AsyncSeams,
    delay: Duration,
    pending: Mutex<Option<TaskId>>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl SearchBox {
    fn new(seams: AsyncSeams, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            seams,
            delay,
            pending: Mutex::new(None),
            sent: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn type_query(&self, query: &str) -> testkit_vtime::Result<()> {
        let previous = self.pending.lock().take();
        if let Some(previous) = previous {
            self.seams.clear_timeout(previous);
        }
        let sent = Arc::clone(&self.sent);
        let query = query.to_string();
        let id = self
            .seams
            .set_timeout(self.delay, move || sent.lock().push(query))?;
        *self.pending.lock() = Some(id);
        Ok(())
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

fn main() -> testkit_vtime::Result<()> {
    println!("🧰 testkit-vtime - fake_async Walkthrough\n");

    example_tick_and_flush()?;
    example_debounced_search()?;
    example_runaway_timer()?;

    println!("\n✅ All walkthrough examples completed!");
    Ok(())
}

/// tick moves a fixed amount; flush runs until only periodic work is left
fn example_tick_and_flush() -> testkit_vtime::Result<()> {
    println!("📌 Example 1: tick and flush");

    fake_async(SchedulerConfig::new(), |scheduler| -> testkit_vtime::Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for (delay, name) in [(10, "b"), (0, "a"), (10, "c"), (500, "d")] {
            let log = Arc::clone(&log);
            scheduler.schedule_delayed(delay, move || log.lock().push(name))?;
        }

        scheduler.tick(10)?;
        println!("   After tick(10): {:?} at {:?}", log.lock(), scheduler.now());

        let elapsed = scheduler.flush()?;
        println!("   flush() advanced {elapsed:?}: {:?}", log.lock());
        Ok(())
    })??;

    println!();
    Ok(())
}

/// Application code schedules through seams; the scope captures it
fn example_debounced_search() -> testkit_vtime::Result<()> {
    println!("📌 Example 2: Debounced search through AsyncSeams");

    let seams = AsyncSeams::tokio();
    let search = SearchBox::new(seams.clone(), Duration::from_millis(300));
    let scheduler = Scheduler::new();
    let scope = scheduler.enter_scope_with(&seams)?;

    search.type_query("r")?;
    scheduler.tick(100)?;
    search.type_query("ru")?;
    scheduler.tick(100)?;
    search.type_query("rust")?;

    scheduler.tick(299)?;
    println!("   After 299ms of quiet: sent = {:?}", search.sent());
    scheduler.tick(1)?;
    println!("   After 300ms of quiet: sent = {:?}", search.sent());

    let report = scope.exit()?;
    println!("   Scope exited, leaked: {report}");
    println!("   Seams intercepted afterwards: {}\n", seams.is_intercepted());
    Ok(())
}

/// A timer that always reschedules itself is reported, not looped forever
fn example_runaway_timer() -> testkit_vtime::Result<()> {
    println!("📌 Example 3: Bounded flush");

    fn poll_forever(scheduler: Scheduler) {
        let next = scheduler.clone();
        let _ = scheduler.schedule_delayed(1_000, move || poll_forever(next));
    }

    let config = SchedulerConfig::new().max_passes(5);
    let outcome = fake_async(config, |scheduler| {
        poll_forever(scheduler.clone());
        scheduler.flush()
    })?;

    match outcome {
        Err(error) => println!("   flush() failed as expected: {error}"),
        Ok(elapsed) => println!("   flush() unexpectedly finished after {elapsed:?}"),
    }
    Ok(())
}

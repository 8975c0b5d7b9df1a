//! Example: Waiting for quiescence
//!
//! `PendingWork` counts outstanding operations. Instead of draining queues by
//! hand, a test can await `when_stable()` and continue once every tracked
//! operation has settled.

use std::time::Duration;

use testkit_vtime::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> testkit_vtime::Result<()> {
    println!("🧰 testkit-vtime - Stability Examples\n");

    example_real_time().await?;
    example_virtual_time()?;

    println!("\n✅ All stability examples completed!");
    Ok(())
}

/// Tracked work on the real Tokio runtime
async fn example_real_time() -> testkit_vtime::Result<()> {
    println!("📌 Example 1: Real timers");

    let seams = AsyncSeams::tokio();
    let work = PendingWork::new();

    for delay in [20u64, 40, 60] {
        let guard = work.track();
        seams.set_timeout(delay, move || {
            println!("   request finished after {delay}ms");
            drop(guard);
        })?;
    }
    println!("   Outstanding: {}", work.count());

    let start = tokio::time::Instant::now();
    work.when_stable().await;
    println!("   Stable after {:?}\n", start.elapsed());
    Ok(())
}

/// The same tracking under virtual time
fn example_virtual_time() -> testkit_vtime::Result<()> {
    println!("📌 Example 2: Virtual timers");

    fake_async(SchedulerConfig::new(), |scheduler| -> testkit_vtime::Result<()> {
        let work = PendingWork::new();
        for delay in [Duration::from_secs(5), Duration::from_secs(30)] {
            let guard = work.track();
            scheduler.schedule_delayed(delay, move || drop(guard))?;
        }

        scheduler.tick(Duration::from_secs(5))?;
        println!("   After 5s: stable = {}", work.is_stable());
        scheduler.tick(Duration::from_secs(25))?;
        println!("   After 30s: stable = {}", work.is_stable());
        Ok(())
    })?
}

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use dpscheduler::{Priority, SchedulerConfig, SchedulerError};

fn config(core: usize, max: usize) -> SchedulerConfig {
    SchedulerConfig {
        core_pool_size: core,
        max_pool_size: max,
        keep_alive: Duration::from_millis(100),
        max_wait_for_low_priority: Duration::from_millis(50),
        ..SchedulerConfig::default()
    }
}

#[test]
fn burst_then_idle_shrinks_back_to_core() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(1, 4)).unwrap();
    let barrier = Arc::new(Barrier::new(5));
    for _ in 0..4 {
        let b = barrier.clone();
        scheduler
            .submit_with_priority(Priority::High, move || {
                b.wait();
            })
            .unwrap();
    }
    barrier.wait();
    thread::sleep(Duration::from_millis(50));
    assert!(scheduler.current_pool_size() >= 2);

    // Idle-worker expiry is opportunistic (checked on the next worker_done
    // or config mutation), not driven by a background reaper, so nudge it
    // once the keep-alive window has actually elapsed.
    thread::sleep(Duration::from_millis(150));
    scheduler.set_keep_alive(Duration::from_millis(100));
    assert_eq!(scheduler.current_pool_size(), 1);
    scheduler.shutdown();
}

#[test]
fn low_priority_reuses_idle_worker_before_growing() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(1, 4)).unwrap();
    scheduler
        .submit_with_priority(Priority::High, || {})
        .unwrap();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(scheduler.current_pool_size(), 1);

    let ran = Arc::new(AtomicI32::new(0));
    let r = ran.clone();
    scheduler
        .submit_with_priority(Priority::Low, move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    thread::sleep(Duration::from_millis(30));

    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.current_pool_size(), 1);
    scheduler.shutdown();
}

#[test]
fn low_priority_grows_pool_when_saturated_past_wait() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(1, 2)).unwrap();
    let barrier = Arc::new(Barrier::new(2));
    let b = barrier.clone();
    scheduler
        .submit_with_priority(Priority::High, move || {
            b.wait();
            thread::sleep(Duration::from_millis(200));
        })
        .unwrap();
    barrier.wait();

    let ran = Arc::new(AtomicI32::new(0));
    let r = ran.clone();
    scheduler
        .submit_with_priority(Priority::Low, move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    thread::sleep(Duration::from_millis(120));
    assert_eq!(scheduler.current_pool_size(), 2);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    scheduler.shutdown();
}

#[test]
fn recurring_task_runs_multiple_times_until_removed() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(2, 2)).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let handle = scheduler
        .schedule_recurring(
            Duration::ZERO,
            Duration::from_millis(20),
            Priority::High,
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

    thread::sleep(Duration::from_millis(110));
    assert!(scheduler.remove(&handle));
    let after_removal = count.load(Ordering::SeqCst);
    assert!(after_removal >= 3);

    thread::sleep(Duration::from_millis(60));
    assert_eq!(count.load(Ordering::SeqCst), after_removal);
    scheduler.shutdown();
}

#[test]
fn shutdown_cancels_queued_work_and_rejects_new_submissions() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(1, 1)).unwrap();
    let ran = Arc::new(AtomicI32::new(0));
    let r = ran.clone();
    scheduler
        .submit_after_with_priority(Duration::from_secs(10), Priority::High, move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    scheduler.shutdown();
    assert_eq!(ran.load(Ordering::SeqCst), 0);

    match scheduler.submit(|| {}) {
        Err(SchedulerError::Shutdown) => {}
        other => panic!("expected Shutdown error, got {other:?}"),
    }
}

#[test]
fn prestart_all_core_threads_spawns_core_pool_size_workers() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(3, 5)).unwrap();
    assert_eq!(scheduler.current_pool_size(), 0);
    let started = scheduler.prestart_all_core_threads();
    assert_eq!(started, 3);
    assert_eq!(scheduler.current_pool_size(), 3);
    assert_eq!(scheduler.idle_worker_count(), 3);
    scheduler.shutdown();
    assert_eq!(scheduler.current_pool_size(), 0);
}

#[test]
fn submit_with_result_returns_the_closures_value() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(1, 1)).unwrap();
    let handle = scheduler.submit_with_result(|| 2 + 2).unwrap();
    assert_eq!(handle.wait().unwrap(), 4);
    scheduler.shutdown();
}

#[test]
fn shutdown_is_idempotent() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(1, 1)).unwrap();
    scheduler.submit(|| {}).unwrap();
    scheduler.shutdown();
    assert!(scheduler.is_shutdown());
    scheduler.shutdown();
    assert!(scheduler.is_shutdown());
}

#[test]
fn submit_with_result_surfaces_panics_as_task_panicked() {
    let scheduler = dpscheduler::PriorityScheduler::new(config(1, 1)).unwrap();
    let handle = scheduler
        .submit_with_result(|| -> i32 { panic!("kaboom") })
        .unwrap();
    match handle.wait() {
        Err(SchedulerError::TaskPanicked(msg)) => assert!(msg.contains("kaboom")),
        other => panic!("expected TaskPanicked, got {other:?}"),
    }
    scheduler.shutdown();
}

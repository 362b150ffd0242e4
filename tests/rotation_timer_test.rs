//! Integration tests for the spawned rotation supervisor.

use beacon_attendance::rotation::{RotationEvent, RotationScheduler};
use beacon_attendance::{MemoryStore, Module, Seed, SharedStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn scheduler_with(
    modules: Vec<Module>,
) -> (Arc<RotationScheduler>, crossbeam_channel::Receiver<RotationEvent>) {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let (tx, rx) = crossbeam_channel::unbounded();
    let scheduler = RotationScheduler::new(store).with_events(tx);
    for module in modules {
        scheduler.register(module).unwrap();
    }
    (Arc::new(scheduler), rx)
}

async fn stop(supervisor: JoinHandle<()>, running: &AtomicBool) {
    running.store(false, Ordering::SeqCst);
    tokio::time::timeout(Duration::from_secs(1), supervisor)
        .await
        .expect("supervisor did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_timers_rotate_each_active_module_once() {
    let (scheduler, events) = scheduler_with(vec![
        Module::new("lab", "L_", Seed::new(1).unwrap(), 10).unwrap(),
        Module::new("hall", "H_", Seed::new(2).unwrap(), 10).unwrap(),
    ]);
    let running = Arc::new(AtomicBool::new(true));

    let supervisor =
        Arc::clone(&scheduler).spawn(Duration::from_millis(10), Arc::clone(&running));

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop(supervisor, &running).await;

    let rotated: Vec<RotationEvent> = events.try_iter().collect();
    assert_eq!(rotated.len(), 2);
    assert!(rotated
        .iter()
        .all(|e| matches!(e, RotationEvent::Rotated { .. })));

    assert_eq!(
        scheduler.module("lab").unwrap().published_identifier(),
        "L_48271"
    );
    assert_eq!(
        scheduler.module("hall").unwrap().published_identifier(),
        "H_96542"
    );
}

#[tokio::test]
async fn test_timers_leave_paused_modules_alone() {
    let module = Module::new("lab", "L_", Seed::new(7).unwrap(), 1).unwrap();
    let (scheduler, events) = scheduler_with(vec![module]);
    scheduler.set_paused("lab", true).unwrap();
    let before = scheduler.module("lab").unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let supervisor =
        Arc::clone(&scheduler).spawn(Duration::from_millis(10), Arc::clone(&running));

    tokio::time::sleep(Duration::from_millis(60)).await;
    stop(supervisor, &running).await;

    assert!(events.try_iter().next().is_none());
    assert_eq!(scheduler.module("lab").unwrap(), before);
}

#[tokio::test]
async fn test_module_registered_while_running_gets_a_timer() {
    let (scheduler, events) = scheduler_with(Vec::new());
    let running = Arc::new(AtomicBool::new(true));
    let supervisor =
        Arc::clone(&scheduler).spawn(Duration::from_millis(10), Arc::clone(&running));

    tokio::time::sleep(Duration::from_millis(30)).await;
    let registrar = Arc::clone(&scheduler);
    tokio::task::spawn_blocking(move || {
        registrar
            .register(Module::new("late", "Z_", Seed::new(1).unwrap(), 10).unwrap())
            .unwrap();
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop(supervisor, &running).await;

    let rotated: Vec<RotationEvent> = events.try_iter().collect();
    assert_eq!(rotated.len(), 1);
    assert_eq!(
        scheduler.module("late").unwrap().published_identifier(),
        "Z_48271"
    );
}

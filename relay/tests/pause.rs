#![cfg(feature = "test-utils")]

use std::time::Duration;

use rand::random;
use relay::test_utils::group::create_group;
use relay::test_utils::memory::MemoryDispatcher;
use relay::types::{PartitionKey, ReplicationEvent};
use relay::workers::coordinator::GroupRunState;
use relay::workers::dispatch::WorkerRunState;
use telemetry::tracing::init_test_tracing;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread")]
async fn pause_blocks_dispatch_until_resume() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 2, dispatcher.clone());

    group.start().await.unwrap();
    group.pause().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Paused);

    // Events enqueued while paused accumulate in the shards.
    for key in 0..4u64 {
        group
            .enqueue(ReplicationEvent::new(PartitionKey(key), key.to_string()))
            .unwrap();
    }

    sleep(Duration::from_millis(200)).await;
    assert!(dispatcher.dispatched().await.is_empty());

    let dispatched = dispatcher.wait_for_dispatched_count(4).await;
    group.resume().await.unwrap();
    dispatched.notified().await;

    assert_eq!(dispatcher.dispatched().await.len(), 4);

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_is_idempotent() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 3, dispatcher.clone());

    group.start().await.unwrap();
    group.pause().await.unwrap();
    group.pause().await.unwrap();

    assert_eq!(group.run_state().await, GroupRunState::Paused);
    for state in group.worker_states() {
        assert_eq!(state.run_state().await, WorkerRunState::Paused);
    }

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rapid_pause_resume_leaves_dispatch_healthy() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 2, dispatcher.clone());

    group.start().await.unwrap();

    // Resume fires while the pause barrier is still collecting workers. The
    // barrier holds the coordination lock, so the resume queues behind it and
    // every worker is observed parked before any of them unparks.
    tokio::join!(
        async {
            group.pause().await.unwrap();
        },
        async {
            sleep(Duration::from_millis(10)).await;
            group.resume().await.unwrap();
        }
    );

    assert_eq!(group.run_state().await, GroupRunState::Running);

    let dispatched = dispatcher.wait_for_dispatched_count(2).await;
    group
        .enqueue(ReplicationEvent::new(PartitionKey(0), "after"))
        .unwrap();
    group
        .enqueue(ReplicationEvent::new(PartitionKey(1), "resume"))
        .unwrap();
    dispatched.notified().await;

    assert_eq!(dispatcher.dispatched().await.len(), 2);

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_on_stopped_group_is_a_noop() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 2, dispatcher.clone());

    group.start().await.unwrap();
    group.stop().await.unwrap();

    group.pause().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Stopped);

    group.resume().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn paused_group_stops_cleanly() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 3, dispatcher.clone());

    group.start().await.unwrap();
    group.pause().await.unwrap();

    group.stop().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Stopped);
    assert!(group.stop_failures().await.is_empty());
    for state in group.worker_states() {
        assert_eq!(state.run_state().await, WorkerRunState::Stopped);
    }
}

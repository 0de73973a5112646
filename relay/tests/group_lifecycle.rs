#![cfg(feature = "test-utils")]

use rand::random;
use relay::config::GroupConfig;
use relay::error::ErrorKind;
use relay::group::DispatcherGroup;
use relay::test_utils::group::create_group;
use relay::test_utils::memory::MemoryDispatcher;
use relay::types::{PartitionKey, ReplicationEvent};
use relay::workers::coordinator::GroupRunState;
use relay::workers::dispatch::WorkerRunState;
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn start_runs_all_workers_and_routes_by_partition() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 4, dispatcher.clone());

    group.start().await.unwrap();
    assert!(group.is_running().await);
    assert_eq!(group.run_state().await, GroupRunState::Running);

    // Partition key 7 with 4 workers must land on worker 3.
    let dispatched = dispatcher.wait_for_dispatched_count(1).await;
    group
        .enqueue(ReplicationEvent::new(PartitionKey(7), "e7"))
        .unwrap();
    dispatched.notified().await;

    let events = dispatcher.dispatched().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, 3);
    assert_eq!(events[0].1.partition, Some(PartitionKey(7)));

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn start_failure_marks_group_failed_but_healthy_workers_keep_running() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    dispatcher.fail_open_for(1).await;

    let group = create_group(random(), 3, dispatcher.clone());

    let err = group.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkerStartFailed);
    assert!(std::error::Error::source(&err).is_some());

    assert_eq!(group.run_state().await, GroupRunState::Failed);
    assert!(!group.is_running().await);

    // The start-up barrier waited on every worker, so states are settled: the
    // healthy workers keep running until the group is explicitly stopped.
    let states = group.worker_states();
    assert_eq!(states[0].run_state().await, WorkerRunState::Running);
    assert_eq!(states[1].run_state().await, WorkerRunState::Failed);
    assert_eq!(states[2].run_state().await, WorkerRunState::Running);
    assert!(states[1].failure().await.is_some());

    group.close().await.unwrap();
    for state in group.worker_states() {
        assert!(state.is_closed().await);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_and_rejects_later_enqueues() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 2, dispatcher.clone());

    group.start().await.unwrap();
    group.stop().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Stopped);

    // Second stop is a no-op.
    group.stop().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Stopped);

    let err = group
        .enqueue(ReplicationEvent::new(PartitionKey(0), "late"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_start_releases_resources() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 3, dispatcher.clone());

    group.stop().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Stopped);
    for state in group.worker_states() {
        assert!(state.is_closed().await);
        assert_eq!(state.run_state().await, WorkerRunState::Stopped);
    }

    // A stopped group cannot be restarted.
    let err = group.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_twice_is_a_noop() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 2, dispatcher.clone());

    group.start().await.unwrap();
    group.start().await.unwrap();
    assert!(group.is_running().await);

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolved_partition_is_rejected_without_routing() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 4, dispatcher.clone());

    group.start().await.unwrap();

    let err = group
        .enqueue(ReplicationEvent::unresolved("orphan"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RoutingFailed);

    // The event must not have been silently dropped into worker 0.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(dispatcher.dispatched().await.is_empty());

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn events_enqueued_before_start_are_dispatched_after_start() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 2, dispatcher.clone());

    for i in 0..3u8 {
        group
            .enqueue(ReplicationEvent::new(PartitionKey(i as u64), vec![i]))
            .unwrap();
    }

    let dispatched = dispatcher.wait_for_dispatched_count(3).await;
    group.start().await.unwrap();
    dispatched.notified().await;

    assert_eq!(dispatcher.dispatched().await.len(), 3);

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn start_timeout_fails_the_group_and_stop_still_works() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    dispatcher.hang_open_for(1).await;

    let mut config = GroupConfig::new(random(), 2);
    config.start_timeout_ms = Some(200);
    let group = DispatcherGroup::new(config, dispatcher.clone()).unwrap();

    let err = group.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkerStartFailed);
    assert_eq!(group.run_state().await, GroupRunState::Failed);

    // The worker stuck in start-up must not make stop hang.
    group.stop().await.unwrap();
    assert_eq!(group.run_state().await, GroupRunState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatch_failure_is_contained_to_one_worker() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    dispatcher.fail_dispatch_for(0).await;

    let group = create_group(random(), 2, dispatcher.clone());
    group.start().await.unwrap();

    let dispatched = dispatcher.wait_for_dispatched_count(1).await;
    group
        .enqueue(ReplicationEvent::new(PartitionKey(0), "to-failing"))
        .unwrap();
    group
        .enqueue(ReplicationEvent::new(PartitionKey(1), "to-healthy"))
        .unwrap();
    dispatched.notified().await;

    // Worker 1 delivered its event even though worker 0 failed.
    assert_eq!(dispatcher.payloads_for_worker(1).await, vec![b"to-healthy".to_vec()]);

    let states = group.worker_states();
    let failed = states[0]
        .wait_for_run_state(&[WorkerRunState::Failed])
        .await;
    assert_eq!(failed.failure().unwrap().kind(), ErrorKind::DispatchFailed);
    drop(failed);
    assert!(states[1].is_running().await);
    assert!(!group.is_running().await);

    // The already-failed worker surfaces as a stop failure, not a stop error.
    group.stop().await.unwrap();
    let stop_failures = group.stop_failures().await;
    assert_eq!(stop_failures.len(), 1);
    assert_eq!(stop_failures[0].0, 0);
}

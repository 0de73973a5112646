#![cfg(feature = "test-utils")]

use rand::random;
use relay::test_utils::group::create_group;
use relay::test_utils::memory::MemoryDispatcher;
use relay::types::{PartitionKey, ReplicationEvent};
use telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn same_worker_partitions_preserve_per_partition_order() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 4, dispatcher.clone());

    group.start().await.unwrap();

    // Keys 3 and 7 both map to worker 3 with four workers, so their events share
    // a shard and must interleave without reordering either partition.
    let dispatched = dispatcher.wait_for_dispatched_count(6).await;
    for i in 0..3u32 {
        group
            .enqueue(ReplicationEvent::new(PartitionKey(3), format!("a{i}")))
            .unwrap();
        group
            .enqueue(ReplicationEvent::new(PartitionKey(7), format!("b{i}")))
            .unwrap();
    }
    dispatched.notified().await;

    assert_eq!(dispatcher.payloads_for_worker(3).await.len(), 6);

    let per_partition = dispatcher.payloads_per_partition().await;
    assert_eq!(
        per_partition[&3],
        vec![b"a0".to_vec(), b"a1".to_vec(), b"a2".to_vec()]
    );
    assert_eq!(
        per_partition[&7],
        vec![b"b0".to_vec(), b"b1".to_vec(), b"b2".to_vec()]
    );

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn events_spread_across_workers_by_partition_key() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 4, dispatcher.clone());

    group.start().await.unwrap();

    let dispatched = dispatcher.wait_for_dispatched_count(8).await;
    for key in 0..8u64 {
        group
            .enqueue(ReplicationEvent::new(PartitionKey(key), key.to_string()))
            .unwrap();
    }
    dispatched.notified().await;

    for (worker_index, event) in dispatcher.dispatched().await {
        let partition = event.partition.unwrap();
        assert_eq!(worker_index as u64, partition.0 % 4);
    }

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cross_partition_order_is_not_guaranteed() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 2, dispatcher.clone());

    group.start().await.unwrap();

    // Partitions 0 and 1 live on different workers. Each round enqueues one
    // event per partition in a fixed order and waits for both deliveries, so
    // the only ordering freedom left is between the two workers.
    let rounds = 200u32;
    for round in 0..rounds {
        let dispatched = dispatcher
            .wait_for_dispatched_count((round as usize + 1) * 2)
            .await;
        group
            .enqueue(ReplicationEvent::new(PartitionKey(0), format!("0:{round}")))
            .unwrap();
        group
            .enqueue(ReplicationEvent::new(PartitionKey(1), format!("1:{round}")))
            .unwrap();
        dispatched.notified().await;
    }

    let positions: std::collections::HashMap<Vec<u8>, usize> = dispatcher
        .dispatched()
        .await
        .into_iter()
        .enumerate()
        .map(|(position, (_, event))| (event.payload.to_vec(), position))
        .collect();

    let mut partition_zero_first = 0u32;
    let mut partition_one_first = 0u32;
    for round in 0..rounds {
        let zero = positions[format!("0:{round}").as_bytes()];
        let one = positions[format!("1:{round}").as_bytes()];
        if zero < one {
            partition_zero_first += 1;
        } else {
            partition_one_first += 1;
        }
    }

    // Both relative delivery orders must show up: events on different
    // partitions carry no ordering relation to each other.
    assert!(partition_zero_first > 0);
    assert!(partition_one_first > 0);

    group.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn per_partition_order_is_preserved_under_load() {
    init_test_tracing();

    let dispatcher = MemoryDispatcher::new();
    let group = create_group(random(), 3, dispatcher.clone());

    group.start().await.unwrap();

    let partitions = 16u64;
    let events_per_partition = 50u32;
    let total = (partitions as usize) * (events_per_partition as usize);

    let dispatched = dispatcher.wait_for_dispatched_count(total).await;
    for seq in 0..events_per_partition {
        for partition in 0..partitions {
            group
                .enqueue(ReplicationEvent::new(
                    PartitionKey(partition),
                    format!("{partition}:{seq}"),
                ))
                .unwrap();
        }
    }
    dispatched.notified().await;

    let per_partition = dispatcher.payloads_per_partition().await;
    assert_eq!(per_partition.len(), partitions as usize);
    for partition in 0..partitions {
        let expected: Vec<Vec<u8>> = (0..events_per_partition)
            .map(|seq| format!("{partition}:{seq}").into_bytes())
            .collect();
        assert_eq!(per_partition[&partition], expected);
    }

    group.stop().await.unwrap();
}

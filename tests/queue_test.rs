//! Bounded queue: capacity and ordering under each overflow policy, and
//! cross-thread hand-off.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use daq_record_loop::{BoundedRecordQueue, OverflowPolicy};

#[test]
fn test_drop_oldest_keeps_the_newest_capacity_records() {
    for capacity in 1..=8usize {
        for pushed in 0..=3 * capacity as u32 {
            let queue = BoundedRecordQueue::new(capacity, OverflowPolicy::DropOldest);
            for seq in 0..pushed {
                assert!(queue.push(decode(physics(seq))));
                assert!(queue.len() <= capacity);
            }

            let kept = (pushed as usize).min(capacity) as u32;
            let mut popped = Vec::new();
            while let Some(entry) = queue.try_pop() {
                popped.push(entry.record.sequence().unwrap());
            }
            assert_eq!(popped, (pushed - kept..pushed).collect::<Vec<_>>());
            assert_eq!(queue.stats().evicted, u64::from(pushed - kept));
        }
    }
}

#[test]
fn test_drop_newest_keeps_the_first_capacity_records() {
    let queue = BoundedRecordQueue::new(4, OverflowPolicy::DropNewest);
    let accepted: Vec<bool> = (0..6).map(|seq| queue.push(decode(physics(seq)))).collect();
    assert_eq!(accepted, vec![true, true, true, true, false, false]);

    let popped: Vec<_> = std::iter::from_fn(|| queue.try_pop())
        .map(|entry| entry.record.sequence().unwrap())
        .collect();
    assert_eq!(popped, vec![0, 1, 2, 3]);
    assert_eq!(queue.stats().rejected, 2);
    assert_eq!(queue.stats().lost(), 2);
}

#[test]
fn test_popped_record_is_unmodified() {
    let queue = BoundedRecordQueue::new(2, OverflowPolicy::DropOldest);
    let record = decode(prestart(42));
    assert!(queue.push(record.clone()));
    let popped = queue.pop(Duration::from_millis(10)).unwrap().record;
    assert_eq!(popped, record);
    assert_eq!(popped.payload(), record.payload());
}

#[test]
fn test_producer_and_consumer_threads_preserve_order() {
    let queue = Arc::new(
        BoundedRecordQueue::new(4, OverflowPolicy::Block).with_block_timeout(Duration::from_secs(5)),
    );
    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for seq in 0..200 {
                assert!(queue.push(decode(physics(seq))));
            }
            queue.close();
        })
    };

    let mut received = Vec::new();
    while let Some(entry) = queue.pop(Duration::from_secs(5)) {
        received.push(entry.record.sequence().unwrap());
    }
    producer.join().unwrap();

    assert_eq!(received, (0..200).collect::<Vec<_>>());
    assert_eq!(queue.stats().lost(), 0);
}

#[test]
fn test_close_wakes_a_waiting_consumer() {
    let queue = Arc::new(BoundedRecordQueue::new(4, OverflowPolicy::DropOldest));
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || queue.pop(Duration::from_secs(10)))
    };
    thread::sleep(Duration::from_millis(50));
    queue.close();
    assert!(consumer.join().unwrap().is_none());
    assert!(!queue.push(decode(physics(1))));
}

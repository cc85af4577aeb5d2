// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::{sync::oneshot, time::Instant};

use super::{QueuedRequest, RequestQueue};
use crate::{
    request::DistRequest,
    test_utils::{TestPeer, TestRequest},
};

fn queued(
    sequence: u64,
) -> (
    Arc<DistRequest<TestPeer>>,
    QueuedRequest<TestPeer>,
    oneshot::Receiver<TestPeer>,
) {
    let request = TestRequest::any_peer().request;
    request.set_sequence(sequence);
    let (sender, receiver) = oneshot::channel();
    let entry = QueuedRequest::new(request.clone(), sender, Instant::now());
    (request, entry, receiver)
}

fn sequences(queue: &RequestQueue<TestPeer>) -> Vec<u64> {
    let mut result = Vec::new();
    let mut cursor = queue.head();
    while let Some(key) = cursor {
        result.push(key.sequence);
        cursor = queue.next(key);
    }
    result
}

/// Tests that entries are traversed in sequence order whatever the insertion order.
#[test]
fn test_insertion_keeps_sequence_order() {
    let mut queue = RequestQueue::default();
    for sequence in [5, 2, 9, 1, 7] {
        let (_, entry, _) = queued(sequence);
        queue.insert(entry);
    }

    assert_eq!(queue.len(), 5);
    assert_eq!(queue.head().map(|key| key.sequence), Some(1));
    assert_eq!(sequences(&queue), vec![1, 2, 5, 7, 9]);
}

/// Tests that a re-inserted request lands between earlier and later ones, not at the tail.
#[test]
fn test_reinsertion_goes_back_to_its_position() {
    let mut queue = RequestQueue::default();
    let mut requests = Vec::new();
    for sequence in 1..=4 {
        let (request, entry, _) = queued(sequence);
        queue.insert(entry);
        requests.push(request);
    }

    let entry = queue.remove_request(&requests[1]).unwrap();
    assert_eq!(sequences(&queue), vec![1, 3, 4]);
    queue.insert(entry);
    assert_eq!(sequences(&queue), vec![1, 2, 3, 4]);
}

/// Tests that requests sharing a sequence are all kept, in insertion order, between the
/// requests before and after them.
#[test]
fn test_equal_sequences_keep_insertion_order() {
    let mut queue = RequestQueue::default();
    let (_, entry, _) = queued(1);
    queue.insert(entry);
    let (original, entry, _) = queued(2);
    let original_key = queue.insert(entry);
    let (_, entry, _) = queued(3);
    queue.insert(entry);
    let (replacement, entry, _) = queued(2);
    let replacement_key = queue.insert(entry);

    assert!(original_key < replacement_key);
    assert_eq!(sequences(&queue), vec![1, 2, 2, 3]);
    assert_eq!(queue.find(&original), Some(original_key));
    assert_eq!(queue.find(&replacement), Some(replacement_key));
    assert_eq!(queue.next(original_key), Some(replacement_key));

    assert!(queue.remove_request(&original).is_some());
    assert_eq!(sequences(&queue), vec![1, 2, 3]);
    assert!(queue.contains_request(&replacement));
}

/// Tests traversal from a position that has just been removed.
#[test]
fn test_next_after_removed_entry() {
    let mut queue = RequestQueue::default();
    let keys = [1, 2, 3]
        .into_iter()
        .map(|sequence| queue.insert(queued(sequence).1))
        .collect::<Vec<_>>();

    assert!(queue.remove(keys[1]).is_some());
    assert!(queue.remove(keys[1]).is_none());
    assert_eq!(queue.next(keys[0]), Some(keys[2]));
    assert_eq!(queue.next(keys[1]), Some(keys[2]));
    assert_eq!(queue.next(keys[2]), None);
}

/// Tests that only the very same request is removed, not another one with its sequence.
#[test]
fn test_remove_request_checks_identity() {
    let mut queue = RequestQueue::default();
    let (request, entry, _) = queued(3);
    queue.insert(entry);

    let impostor = TestRequest::any_peer().request;
    impostor.set_sequence(3);
    assert!(!queue.contains_request(&impostor));
    assert!(queue.remove_request(&impostor).is_none());
    assert_eq!(queue.len(), 1);

    assert!(queue.contains_request(&request));
    assert!(queue.remove_request(&request).is_some());
    assert!(queue.remove_request(&request).is_none());
    assert_eq!(queue.head(), None);
}

/// Tests that draining yields every entry in order and that closed entries resolve empty.
#[tokio::test]
async fn test_drain_closes_every_entry() {
    let mut queue = RequestQueue::default();
    let mut receivers = Vec::new();
    for sequence in [3, 1, 2] {
        let (_, entry, receiver) = queued(sequence);
        queue.insert(entry);
        receivers.push(receiver);
    }

    let drained = queue.drain().collect::<Vec<_>>();
    assert_eq!(
        drained.iter().map(QueuedRequest::sequence).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(queue.len(), 0);

    for entry in drained {
        entry.close();
    }
    for receiver in receivers {
        assert!(receiver.await.is_err());
    }
}

/// Tests that a fulfilled entry delivers its peer exactly once.
#[tokio::test]
async fn test_fulfill_delivers_peer() {
    let (_, entry, receiver) = queued(1);
    assert!(entry.fulfill(TestPeer::new(4)));
    assert_eq!(receiver.await.unwrap().id(), 4);

    let (_, entry, receiver) = queued(2);
    drop(receiver);
    assert!(!entry.fulfill(TestPeer::new(4)));
}

#[test]
#[should_panic(expected = "must have a sequence number")]
fn test_unsequenced_insertion_panics() {
    let mut queue = RequestQueue::default();
    let (_, entry, _) = queued(0);
    queue.insert(entry);
}

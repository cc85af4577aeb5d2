// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The queue of requests waiting for a peer, ordered by sequence number.

#[cfg(test)]
#[path = "unit_tests/queue_tests.rs"]
mod unit_tests;

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
};

use tokio::{sync::oneshot, time::Instant};

use crate::request::DistRequest;

/// A request while it sits in the queue, together with its scheduling state.
pub(crate) struct QueuedRequest<P> {
    pub(crate) request: Arc<DistRequest<P>>,
    /// Delivers the chosen peer. Dropping it resolves the caller's handle to `None`.
    sender: oneshot::Sender<P>,
    /// When a pass first found no eligible peer for this request.
    pub(crate) no_peers_since: Option<Instant>,
    pub(crate) queued_at: Instant,
}

impl<P> QueuedRequest<P> {
    pub(crate) fn new(
        request: Arc<DistRequest<P>>,
        sender: oneshot::Sender<P>,
        queued_at: Instant,
    ) -> Self {
        Self {
            request,
            sender,
            no_peers_since: None,
            queued_at,
        }
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.request.sequence()
    }

    /// Hands `peer` to the caller. Returns `false` if the caller dropped its handle.
    pub(crate) fn fulfill(self, peer: P) -> bool {
        self.sender.send(peer).is_ok()
    }

    /// Resolves the caller's handle without a peer.
    pub(crate) fn close(self) {
        drop(self.sender);
    }
}

/// The position of a queued request: its sequence, then the order of insertion among
/// requests sharing that sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QueueKey {
    pub(crate) sequence: u64,
    id: u64,
}

impl QueueKey {
    fn first(sequence: u64) -> Self {
        Self { sequence, id: 0 }
    }

    fn last(sequence: u64) -> Self {
        Self {
            sequence,
            id: u64::MAX,
        }
    }
}

/// Requests ordered by ascending sequence number.
///
/// A re-submitted request keeps its sequence, so insertion happens at an arbitrary position
/// rather than at the tail. Several requests may share a sequence, for instance a
/// replacement queued while the request it replaces is still waiting; they are ordered by
/// insertion.
pub(crate) struct RequestQueue<P> {
    entries: BTreeMap<QueueKey, QueuedRequest<P>>,
    next_id: u64,
}

impl<P> Default for RequestQueue<P> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<P> RequestQueue<P> {
    /// Inserts an entry at the position given by its sequence and returns that position.
    ///
    /// # Panics
    ///
    /// If the sequence was not assigned.
    pub(crate) fn insert(&mut self, entry: QueuedRequest<P>) -> QueueKey {
        let sequence = entry.sequence();
        assert_ne!(sequence, 0, "queued requests must have a sequence number");
        let key = QueueKey {
            sequence,
            id: self.next_id,
        };
        self.next_id += 1;
        self.entries.insert(key, entry);
        key
    }

    pub(crate) fn remove(&mut self, key: QueueKey) -> Option<QueuedRequest<P>> {
        self.entries.remove(&key)
    }

    /// Removes `request` if it is queued.
    pub(crate) fn remove_request(
        &mut self,
        request: &Arc<DistRequest<P>>,
    ) -> Option<QueuedRequest<P>> {
        let key = self.find(request)?;
        self.entries.remove(&key)
    }

    /// Returns `true` if this very request (not just its sequence) is queued.
    pub(crate) fn contains_request(&self, request: &Arc<DistRequest<P>>) -> bool {
        self.find(request).is_some()
    }

    /// Returns the position of this very request.
    pub(crate) fn find(&self, request: &Arc<DistRequest<P>>) -> Option<QueueKey> {
        let sequence = request.sequence();
        self.entries
            .range(QueueKey::first(sequence)..=QueueKey::last(sequence))
            .find(|(_, entry)| Arc::ptr_eq(&entry.request, request))
            .map(|(key, _)| *key)
    }

    /// Returns the position of the first request in the queue.
    pub(crate) fn head(&self) -> Option<QueueKey> {
        self.entries.keys().next().copied()
    }

    /// Returns the position following `key`, which need not be queued itself.
    pub(crate) fn next(&self, key: QueueKey) -> Option<QueueKey> {
        self.entries
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(key, _)| *key)
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: QueueKey) -> Option<&QueuedRequest<P>> {
        self.entries.get(&key)
    }

    pub(crate) fn get_mut(&mut self, key: QueueKey) -> Option<&mut QueuedRequest<P>> {
        self.entries.get_mut(&key)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Removes every entry, in queue order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = QueuedRequest<P>> {
        std::mem::take(&mut self.entries).into_values()
    }
}

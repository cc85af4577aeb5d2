// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The capability a connected peer exposes to the request distributor, and the live set of
//! such peers.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use tokio::sync::Notify;
use tracing::trace;

use crate::distributor::Distributor;

#[cfg(test)]
#[path = "unit_tests/peer_tests.rs"]
mod unit_tests;

/// A unit of work handed to a peer once it has been chosen for a request, typically the
/// closure that writes the request on the wire.
pub type DispatchTask = Box<dyn FnOnce() + Send + 'static>;

/// A connected peer that requests can be distributed to.
///
/// Implementations are cheap handles (usually an `Arc` around the connection) since the
/// distributor clones them into every scheduling pass and hands one to the caller whose
/// request was assigned to the peer.
pub trait DistPeer: Clone + Send + Sync + 'static {
    /// The identity of the peer.
    type Key: Ord + Clone + fmt::Debug + Send + Sync + 'static;

    /// Returns the identity of the peer.
    fn key(&self) -> Self::Key;

    /// Returns `true` if the peer is still connected and accepts ordered sends.
    fn can_dispatch(&self) -> bool;

    /// Estimates when a request of the given `cost` could be sent to this peer.
    ///
    /// A non-zero duration means the peer is not ready yet and should be asked again after
    /// that delay. A zero duration means the peer is ready now, in which case the returned
    /// fraction (`>= 0`) is its relative spare capacity, used as a selection weight.
    fn wait_before(&self, cost: u64) -> (Duration, f64);

    /// Queues `task` for execution, after every task previously dispatched to this peer.
    ///
    /// Returns `false` if the peer refused the task.
    fn dispatch(&self, task: DispatchTask) -> bool;
}

/// Provides the set of currently connected peers at the start of each scheduling pass.
pub trait PeerSource<P>: Send + Sync + 'static {
    /// Returns a snapshot of the live peers.
    fn peers(&self) -> Vec<P>;
}

impl<P, F> PeerSource<P> for F
where
    F: Fn() -> Vec<P> + Send + Sync + 'static,
{
    fn peers(&self) -> Vec<P> {
        self()
    }
}

/// A thread-safe registry of connected peers, keyed by [`DistPeer::key`].
///
/// Once [attached](Self::attach) to a [`Distributor`], every membership change wakes the
/// scheduling task so that waiting requests are reconsidered.
pub struct PeerSet<P: DistPeer> {
    inner: Arc<Mutex<PeerSetInner<P>>>,
}

struct PeerSetInner<P: DistPeer> {
    peers: BTreeMap<P::Key, P>,
    /// Scheduling tasks of attached distributors; the ones that ended are pruned on use.
    wakers: Vec<Weak<Notify>>,
}

impl<P: DistPeer> Clone for PeerSet<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: DistPeer> Default for PeerSet<P> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PeerSetInner {
                peers: BTreeMap::new(),
                wakers: Vec::new(),
            })),
        }
    }
}

impl<P: DistPeer> PeerSet<P> {
    /// Creates an empty peer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer. Returns `false` if a peer with the same key was already registered, in
    /// which case it is replaced.
    pub fn register(&self, peer: P) -> bool {
        let key = peer.key();
        let mut inner = self.inner.lock().unwrap();
        let is_new = inner.peers.insert(key.clone(), peer).is_none();
        trace!(peer = ?key, is_new, "registered peer");
        inner.wake_all();
        is_new
    }

    /// Removes the peer with the given key, returning it if it was registered.
    pub fn unregister(&self, key: &P::Key) -> Option<P> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.peers.remove(key);
        if removed.is_some() {
            trace!(peer = ?key, "unregistered peer");
            inner.wake_all();
        }
        removed
    }

    /// Returns the peer registered under `key`, if any.
    pub fn get(&self, key: &P::Key) -> Option<P> {
        self.inner.lock().unwrap().peers.get(key).cloned()
    }

    /// Returns the number of registered peers.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().peers.len()
    }

    /// Returns `true` if no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes every later membership change wake the scheduling task of `distributor`,
    /// for as long as that task runs.
    pub fn attach(&self, distributor: &Distributor<P>) {
        let mut inner = self.inner.lock().unwrap();
        inner.wakers.retain(|waker| waker.strong_count() > 0);
        inner.wakers.push(Arc::downgrade(&distributor.waker()));
    }

    #[cfg(test)]
    pub(crate) fn attached(&self) -> usize {
        self.inner.lock().unwrap().wakers.len()
    }
}

impl<P: DistPeer> PeerSetInner<P> {
    fn wake_all(&mut self) {
        self.wakers.retain(|waker| match waker.upgrade() {
            Some(waker) => {
                waker.notify_one();
                true
            }
            None => false,
        });
    }
}

impl<P: DistPeer> PeerSource<P> for PeerSet<P> {
    fn peers(&self) -> Vec<P> {
        self.inner.lock().unwrap().peers.values().cloned().collect()
    }
}

// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Peers and requests with scripted behavior, for testing the distributor.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::{
    peer::{DispatchTask, DistPeer},
    request::DistRequest,
};

/// A peer whose readiness is set by the test.
///
/// Dispatched tasks run immediately, in the order they are dispatched.
#[derive(Clone)]
pub struct TestPeer {
    id: u64,
    state: Arc<Mutex<TestPeerState>>,
}

struct TestPeerState {
    wait: Duration,
    spare: f64,
    connected: bool,
    refuses_dispatch: bool,
    dispatched: usize,
    readiness_checks: usize,
}

impl TestPeer {
    /// Creates a connected peer that is ready with full spare capacity.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(TestPeerState {
                wait: Duration::ZERO,
                spare: 1.0,
                connected: true,
                refuses_dispatch: false,
                dispatched: 0,
                readiness_checks: 0,
            })),
        }
    }

    /// Creates a peer that will only be ready after `wait`.
    pub fn busy(id: u64, wait: Duration) -> Self {
        let peer = Self::new(id);
        peer.set_busy(wait);
        peer
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Makes the peer ready with the given spare capacity.
    pub fn set_ready(&self, spare: f64) {
        let mut state = self.state.lock().unwrap();
        state.wait = Duration::ZERO;
        state.spare = spare;
    }

    /// Makes the peer report that it needs `wait` before it can send.
    pub fn set_busy(&self, wait: Duration) {
        self.state.lock().unwrap().wait = wait;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    pub fn set_refuses_dispatch(&self, refuses_dispatch: bool) {
        self.state.lock().unwrap().refuses_dispatch = refuses_dispatch;
    }

    /// Returns the number of tasks this peer has run.
    pub fn dispatched(&self) -> usize {
        self.state.lock().unwrap().dispatched
    }

    /// Returns how many times the distributor asked this peer for its readiness.
    pub fn readiness_checks(&self) -> usize {
        self.state.lock().unwrap().readiness_checks
    }
}

impl fmt::Debug for TestPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TestPeer").field(&self.id).finish()
    }
}

impl PartialEq for TestPeer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TestPeer {}

impl DistPeer for TestPeer {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }

    fn can_dispatch(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn wait_before(&self, _cost: u64) -> (Duration, f64) {
        let mut state = self.state.lock().unwrap();
        state.readiness_checks += 1;
        (state.wait, state.spare)
    }

    fn dispatch(&self, task: DispatchTask) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if state.refuses_dispatch {
                return false;
            }
            state.dispatched += 1;
        }
        task();
        true
    }
}

/// A request together with counters recording what the distributor did with it.
pub struct TestRequest {
    pub request: Arc<DistRequest<TestPeer>>,
    builds: Arc<AtomicUsize>,
    sent_to: Arc<Mutex<Vec<u64>>>,
}

impl TestRequest {
    /// A request every peer is eligible for.
    pub fn any_peer() -> Self {
        Self::with_eligibility(|_| true)
    }

    /// A request only the peers with the given IDs are eligible for.
    pub fn for_peers(ids: impl IntoIterator<Item = u64>) -> Self {
        let ids = ids.into_iter().collect::<BTreeSet<_>>();
        Self::with_eligibility(move |peer| ids.contains(&peer.id()))
    }

    /// A request no peer is eligible for.
    pub fn no_peer() -> Self {
        Self::with_eligibility(|_| false)
    }

    pub fn with_eligibility(
        eligible: impl Fn(&TestPeer) -> bool + Send + Sync + 'static,
    ) -> Self {
        let builds = Arc::new(AtomicUsize::new(0));
        let sent_to = Arc::new(Mutex::new(Vec::new()));
        let request = {
            let builds = builds.clone();
            let sent_to = sent_to.clone();
            DistRequest::new(
                |_peer: &TestPeer| 1,
                eligible,
                move |peer: &TestPeer| -> Option<DispatchTask> {
                    builds.fetch_add(1, Ordering::SeqCst);
                    let sent_to = sent_to.clone();
                    let id = peer.id();
                    Some(Box::new(move || sent_to.lock().unwrap().push(id)))
                },
            )
        };
        Self {
            request: Arc::new(request),
            builds,
            sent_to,
        }
    }

    /// Returns how many times the dispatch task was built.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Returns the IDs of the peers that ran this request's task, in order.
    pub fn sent_to(&self) -> Vec<u64> {
        self.sent_to.lock().unwrap().clone()
    }

    pub fn sequence(&self) -> u64 {
        self.request.sequence()
    }
}

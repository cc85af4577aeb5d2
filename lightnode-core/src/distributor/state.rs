// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The queue of pending requests and the algorithm matching them with peers.

use std::{sync::Arc, time::Duration};

use rand::{rngs::StdRng, SeedableRng as _};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, instrument, trace, warn};

#[cfg(with_metrics)]
use super::metrics;
use super::DistributorConfig;
use crate::{
    peer::DistPeer,
    queue::{QueueKey, QueuedRequest, RequestQueue},
    request::{DistRequest, RequestHandle},
    selector::WeightedSelector,
};

/// The selection weight given to ready peers reporting no spare capacity.
pub(crate) const MIN_SELECTION_WEIGHT: f64 = 1e-6;

/// The outcome of one scheduling pass.
#[derive(Debug)]
pub(crate) enum Selection<P> {
    /// The request at `key` can be sent to `peer` right away.
    Ready { peer: P, key: QueueKey },
    /// Nothing can be sent now; the queue should be scanned again after one of these
    /// delays, whichever is shorter. At least one of them is set.
    Wait {
        /// The shortest estimate given by a busy eligible peer.
        peer_wait: Option<Duration>,
        /// The time left before the head of the queue times out for lack of peers.
        head_timeout: Option<Duration>,
    },
    /// Nothing can be sent and nothing is expected to change until the next submission.
    Idle,
}

/// Returned by [`DistributorState::submit`] when the very same request is already queued.
#[derive(Debug)]
pub(crate) struct AlreadyQueued(pub(crate) u64);

/// Everything the scheduling task mutates, guarded by the distributor's lock.
pub(crate) struct DistributorState<P> {
    queue: RequestQueue<P>,
    last_sequence: u64,
    rng: StdRng,
    no_peers_timeout: Duration,
    is_shut_down: bool,
}

impl<P: DistPeer> DistributorState<P> {
    pub(crate) fn new(config: &DistributorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            queue: RequestQueue::default(),
            last_sequence: 0,
            rng,
            no_peers_timeout: config.no_peers_timeout(),
            is_shut_down: false,
        }
    }

    /// Queues `request`, assigning it the next sequence number if it never had one.
    ///
    /// Nothing is modified if `request` is already queued.
    pub(crate) fn submit(
        &mut self,
        request: &Arc<DistRequest<P>>,
        now: Instant,
    ) -> Result<RequestHandle<P>, AlreadyQueued> {
        let (sender, receiver) = oneshot::channel();
        if self.is_shut_down {
            debug!("distributor is shut down, dropping submitted request");
            return Ok(RequestHandle::new(receiver));
        }
        if self.queue.contains_request(request) {
            return Err(AlreadyQueued(request.sequence()));
        }
        if request.sequence() == 0 {
            self.last_sequence += 1;
            request.set_sequence(self.last_sequence);
        } else {
            // Never hand out a preset sequence to a later request.
            self.last_sequence = self.last_sequence.max(request.sequence());
        }
        trace!(sequence = request.sequence(), "request queued");
        self.queue.insert(QueuedRequest::new(request.clone(), sender, now));
        Ok(RequestHandle::new(receiver))
    }

    /// Removes `request` from the queue and resolves its handle to `None`. Returns `false`
    /// if the request was not queued.
    pub(crate) fn cancel(&mut self, request: &Arc<DistRequest<P>>) -> bool {
        let Some(entry) = self.queue.remove_request(request) else {
            return false;
        };
        trace!(sequence = entry.sequence(), "request cancelled");
        #[cfg(with_metrics)]
        metrics::CANCELLED_REQUESTS.inc();
        entry.close();
        true
    }

    /// Runs one scheduling pass over the queue against the given peers.
    ///
    /// Requests are visited in sequence order. Each one claims every eligible peer still in
    /// the pool, whether or not that peer is ready, so a later request never gets a peer an
    /// earlier one has examined. Ready peers from all requests are then drawn at random,
    /// weighted by their spare capacity. The head of the queue is dropped once it has had no
    /// eligible peer for the no-peers timeout; the time it has left is reported apart from
    /// peer estimates.
    #[instrument(level = "trace", skip_all, fields(peers = pool.len(), queued = self.queue.len()))]
    pub(crate) fn next_selection(&mut self, mut pool: Vec<P>, now: Instant) -> Selection<P> {
        let mut selector = WeightedSelector::new();
        let mut peer_wait: Option<Duration> = None;
        let mut head_timeout: Option<Duration> = None;
        let mut cursor = self.queue.head();

        while let Some(key) = cursor {
            let is_head = self.queue.head() == Some(key);
            if pool.is_empty() && !is_head {
                break;
            }
            cursor = self.queue.next(key);
            let Some(entry) = self.queue.get_mut(key) else {
                break;
            };
            let sequence = key.sequence;

            let mut has_eligible_peer = false;
            let mut index = 0;
            while index < pool.len() {
                let candidate = &pool[index];
                if !candidate.can_dispatch() || !entry.request.is_eligible(candidate) {
                    index += 1;
                    continue;
                }
                let peer = pool.remove(index);
                has_eligible_peer = true;
                let cost = entry.request.cost(&peer);
                let (wait, spare) = peer.wait_before(cost);
                if wait.is_zero() {
                    assert!(
                        spare >= 0.0,
                        "peer {:?} reported invalid spare capacity {spare}",
                        peer.key()
                    );
                    trace!(peer = ?peer.key(), sequence, cost, spare, "peer ready");
                    selector.offer((peer, key), spare.max(MIN_SELECTION_WEIGHT));
                } else {
                    trace!(peer = ?peer.key(), sequence, cost, ?wait, "peer busy");
                    peer_wait = Some(peer_wait.map_or(wait, |best| best.min(wait)));
                }
            }

            if has_eligible_peer {
                entry.no_peers_since = None;
                continue;
            }
            let since = *entry.no_peers_since.get_or_insert(now);
            if !is_head {
                continue;
            }
            let waited = now.saturating_duration_since(since);
            if waited >= self.no_peers_timeout {
                if let Some(entry) = self.queue.remove(key) {
                    debug!(sequence, ?waited, "no eligible peer, dropping request");
                    #[cfg(with_metrics)]
                    metrics::TIMED_OUT_REQUESTS.inc();
                    entry.close();
                }
            } else {
                head_timeout = Some(self.no_peers_timeout - waited);
            }
        }

        match selector.choose(&mut self.rng) {
            Some((peer, key)) => Selection::Ready { peer, key },
            None if peer_wait.is_none() && head_timeout.is_none() => Selection::Idle,
            None => Selection::Wait {
                peer_wait,
                head_timeout,
            },
        }
    }

    /// Sends the request at `key` to `peer` and hands the peer to the caller.
    pub(crate) fn dispatch(&mut self, peer: P, key: QueueKey, now: Instant) {
        let sequence = key.sequence;
        let Some(entry) = self.queue.remove(key) else {
            warn!(sequence, "selected request is no longer queued");
            return;
        };
        if let Some(task) = entry.request.build_dispatch(&peer) {
            if !peer.dispatch(task) {
                warn!(peer = ?peer.key(), sequence, "peer refused the dispatched request");
            }
        }
        let delay = now.saturating_duration_since(entry.queued_at);
        debug!(peer = ?peer.key(), sequence, ?delay, "request dispatched");
        #[cfg(with_metrics)]
        {
            metrics::DISPATCHED_REQUESTS.inc();
            metrics::REQUEST_SEND_DELAY.observe(delay.as_secs_f64() * 1000.0);
        }
        if !entry.fulfill(peer) {
            trace!(sequence, "caller dropped its handle before the request was dispatched");
        }
    }

    #[cfg(test)]
    pub(crate) fn key_of(&self, request: &Arc<DistRequest<P>>) -> Option<QueueKey> {
        self.queue.find(request)
    }

    #[cfg(test)]
    pub(crate) fn no_peers_since(&self, request: &Arc<DistRequest<P>>) -> Option<Instant> {
        self.queue.get(self.key_of(request)?)?.no_peers_since
    }
}

impl<P> DistributorState<P> {
    /// Stops accepting requests and resolves every queued handle to `None`. Returns the
    /// number of dropped requests.
    pub(crate) fn shut_down(&mut self) -> usize {
        self.is_shut_down = true;
        let mut count = 0;
        for entry in self.queue.drain() {
            entry.close();
            count += 1;
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }
}

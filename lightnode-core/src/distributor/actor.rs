// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The task that makes every dispatch decision.

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::{state::Selection, DistributorCore};
use crate::peer::DistPeer;

/// The scheduling task of a [`Distributor`](super::Distributor).
pub(super) struct DistributorActor<P> {
    core: Arc<DistributorCore<P>>,
    cancellation: CancellationToken,
}

impl<P: DistPeer> DistributorActor<P> {
    pub(super) fn new(core: Arc<DistributorCore<P>>, cancellation: CancellationToken) -> Self {
        Self { core, cancellation }
    }

    /// Runs scheduling passes whenever the queue or the peer set changes, or when a peer
    /// that was busy may have become ready, until cancelled.
    #[instrument(level = "trace", skip_all)]
    pub(super) async fn run(self) {
        trace!("Starting `DistributorActor`");
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                () = self.cancellation.cancelled() => break,
                () = self.core.wake.notified() => {}
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }
            deadline = self.process_queue().map(|wait| Instant::now() + wait);
        }

        trace!("`DistributorActor` stopped");
    }

    /// Dispatches every request that can be sent right away. Returns how long to wait
    /// before scanning the queue again, or `None` if there is nothing to wait for.
    fn process_queue(&self) -> Option<Duration> {
        let mut state = self.core.state();
        loop {
            let now = Instant::now();
            match state.next_selection(self.core.peers.peers(), now) {
                Selection::Ready { peer, key } => state.dispatch(peer, key, now),
                Selection::Wait {
                    peer_wait,
                    head_timeout,
                } => {
                    // Peer estimates go stale, the head's timeout does not.
                    let peer_wait = peer_wait.map(|wait| wait.min(self.core.max_wait));
                    let wait = peer_wait.into_iter().chain(head_timeout).min();
                    trace!(?wait, pending = state.len(), "waiting for peers");
                    return wait;
                }
                Selection::Idle => {
                    trace!(pending = state.len(), "going idle");
                    return None;
                }
            }
        }
    }
}

/// Resolves every queued request when the task ends, including when it unwinds from a
/// panic in a caller-supplied closure.
impl<P> Drop for DistributorActor<P> {
    fn drop(&mut self) {
        let dropped = self.core.state().shut_down();
        debug!(dropped, "`DistributorActor` finished");
    }
}

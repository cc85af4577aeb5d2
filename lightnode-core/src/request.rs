// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Request descriptors and the handles callers await them with.

use std::{
    future::Future,
    pin::Pin,
    sync::atomic::{AtomicU64, Ordering},
    task::{Context, Poll},
};

use custom_debug_derive::Debug;
use tokio::sync::oneshot;

use crate::peer::DispatchTask;

/// A request waiting to be assigned to a peer.
///
/// The descriptor bundles the three caller-supplied decisions the distributor needs: how
/// much serving the request through a peer costs, whether a peer can serve it at all, and
/// how to build the work handed to the chosen peer. It is shared as an
/// `Arc<DistRequest<P>>` so that the same descriptor can be cancelled and re-submitted
/// while keeping its position in the queue.
#[derive(Debug)]
pub struct DistRequest<P> {
    #[debug(skip)]
    cost: Box<dyn Fn(&P) -> u64 + Send + Sync>,
    #[debug(skip)]
    eligible: Box<dyn Fn(&P) -> bool + Send + Sync>,
    #[debug(skip)]
    build_dispatch: Box<dyn Fn(&P) -> Option<DispatchTask> + Send + Sync>,
    /// The order key; zero until the request is queued for the first time.
    sequence: AtomicU64,
}

impl<P> DistRequest<P> {
    /// Creates a new request that has never been queued.
    pub fn new(
        cost: impl Fn(&P) -> u64 + Send + Sync + 'static,
        eligible: impl Fn(&P) -> bool + Send + Sync + 'static,
        build_dispatch: impl Fn(&P) -> Option<DispatchTask> + Send + Sync + 'static,
    ) -> Self {
        Self {
            cost: Box::new(cost),
            eligible: Box::new(eligible),
            build_dispatch: Box::new(build_dispatch),
            sequence: AtomicU64::new(0),
        }
    }

    /// Gives the request a previously assigned sequence number, so that it is queued with
    /// the priority of the request it replaces.
    pub fn with_sequence(self, sequence: u64) -> Self {
        self.sequence.store(sequence, Ordering::Relaxed);
        self
    }

    /// Returns the sequence number, or zero if the request was never queued.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Only the distributor assigns sequences, while holding its lock.
    pub(crate) fn set_sequence(&self, sequence: u64) {
        self.sequence.store(sequence, Ordering::Relaxed);
    }

    pub(crate) fn cost(&self, peer: &P) -> u64 {
        (self.cost)(peer)
    }

    pub(crate) fn is_eligible(&self, peer: &P) -> bool {
        (self.eligible)(peer)
    }

    pub(crate) fn build_dispatch(&self, peer: &P) -> Option<DispatchTask> {
        (self.build_dispatch)(peer)
    }
}

/// The non-blocking view of a [`RequestHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome<P> {
    /// The request is still queued.
    Pending,
    /// The request was dispatched to this peer.
    Dispatched(P),
    /// The request was cancelled, timed out waiting for peers, or the distributor shut
    /// down. Also returned once the outcome has already been taken.
    Dropped,
}

/// Resolves to the peer a submitted request was dispatched to, or to `None` if the request
/// was cancelled, timed out waiting for an eligible peer, or the distributor shut down.
#[derive(Debug)]
#[must_use = "dropping the handle does not cancel the request"]
pub struct RequestHandle<P> {
    receiver: oneshot::Receiver<P>,
}

impl<P> RequestHandle<P> {
    pub(crate) fn new(receiver: oneshot::Receiver<P>) -> Self {
        Self { receiver }
    }

    /// Checks the outcome without waiting.
    pub fn try_result(&mut self) -> RequestOutcome<P> {
        match self.receiver.try_recv() {
            Ok(peer) => RequestOutcome::Dispatched(peer),
            Err(oneshot::error::TryRecvError::Empty) => RequestOutcome::Pending,
            Err(oneshot::error::TryRecvError::Closed) => RequestOutcome::Dropped,
        }
    }
}

impl<P> Future for RequestHandle<P> {
    type Output = Option<P>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(Result::ok)
    }
}

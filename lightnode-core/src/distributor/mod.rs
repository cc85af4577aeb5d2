// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Distributes outbound requests among connected peers.
//!
//! Callers [`submit`](Distributor::submit) request descriptors and await the returned
//! [`RequestHandle`]. A single scheduling task owns every matching decision: it walks the
//! queue in sequence order against the live peer set, respects each peer's flow-control
//! estimate, and hands the chosen peer back through the handle.

mod actor;
mod config;
mod state;

#[cfg(test)]
#[path = "../unit_tests/distributor_tests.rs"]
mod unit_tests;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use self::{
    actor::DistributorActor,
    state::{AlreadyQueued, DistributorState},
};
pub use self::config::{DistributorConfig, DEFAULT_MAX_WAIT_MS, DEFAULT_NO_PEERS_TIMEOUT_MS};
use crate::{
    peer::{DistPeer, PeerSource},
    request::{DistRequest, RequestHandle},
};

#[cfg(with_metrics)]
mod metrics {
    use std::sync::LazyLock;

    use prometheus::{Histogram, IntCounter};

    use crate::prometheus_util::{
        exponential_bucket_latencies, register_histogram_with_namespace,
        register_int_counter_with_namespace,
    };

    /// Time between a request entering the queue and being dispatched, in milliseconds.
    pub(super) static REQUEST_SEND_DELAY: LazyLock<Histogram> = LazyLock::new(|| {
        register_histogram_with_namespace(
            "distributor_request_send_delay_ms",
            "Time requests spend queued before being dispatched to a peer, in milliseconds",
            exponential_bucket_latencies(10_000.0),
        )
    });

    pub(super) static DISPATCHED_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_namespace(
            "distributor_dispatched_requests_total",
            "Number of requests dispatched to a peer",
        )
    });

    pub(super) static CANCELLED_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_namespace(
            "distributor_cancelled_requests_total",
            "Number of queued requests cancelled by their caller",
        )
    });

    pub(super) static TIMED_OUT_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
        register_int_counter_with_namespace(
            "distributor_timed_out_requests_total",
            "Number of requests dropped because no eligible peer appeared in time",
        )
    });
}

/// Errors of the [`Distributor`] itself. Requests that cannot be served are not errors:
/// their handles resolve to `None`.
#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("Invalid distributor configuration: {0}")]
    InvalidConfig(String),

    #[error("The scheduling task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

/// The state shared between the handles and the scheduling task.
struct DistributorCore<P> {
    state: Mutex<DistributorState<P>>,
    peers: Box<dyn PeerSource<P>>,
    wake: Arc<Notify>,
    max_wait: Duration,
}

impl<P> DistributorCore<P> {
    /// Locks the state, even if a caller-supplied closure panicked while it was held. The
    /// queue is consistent between any two of its operations, so the guard stays usable
    /// and queued requests can still be resolved.
    fn state(&self) -> MutexGuard<'_, DistributorState<P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct DistributorHandle<P> {
    core: Arc<DistributorCore<P>>,
    cancellation: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P> Drop for DistributorHandle<P> {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

/// A handle to a running request distributor.
///
/// Cloning is cheap and every clone refers to the same scheduling task. The task stops
/// when [`shutdown`](Self::shutdown) is called or the last handle is dropped; in both
/// cases every request still queued resolves to `None`.
pub struct Distributor<P> {
    inner: Arc<DistributorHandle<P>>,
}

impl<P> Clone for Distributor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: DistPeer> Distributor<P> {
    /// Spawns the scheduling task on the current Tokio runtime.
    pub fn spawn(
        config: DistributorConfig,
        peers: impl PeerSource<P>,
    ) -> Result<Self, DistributorError> {
        config.validate()?;
        let core = Arc::new(DistributorCore {
            state: Mutex::new(DistributorState::new(&config)),
            peers: Box::new(peers),
            wake: Arc::new(Notify::new()),
            max_wait: config.max_wait(),
        });
        let cancellation = CancellationToken::new();
        let actor = DistributorActor::new(core.clone(), cancellation.clone());
        let task = tokio::spawn(actor.run());
        debug!(?config, "request distributor started");
        Ok(Self {
            inner: Arc::new(DistributorHandle {
                core,
                cancellation,
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Queues `request` and returns the handle resolving to the peer it is sent to.
    ///
    /// A request that was queued before keeps its sequence number and therefore its
    /// priority over requests submitted after it. Distinct requests may share a sequence;
    /// they are served in submission order.
    ///
    /// # Panics
    ///
    /// If `request` is already queued. The distributor is left untouched.
    pub fn submit(&self, request: &Arc<DistRequest<P>>) -> RequestHandle<P> {
        let core = &self.inner.core;
        let result = core.state().submit(request, Instant::now());
        match result {
            Ok(handle) => {
                core.wake.notify_one();
                handle
            }
            Err(AlreadyQueued(sequence)) => panic!("request {sequence} is already queued"),
        }
    }

    /// Withdraws `request` if it has not been dispatched yet, resolving its handle to
    /// `None`.
    ///
    /// Returns `false` if the request is not queued, for instance because it was already
    /// dispatched or cancelled. Once this returns `true`, the request's dispatch builder is
    /// guaranteed not to be called.
    pub fn cancel(&self, request: &Arc<DistRequest<P>>) -> bool {
        self.inner.core.state().cancel(request)
    }

    /// Makes the scheduling task scan the queue again, for instance after the peer set
    /// changed.
    pub fn wake(&self) {
        self.inner.core.wake.notify_one();
    }

    /// Returns the number of queued requests.
    pub fn pending(&self) -> usize {
        self.inner.core.state().len()
    }

    /// Stops the scheduling task, resolving every queued request to `None`, and waits for
    /// it to finish. Calling it again, from any clone, returns immediately.
    pub async fn shutdown(&self) -> Result<(), DistributorError> {
        self.inner.cancellation.cancel();
        let task = self.inner.task.lock().unwrap().take();
        if let Some(task) = task {
            task.await?;
        }
        Ok(())
    }

    pub(crate) fn waker(&self) -> Arc<Notify> {
        self.inner.core.wake.clone()
    }
}

// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration parameters for the request distributor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::DistributorError;

/// How long, in milliseconds, the request at the head of the queue may go without any
/// eligible peer before it is dropped.
pub const DEFAULT_NO_PEERS_TIMEOUT_MS: u64 = 5_000;

/// The longest, in milliseconds, a peer's "not ready yet" estimate is trusted before the
/// queue is scanned again.
pub const DEFAULT_MAX_WAIT_MS: u64 = 10;

/// Configuration parameters for the [`Distributor`][`super::Distributor`].
#[derive(Debug, Clone, PartialEq, Eq, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    /// How long the request at the head of the queue may have no eligible peer before it
    /// is dropped, in milliseconds.
    #[arg(
        long = "distributor-no-peers-timeout-ms",
        default_value_t = DEFAULT_NO_PEERS_TIMEOUT_MS,
        env = "LIGHTNODE_DISTRIBUTOR_NO_PEERS_TIMEOUT_MS"
    )]
    pub no_peers_timeout_ms: u64,

    /// The longest the distributor sleeps on a peer's "not ready yet" estimate, in
    /// milliseconds. Capacity estimates go stale as other traffic flows.
    #[arg(
        long = "distributor-max-wait-ms",
        default_value_t = DEFAULT_MAX_WAIT_MS,
        env = "LIGHTNODE_DISTRIBUTOR_MAX_WAIT_MS"
    )]
    pub max_wait_ms: u64,

    /// Seed for the random choice among ready peers. Uses OS entropy if not set.
    #[arg(long = "distributor-seed")]
    pub seed: Option<u64>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            no_peers_timeout_ms: DEFAULT_NO_PEERS_TIMEOUT_MS,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            seed: None,
        }
    }
}

impl DistributorConfig {
    pub fn no_peers_timeout(&self) -> Duration {
        Duration::from_millis(self.no_peers_timeout_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// Checks that the durations are non-zero.
    pub fn validate(&self) -> Result<(), DistributorError> {
        if self.no_peers_timeout_ms == 0 {
            return Err(DistributorError::InvalidConfig(
                "the no-peers timeout must be positive".to_string(),
            ));
        }
        if self.max_wait_ms == 0 {
            return Err(DistributorError::InvalidConfig(
                "the maximum wait must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

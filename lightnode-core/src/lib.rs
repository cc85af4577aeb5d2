// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! This module defines the request distribution core of a light-client node: deciding, for
//! every outstanding outbound request, which connected peer serves it and when.

pub mod distributor;
pub mod peer;
pub mod request;
pub mod selector;
#[cfg(with_testing)]
#[path = "unit_tests/test_utils.rs"]
pub mod test_utils;

#[cfg(with_metrics)]
pub(crate) mod prometheus_util;
pub(crate) mod queue;

pub use crate::{
    distributor::{Distributor, DistributorConfig, DistributorError},
    peer::{DispatchTask, DistPeer, PeerSet, PeerSource},
    request::{DistRequest, RequestHandle, RequestOutcome},
};

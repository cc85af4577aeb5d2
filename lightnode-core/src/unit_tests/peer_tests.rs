// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{DistPeer as _, PeerSet, PeerSource as _};
use crate::{distributor::Distributor, test_utils::TestPeer, DistributorConfig};

#[test]
fn test_register_replaces_peer_with_same_key() {
    let peers = PeerSet::new();
    assert!(peers.is_empty());
    assert!(peers.register(TestPeer::new(1)));
    assert!(peers.register(TestPeer::new(2)));

    let replacement = TestPeer::new(1);
    replacement.set_connected(false);
    assert!(!peers.register(replacement));
    assert_eq!(peers.len(), 2);
    assert!(peers.get(&1).is_some_and(|peer| !peer.can_dispatch()));

    assert_eq!(peers.unregister(&1).map(|peer| peer.id()), Some(1));
    assert!(peers.unregister(&1).is_none());
    assert_eq!(
        peers.peers().iter().map(TestPeer::id).collect::<Vec<_>>(),
        vec![2]
    );
}

/// Tests that attaching does not keep finished distributors alive.
#[test_log::test(tokio::test)]
async fn test_finished_distributors_are_detached() {
    let peers = PeerSet::<TestPeer>::new();
    let running = Distributor::spawn(DistributorConfig::default(), peers.clone()).unwrap();
    let finished = Distributor::spawn(DistributorConfig::default(), peers.clone()).unwrap();
    peers.attach(&running);
    peers.attach(&finished);
    assert_eq!(peers.attached(), 2);

    finished.shutdown().await.unwrap();
    drop(finished);
    peers.register(TestPeer::new(1));
    assert_eq!(peers.attached(), 1);

    peers.attach(&running);
    assert_eq!(peers.attached(), 2);
    running.shutdown().await.unwrap();
}

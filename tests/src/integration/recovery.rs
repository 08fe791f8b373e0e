//! # Recovery Flows
//!
//! Chain-derived state must be a pure function of the active chain:
//! nodes that followed a reorg, replayed from genesis, or restarted from
//! a snapshot all end up with the same digest.

#[cfg(test)]
mod tests {
    use crate::harness::{announce_request, TestNetwork};
    use qc_08_dpos::domain::InstantStatus;
    use qc_08_dpos::ports::SnapshotStore;
    use qc_08_dpos::{DposConfig, DposEvent, MasternodeApi};
    use shared_types::COIN;

    fn network_config() -> DposConfig {
        let mut config = DposConfig::regtest();
        config.activation_delay = 2;
        config
    }

    fn all_equal(digests: &[[u8; 32]]) -> bool {
        digests.windows(2).all(|w| w[0] == w[1])
    }

    #[tokio::test]
    async fn test_reorg_reverts_announce_on_every_node() {
        let network = TestNetwork::new(4, network_config());
        network.bring_up().await;
        let before = network.ledger.height();

        network.node(0).announce(announce_request(4)).await.unwrap();
        network.mine().await;
        for node in &network.nodes {
            assert_eq!(node.service.list_masternodes(None, false).await.unwrap().len(), 5);
        }

        // A longer branch without the announce.
        network.ledger.rewind(before, false);
        network.clock.advance(1);
        network.ledger.mine_block(network.clock.now());
        network.ledger.mine_block(network.clock.now() + 1);

        for node in &network.nodes {
            let report = node.service.sync().await.unwrap();
            assert_eq!(report.disconnected, 1);
            assert_eq!(report.applied, 2);
            assert_eq!(node.service.list_masternodes(None, false).await.unwrap().len(), 4);
            assert!(node
                .events()
                .iter()
                .any(|e| matches!(e, DposEvent::ChainReplayed { from_height, .. } if *from_height == before + 1)));
        }

        let digests = network.digests().await;
        assert!(all_equal(&digests));
        assert_eq!(network.node(2).verify_replay().await.unwrap(), digests[0]);
    }

    #[tokio::test]
    async fn test_reindex_matches_live_nodes() {
        let network = TestNetwork::new(4, network_config());
        network.bring_up().await;

        let tx = network.wallet_transfer(COIN, 1).await;
        let hash = network.node(0).submit_transaction(tx, true).await.unwrap();
        network.deliver_gossip().await;
        network.tick().await;
        network.sync_all().await;
        let live = network.digests().await;
        assert!(all_equal(&live));

        let follower = network.follower();
        let report = follower.service.reindex().await.unwrap();
        assert_eq!(report.tip.map(|t| t.height), Some(network.ledger.height()));
        assert_eq!(follower.service.state_digest().await.unwrap(), live[0]);

        // Reindexing an operator keeps what it learned from gossip.
        network.node(1).reindex().await.unwrap();
        assert_eq!(network.node(1).state_digest().await.unwrap(), live[0]);
        let instant = network.node(1).list_instant_transactions().await;
        assert_eq!(instant.len(), 1);
        assert_eq!(instant[0].hash, hash);
        assert_eq!(instant[0].status, InstantStatus::Finalized);
        assert_eq!(instant[0].mined_at, Some(network.ledger.height()));
    }

    #[tokio::test]
    async fn test_restart_resumes_from_snapshot() {
        let mut network = TestNetwork::new(4, network_config());
        network.bring_up().await;
        let snapshot_height = network.ledger.height();
        assert_eq!(
            network.nodes[2].snapshots.load().unwrap().and_then(|s| s.tip()).map(|t| t.height),
            Some(snapshot_height)
        );

        // One block the node never saw before going down.
        network.node(0).announce(announce_request(4)).await.unwrap();
        network.ledger.mine_block(network.clock.now());

        let restarted = network.restart(2);
        let report = restarted.start().await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(restarted.list_masternodes(None, false).await.unwrap().len(), 5);

        for i in [0, 1, 3] {
            network.node(i).sync().await.unwrap();
        }
        assert!(all_equal(&network.digests().await));
    }

    #[tokio::test]
    async fn test_restart_keeps_gossip_listings() {
        let mut network = TestNetwork::new(4, network_config());
        network.bring_up().await;

        let tx = network.wallet_transfer(COIN, 1).await;
        let hash = network.node(0).submit_transaction(tx, true).await.unwrap();
        network.deliver_gossip().await;
        network.tick().await;

        let node = network.node(2);
        let vice_blocks = node.list_vice_blocks().await;
        let round_votes = node.list_round_votes().await;
        let tx_votes = node.list_tx_votes().await;
        assert!(!vice_blocks.is_empty());
        assert!(!round_votes.is_empty());
        assert_eq!(tx_votes.len(), 4);

        let restarted = network.restart(2);
        restarted.start().await.unwrap();

        assert_eq!(restarted.list_vice_blocks().await, vice_blocks);
        assert_eq!(restarted.list_round_votes().await, round_votes);
        assert_eq!(restarted.list_tx_votes().await, tx_votes);
        let instant = restarted.list_instant_transactions().await;
        assert_eq!(instant.len(), 1);
        assert_eq!(instant[0].hash, hash);
        assert_eq!(instant[0].status, InstantStatus::Finalized);
        // The vice-block approved while the node was down is picked up on start.
        assert_eq!(instant[0].mined_at, Some(network.ledger.height()));
    }
}

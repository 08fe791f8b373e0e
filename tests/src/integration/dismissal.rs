//! # Dismissal Flows
//!
//! Four operators on one ledger:
//!
//! 1. Three of them vote a fourth out; the quorum finalizes on its own.
//! 2. A silent operator is detected as outdated from missing heartbeats
//!    and the others vote it out without being asked.

#[cfg(test)]
mod tests {
    use crate::harness::TestNetwork;
    use qc_08_dpos::domain::{Liveness, MasternodeStatus};
    use qc_08_dpos::{DposConfig, DposEvent, MasternodeApi};

    fn network_config() -> DposConfig {
        let mut config = DposConfig::regtest();
        config.activation_delay = 2;
        config
    }

    fn dismissed_automatically(events: &[DposEvent], target: &[u8; 32]) -> bool {
        events.iter().any(|e| {
            matches!(e, DposEvent::MasternodeDismissed { id, automatic: true, .. } if id == target)
        })
    }

    #[tokio::test]
    async fn test_three_votes_dismiss_fourth_node() {
        let network = TestNetwork::new(4, network_config());
        let ids = network.bring_up().await;
        assert_eq!(network.node(0).list_active_masternodes().await.len(), 4);

        for i in 0..3 {
            network
                .node(i)
                .dismiss_vote(ids[3], 7, "misbehaving".into())
                .await
                .unwrap();
        }
        network.mine().await;

        for node in &network.nodes {
            let entries = node.service.list_masternodes(Some(vec![ids[3]]), false).await.unwrap();
            assert_eq!(entries[0].status, MasternodeStatus::ActivatedDismissed);
            assert_eq!(node.service.list_active_masternodes().await.len(), 3);
            assert!(dismissed_automatically(&node.events(), &ids[3]));
        }

        let digests = network.digests().await;
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_recalled_vote_does_not_count() {
        let network = TestNetwork::new(4, network_config());
        let ids = network.bring_up().await;

        for i in 0..2 {
            network.node(i).dismiss_vote(ids[3], 7, String::new()).await.unwrap();
        }
        network.mine().await;
        network.node(1).dismiss_vote_recall(ids[3]).await.unwrap();
        network.node(2).dismiss_vote(ids[3], 7, String::new()).await.unwrap();
        network.mine().await;

        // Two standing votes are below the 3-of-4 quorum.
        let view = network
            .node(3)
            .list_active_masternodes()
            .await
            .into_iter()
            .find(|v| v.id == ids[3])
            .unwrap();
        assert_eq!(view.counter_votes_against, 2);
        assert!(network
            .node(3)
            .finalize_dismiss_voting(ids[3])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_silent_operator_is_dismissed() {
        let network = TestNetwork::new(4, network_config());
        let ids = network.bring_up().await;

        // Past the outdated threshold for a small network (30s x 20).
        network.clock.advance(700_000);
        for node in &network.nodes[..3] {
            node.service.send_heartbeat(node.operator, None).await.unwrap();
        }
        network.deliver_gossip().await;

        let outdated = network.node(0).filter_masternodes_by_liveness(Liveness::Outdated).await;
        assert_eq!(outdated, vec![ids[3]]);
        assert_eq!(network.node(3).list_heartbeats().await.len(), 3);

        network.tick().await;
        network.mine().await;

        for node in &network.nodes {
            assert!(dismissed_automatically(&node.events(), &ids[3]));
        }
        assert_eq!(network.node(0).list_active_masternodes().await.len(), 3);
    }
}

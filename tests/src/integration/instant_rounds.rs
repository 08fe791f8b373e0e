//! # Instant Transactions and Rounds
//!
//! A full team votes instant transactions to finality, the round leader
//! wraps them into a vice-block, the team approves it and the ledger
//! mines it with the dPoS seal. The vice-block reward is then split
//! between the proposer and the rest of the team.

#[cfg(test)]
mod tests {
    use crate::harness::TestNetwork;
    use qc_08_dpos::domain::{InstantStatus, RewardRole, VoteDecision};
    use qc_08_dpos::ports::LedgerAdapter;
    use qc_08_dpos::{DposConfig, DposEvent, GossipMessage, MasternodeApi};
    use shared_types::COIN;

    fn config(team_size: usize) -> DposConfig {
        let mut config = DposConfig::regtest();
        config.activation_delay = 2;
        config.rounds.team_size = team_size;
        config
    }

    // =========================================================================
    // FINALITY AND VICE-BLOCKS
    // =========================================================================

    #[tokio::test]
    async fn test_ten_node_team_finalizes_and_mines_instant_tx() {
        let network = TestNetwork::new(10, config(10));
        network.bring_up().await;
        let team = network.node(0).get_team(None).await.unwrap();
        assert_eq!(team.len(), 10);
        let height = network.ledger.height();

        let tx = network.wallet_transfer(COIN, 1).await;
        let hash = network.node(0).submit_transaction(tx, true).await.unwrap();
        assert_eq!(network.deliver_gossip().await, 0);

        for node in &network.nodes {
            let instant = node.service.list_instant_transactions().await;
            assert_eq!(instant.len(), 1);
            assert_eq!(instant[0].status, InstantStatus::Finalized);
            // 6 of 10 is enough; later votes still arrive.
            assert!(instant[0].approved_by.len() >= 6);
        }

        network.tick().await;
        assert_eq!(network.ledger.height(), height + 1);
        let block = network.ledger.block(height + 1).await.unwrap();
        assert!(block.is_vice_block());
        assert!(block.contains(&hash));

        network.sync_all().await;
        for node in &network.nodes {
            let instant = node.service.list_instant_transactions().await;
            assert_eq!(instant[0].mined_at, Some(height + 1));
            assert!(node
                .events()
                .iter()
                .any(|e| matches!(e, DposEvent::ViceBlockApproved { height: h, .. } if *h == height + 1)));
        }

        let digests = network.digests().await;
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_vice_block_reward_split() {
        let network = TestNetwork::new(10, config(10));
        network.bring_up().await;
        let height = network.ledger.height();

        let tx = network.wallet_transfer(COIN, 1).await;
        network.node(3).submit_transaction(tx, true).await.unwrap();
        network.deliver_gossip().await;
        network.tick().await;
        network.sync_all().await;

        let split = network
            .node(0)
            .reward_split(height + 1)
            .await
            .unwrap()
            .expect("vice-block has a split");
        let total = 625 * COIN / 100;
        assert_eq!(split.total, total);
        assert_eq!(split.shares.iter().map(|s| s.amount).sum::<u64>(), total);

        let each = (total - total / 2) / 9;
        assert_eq!(split.amount_for(&split.proposer), total - each * 9);
        assert_eq!(
            split.shares.iter().filter(|s| s.role == RewardRole::Member).count(),
            9
        );

        // Every node derives the same split; plain blocks have none.
        for node in &network.nodes {
            assert_eq!(node.service.reward_split(height + 1).await.unwrap(), Some(split.clone()));
            assert_eq!(node.service.reward_split(height).await.unwrap(), None);
        }
    }

    // =========================================================================
    // CONFLICTS
    // =========================================================================

    #[tokio::test]
    async fn test_conflicting_instant_tx_rejected() {
        let network = TestNetwork::new(4, config(4));
        network.bring_up().await;

        let first = network.wallet_transfer(COIN, 1).await;
        let first_hash = network.node(0).submit_transaction(first.clone(), true).await.unwrap();
        network.deliver_gossip().await;

        // Same inputs, different payee amount.
        let mut second = first.clone();
        second.outputs[0].value = 2 * COIN;
        second.instantly = true;
        second.nonce = 2;
        let second_hash = second.hash();
        for node in &network.nodes {
            node.service
                .handle_gossip(GossipMessage::Transaction(second.clone()))
                .await
                .unwrap();
        }
        network.deliver_gossip().await;

        for node in &network.nodes {
            assert!(node
                .events()
                .iter()
                .any(|e| matches!(e, DposEvent::InstantTxRejected { tx } if *tx == second_hash)));
            let votes = node.service.list_tx_votes().await;
            assert!(votes
                .iter()
                .filter(|v| v.choice.subject == second_hash)
                .all(|v| v.choice.decision == VoteDecision::No));
        }

        // Only the first transaction is proposed.
        let height = network.ledger.height();
        network.tick().await;
        let block = network.ledger.block(height + 1).await.unwrap();
        assert!(block.contains(&first_hash));
        assert!(!block.contains(&second_hash));
    }

    // =========================================================================
    // ROUND TIMEOUT
    // =========================================================================

    #[tokio::test]
    async fn test_passed_round_hands_proposal_to_next_leader() {
        let network = TestNetwork::new(4, config(4));
        network.bring_up().await;
        let timeout = network.config.rounds.round_timeout_ms;

        network.tick().await;
        network.clock.advance(timeout);
        network.tick().await;

        let passes = network
            .node(0)
            .list_round_votes()
            .await
            .into_iter()
            .filter(|v| v.round == 1 && v.choice.decision == VoteDecision::Pass)
            .count();
        assert_eq!(passes, 4);

        let tx = network.wallet_transfer(COIN, 1).await;
        network.node(1).submit_transaction(tx, true).await.unwrap();
        network.deliver_gossip().await;
        network.tick().await;

        assert!(network.nodes[0]
            .events()
            .iter()
            .any(|e| matches!(e, DposEvent::ViceBlockApproved { round: 2, .. })));
    }
}

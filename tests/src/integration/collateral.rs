//! # Collateral Accounting
//!
//! The ledger locks exactly the collateral of live masternodes. Dismissal
//! hands it back to the owner, and an announce the registry skipped never
//! locks anything.

#[cfg(test)]
mod tests {
    use crate::harness::{announce_request, operator_key, owner_address, TestNetwork};
    use qc_08_dpos::domain::AnnounceRequest;
    use qc_08_dpos::ports::LedgerAdapter;
    use qc_08_dpos::{Balances, DposConfig, MasternodeApi, MasternodeSigner};
    use shared_types::{Transaction, TxOut};

    fn network_config() -> DposConfig {
        let mut config = DposConfig::regtest();
        config.activation_delay = 2;
        config
    }

    #[tokio::test]
    async fn test_dismissal_releases_collateral() {
        let network = TestNetwork::new(4, network_config());
        let ids = network.bring_up().await;
        let owner = owner_address(3);
        let collateral = network.config.collateral_amount;
        assert_eq!(
            network.node(0).balances(owner).await.unwrap(),
            Balances {
                spendable: 2 * collateral,
                locked: collateral,
                collateral,
            }
        );

        for i in 0..3 {
            network
                .node(i)
                .dismiss_vote(ids[3], 7, "misbehaving".into())
                .await
                .unwrap();
        }
        network.mine().await;

        for node in &network.nodes {
            assert_eq!(
                node.service.balances(owner).await.unwrap(),
                Balances {
                    spendable: 3 * collateral,
                    locked: 0,
                    collateral: 0,
                }
            );
        }

        // The released output can be spent like any other.
        let spend = Transaction {
            inputs: vec![],
            outputs: vec![TxOut {
                value: 3 * collateral,
                address: [0x55; 20],
            }],
            signer: owner,
            metadata: vec![],
            instantly: false,
            nonce: 1,
        };
        let funded = network.ledger.fund_transaction(spend, &owner).await.unwrap();
        assert_eq!(funded.inputs.len(), 2);
    }

    #[tokio::test]
    async fn test_skipped_announce_locks_nothing() {
        let network = TestNetwork::new(4, network_config());
        let collateral = network.config.collateral_amount;

        network.node(0).announce(announce_request(0)).await.unwrap();
        // Same operator as the first announce; the registry skips it.
        let clash = AnnounceRequest {
            name: "masternode-clash".into(),
            operator_auth_address: operator_key(0).operator_address(),
            ..announce_request(1)
        };
        network.node(0).announce(clash).await.unwrap();
        network.mine().await;

        for node in &network.nodes {
            assert_eq!(node.service.list_masternodes(None, false).await.unwrap().len(), 1);
            assert_eq!(
                node.service.balances(owner_address(1)).await.unwrap(),
                Balances {
                    spendable: 3 * collateral,
                    locked: 0,
                    collateral: 0,
                }
            );
            assert_eq!(
                node.service.balances(owner_address(0)).await.unwrap(),
                Balances {
                    spendable: 2 * collateral,
                    locked: collateral,
                    collateral,
                }
            );
        }
    }
}

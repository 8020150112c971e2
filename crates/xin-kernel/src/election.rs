use std::sync::Arc;

use tracing::{info, warn};
use xin_core::{
    Error, NodeState, Script, Snapshot, Transaction, VersionedTransaction,
    OUTPUT_TYPE_NODE_ACCEPT, OUTPUT_TYPE_NODE_PLEDGE, OUTPUT_TYPE_NODE_REMOVE, XIN_ASSET_ID,
};
use xin_crypto::{view_ghost_output_key, Hash};

use crate::clock;
use crate::config::{
    DAY_NS, HOUR_NS, KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM, KERNEL_NODE_ACCEPT_PERIOD_MINIMUM,
    KERNEL_NODE_REMOVE_HOUR_UTC, KERNEL_NODE_REMOVE_TERM_DAYS,
};
use crate::mint::pledge_amount;
use crate::node::{CNode, Node};

fn doubled_seed(material: String) -> [u8; 64] {
    let digest = xin_crypto::new_hash(material.as_bytes());
    let mut seed = [0u8; 64];
    seed[..32].copy_from_slice(&digest.0);
    seed[32..].copy_from_slice(&digest.0);
    seed
}

impl Node {
    /// The node due for removal at `timestamp`: the oldest accepted
    /// non-genesis node whose term has lapsed, and only at the removal
    /// wall-clock hour.
    pub fn check_remove_possibility(
        &self,
        _peer_id: &Hash,
        timestamp: u64,
    ) -> Result<CNode, Error> {
        let candidate = self
            .all_nodes_sorted()
            .into_iter()
            .find(|cn| {
                cn.state == NodeState::Accepted && !self.is_genesis_node(&cn.id_for_network)
            })
            .ok_or_else(|| Error::Consensus("all old nodes removed".into()))?;

        let day = |ts: u64| ts / DAY_NS;
        if day(timestamp) < day(candidate.timestamp) + KERNEL_NODE_REMOVE_TERM_DAYS {
            return Err(Error::Consensus(format!(
                "all old nodes removed before {}",
                candidate.id_for_network
            )));
        }
        let hour = (timestamp / HOUR_NS % 24) as u32;
        if hour != KERNEL_NODE_REMOVE_HOUR_UTC {
            return Err(Error::Consensus(format!("invalid node remove hour {}", hour)));
        }
        Ok(candidate)
    }

    /// Spend the candidate's accept output into a NodeRemove output whose
    /// one-time key any verifier can reconstruct from the payee's derived
    /// view key.
    pub fn build_remove_transaction(
        &self,
        candidate: &CNode,
    ) -> Result<VersionedTransaction, Error> {
        let (accept, _) = self
            .store
            .read_transaction(&candidate.transaction)?
            .ok_or_else(|| Error::NodeLifecycle("accept transaction not found".into()))?;
        if accept.payload_hash() != candidate.transaction {
            return Err(Error::NodeLifecycle(format!(
                "accept transaction malformed {} {}",
                candidate.transaction,
                accept.payload_hash()
            )));
        }
        if accept.outputs.len() != 1 || accept.outputs[0].output_type != OUTPUT_TYPE_NODE_ACCEPT {
            return Err(Error::NodeLifecycle("invalid accept utxo".into()));
        }

        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(candidate.transaction, 0);
        let seed = doubled_seed(format!("{}NODEREMOVE", candidate.payee));
        tx.add_output_with_type(
            OUTPUT_TYPE_NODE_REMOVE,
            std::slice::from_ref(&candidate.payee),
            Script::new_threshold(1),
            pledge_amount(0),
            &seed,
        )?;
        tx.extra = accept.extra.clone();
        Ok(tx.as_versioned())
    }

    /// Kernel-level remove validation: the spent output must belong to the
    /// current removal candidate, and the payout must reconstruct for its
    /// payee.
    pub fn validate_node_remove_snapshot(
        &self,
        snap: &Snapshot,
        tx: &VersionedTransaction,
    ) -> Result<(), Error> {
        let mut timestamp = snap.timestamp;
        if timestamp == 0 && snap.node_id == self.id_for_network {
            timestamp = clock::now_ns();
        }
        let candidate = self.check_remove_possibility(&snap.node_id, timestamp)?;
        if candidate.transaction != tx.inputs[0].hash {
            return Err(Error::NodeLifecycle(format!(
                "invalid remove utxo source {} {}",
                candidate.transaction, tx.inputs[0].hash
            )));
        }

        let out = &tx.outputs[0];
        if out.output_type != OUTPUT_TYPE_NODE_REMOVE {
            return Err(Error::NodeLifecycle(format!(
                "invalid remove output type {}",
                out.output_type
            )));
        }
        if out.amount != pledge_amount(0) {
            return Err(Error::NodeLifecycle(format!(
                "invalid remove output amount {}",
                out.amount
            )));
        }
        if out.script != Script::new_threshold(1) {
            return Err(Error::NodeLifecycle(format!(
                "invalid remove output script {}",
                out.script
            )));
        }
        if out.keys.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid remove output keys {}",
                out.keys.len()
            )));
        }
        let view = candidate.payee.public_spend.deterministic_hash_derive();
        let ghost = view_ghost_output_key(
            &out.mask.as_public()?,
            &out.keys[0].as_public()?,
            &view,
            0,
        );
        if ghost.key() != candidate.payee.public_spend.key() {
            return Err(Error::NodeLifecycle(format!(
                "invalid remove output target {} {}",
                candidate.payee.public_spend.key(),
                ghost.key()
            )));
        }
        Ok(())
    }

    /// Accept transaction for a matured pledge: the pledge output becomes a
    /// NodeAccept output carrying the same extra.
    pub fn build_accept_transaction(
        &self,
        pledging: &CNode,
    ) -> Result<VersionedTransaction, Error> {
        let (pledge, _) = self
            .store
            .read_transaction(&pledging.transaction)?
            .ok_or_else(|| Error::NodeLifecycle("pledge transaction not found".into()))?;
        if pledge.outputs.len() != 1 || pledge.outputs[0].output_type != OUTPUT_TYPE_NODE_PLEDGE {
            return Err(Error::NodeLifecycle("invalid pledge utxo".into()));
        }

        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(pledging.transaction, 0);
        let seed = doubled_seed(format!("{}NODEACCEPT", pledging.signer));
        tx.add_output_with_type(
            OUTPUT_TYPE_NODE_ACCEPT,
            std::slice::from_ref(&pledging.signer),
            Script::new_threshold(1),
            pledge.outputs[0].amount.clone(),
            &seed,
        )?;
        tx.extra = pledge.extra.clone();
        Ok(tx.as_versioned())
    }
}

/// Long-running election driver: accepts our own matured pledge, and
/// proposes the scheduled removal when one is due.
pub async fn election_loop(node: Arc<Node>) {
    let mut shutdown = node.shutdown_signal();
    let period =
        std::time::Duration::from_secs(node.custom.node.kernel_operation_period.max(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = election_tick(&node) {
                    warn!(node = %node.id_for_network, %err, "election tick");
                }
            }
        }
    }
    info!("election loop stopped");
}

fn election_tick(node: &Arc<Node>) -> Result<(), Error> {
    if let Some(pledging) = node.consensus_pledging() {
        if pledging.id_for_network != node.id_for_network {
            return Ok(());
        }
        let now = clock::now_ns();
        if pledging.timestamp + KERNEL_NODE_ACCEPT_PERIOD_MINIMUM >= now
            || now >= pledging.timestamp + KERNEL_NODE_ACCEPT_PERIOD_MAXIMUM
        {
            return Ok(());
        }
        let accept = node.build_accept_transaction(&pledging)?;
        accept.validate(node.store.as_ref())?;
        node.store.cache_put_transaction(&accept)?;
        return node.append_self_empty(accept.payload_hash());
    }

    match node.check_remove_possibility(&node.id_for_network, node.graph_timestamp()) {
        Ok(candidate) => {
            let remove = node.build_remove_transaction(&candidate)?;
            remove.validate(node.store.as_ref())?;
            node.store.cache_put_transaction(&remove)?;
            node.append_self_empty(remove.payload_hash())
        }
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xin_core::Address;

    use crate::node::tests::{test_address, test_node_with_registry};

    // 2019-02-28T17:00:00Z
    const EPOCH: u64 = 1_551_373_200_000_000_000;

    fn ns(rfc3339: &str) -> u64 {
        chrono::DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap() as u64
    }

    fn accept_transaction(signer: &Address, payee: &Address) -> VersionedTransaction {
        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(xin_crypto::new_hash(b"pledge"), 0);
        let seed = doubled_seed(format!("{}GENESISACCEPT", signer));
        tx.add_output_with_type(
            OUTPUT_TYPE_NODE_ACCEPT,
            std::slice::from_ref(signer),
            Script::new_threshold(1),
            pledge_amount(0),
            &seed,
        )
        .unwrap();
        let mut extra = signer.public_spend.key().0.to_vec();
        extra.extend_from_slice(&payee.public_spend.key().0);
        tx.extra = extra;
        tx.as_versioned()
    }

    #[test]
    fn remove_schedule_honors_term_and_hour() {
        let genesis_signer = test_address(1);
        let candidate_signer = test_address(2);
        let candidate_payee = test_address(52);
        // The candidate joined an hour after the genesis epoch, so it sorts
        // after the genesis node.
        let entries = vec![
            (genesis_signer.clone(), test_address(51), NodeState::Accepted, EPOCH),
            (
                candidate_signer.clone(),
                candidate_payee.clone(),
                NodeState::Accepted,
                EPOCH + HOUR_NS,
            ),
        ];
        let (node, dir) = test_node_with_registry("election", EPOCH, entries, 1);

        // Seed the candidate's accept transaction into the store and registry.
        let accept = accept_transaction(&candidate_signer, &candidate_payee);
        node.store.write_transaction(&accept).unwrap();
        let accept_hash = accept.payload_hash();
        {
            let mut registry = node.registry.write();
            for cn in registry.all_sorted.iter_mut() {
                if cn.signer.hash() == candidate_signer.hash() {
                    cn.transaction = accept_hash;
                }
            }
        }

        let err = node
            .check_remove_possibility(&node.id_for_network, ns("2020-02-09T15:35:13Z"))
            .unwrap_err();
        assert!(err.to_string().contains("all old nodes removed"));

        let err = node
            .check_remove_possibility(&node.id_for_network, ns("2020-02-27T17:00:00Z"))
            .unwrap_err();
        assert!(err.to_string().contains("all old nodes removed"));

        let err = node
            .check_remove_possibility(&node.id_for_network, ns("2020-02-28T00:00:00Z"))
            .unwrap_err();
        assert!(err.to_string().contains("invalid node remove hour"));

        let now = ns("2020-02-28T17:00:00Z");
        let candidate = node
            .check_remove_possibility(&node.id_for_network, now)
            .unwrap();
        assert_eq!(candidate.signer.hash(), candidate_signer.hash());
        assert!(node.consensus_removed_recently(now).is_none());

        let tx = node.build_remove_transaction(&candidate).unwrap();
        assert_eq!(tx.asset, *XIN_ASSET_ID);
        assert_eq!(tx.outputs[0].amount, pledge_amount(0));
        assert_eq!(tx.outputs[0].script.to_string(), "fffe01");
        assert_eq!(tx.outputs[0].output_type, OUTPUT_TYPE_NODE_REMOVE);
        assert_eq!(
            tx.transaction_type(),
            xin_core::TransactionKind::NodeRemove
        );
        assert_eq!(tx.outputs[0].keys.len(), 1);
        assert_eq!(tx.extra, accept.extra);

        // The payout reconstructs for the payee under its derived view key.
        let mask = tx.outputs[0].mask.as_public().unwrap();
        let ghost = tx.outputs[0].keys[0].as_public().unwrap();
        let view = candidate_payee.public_spend.deterministic_hash_derive();
        assert_eq!(
            view_ghost_output_key(&mask, &ghost, &view, 0).key(),
            candidate_payee.public_spend.key()
        );

        // The full kernel validation accepts it at the removal instant.
        let mut snap = Snapshot::new(node.id_for_network, tx.payload_hash());
        snap.timestamp = now;
        node.validate_node_remove_snapshot(&snap, &tx).unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn accept_transaction_mirrors_pledge() {
        let signer = test_address(3);
        let payee = test_address(53);
        let pledge_ts = EPOCH + 10 * DAY_NS;
        let entries = vec![
            (test_address(1), test_address(51), NodeState::Accepted, EPOCH),
            (signer.clone(), payee.clone(), NodeState::Pledging, pledge_ts),
        ];
        let (node, dir) = test_node_with_registry("accept_build", EPOCH, entries, 1);

        let mut pledge = Transaction::new(*XIN_ASSET_ID);
        pledge.add_input(xin_crypto::new_hash(b"funding"), 0);
        let seed = doubled_seed("pledge-mask".into());
        pledge
            .add_output_with_type(
                OUTPUT_TYPE_NODE_PLEDGE,
                &[],
                Script::new_threshold(1),
                pledge_amount(0),
                &seed,
            )
            .unwrap();
        let mut extra = signer.public_spend.key().0.to_vec();
        extra.extend_from_slice(&payee.public_spend.key().0);
        pledge.extra = extra;
        let pledge = pledge.as_versioned();
        node.store.write_transaction(&pledge).unwrap();

        let pledging = CNode {
            id_for_network: signer.id_for_network(&node.network_id),
            signer: signer.clone(),
            payee,
            transaction: pledge.payload_hash(),
            timestamp: pledge_ts,
            state: NodeState::Pledging,
        };
        let accept = node.build_accept_transaction(&pledging).unwrap();
        assert_eq!(accept.inputs[0].hash, pledge.payload_hash());
        assert_eq!(accept.outputs.len(), 1);
        assert_eq!(accept.outputs[0].output_type, OUTPUT_TYPE_NODE_ACCEPT);
        assert_eq!(accept.outputs[0].amount, pledge.outputs[0].amount);
        assert_eq!(accept.extra, pledge.extra);

        let _ = std::fs::remove_dir_all(&dir);
    }
}

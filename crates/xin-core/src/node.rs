use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use xin_crypto::{view_ghost_output_key, Hash, Key, KEY_SIZE};

use crate::address::Address;
use crate::asset::XIN_ASSET_ID;
use crate::error::Error;
use crate::script::Script;
use crate::store::DataStore;
use crate::transaction::{
    VersionedTransaction, OUTPUT_TYPE_NODE_ACCEPT, OUTPUT_TYPE_NODE_CANCEL,
    OUTPUT_TYPE_NODE_PLEDGE, OUTPUT_TYPE_SCRIPT,
};

/// Lifecycle state of a kernel node. Rows only ever advance; REMOVED and
/// CANCELLED are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    #[serde(rename = "PLEDGING")]
    Pledging,
    #[serde(rename = "ACCEPTED")]
    Accepted,
    #[serde(rename = "RESIGNING")]
    Resigning,
    #[serde(rename = "REMOVED")]
    Removed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pledging => "PLEDGING",
            NodeState::Accepted => "ACCEPTED",
            NodeState::Resigning => "RESIGNING",
            NodeState::Removed => "REMOVED",
            NodeState::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// One row of the node registry, materialized by the store from confirmed
/// lifecycle transactions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeEntry {
    pub signer: Address,
    pub payee: Address,
    pub state: NodeState,
    pub transaction: Hash,
    pub timestamp: u64,
}

impl NodeEntry {
    pub fn id_for_network(&self, network: &Hash) -> Hash {
        self.signer.hash().for_network(network)
    }
}

fn key_from_extra(extra: &[u8]) -> Result<Key, Error> {
    if extra.len() < KEY_SIZE {
        return Err(Error::NodeLifecycle(format!(
            "invalid extra length {}",
            extra.len()
        )));
    }
    let mut raw = [0u8; KEY_SIZE];
    raw.copy_from_slice(&extra[..KEY_SIZE]);
    Ok(Key(raw))
}

/// Scan the consensus registry for the single node allowed to be pledging.
/// Any resigning node, or a second pledging one, blocks the lifecycle.
fn filter_pledging_node(
    nodes: &[NodeEntry],
) -> Result<(Option<&NodeEntry>, HashMap<String, NodeState>), Error> {
    let mut filter = HashMap::new();
    let mut pledging = None;
    for n in nodes {
        filter.insert(n.signer.to_string(), n.state);
        match n.state {
            NodeState::Resigning => {
                return Err(Error::NodeLifecycle(format!(
                    "invalid node pending state {} {}",
                    n.signer, n.state
                )));
            }
            NodeState::Accepted | NodeState::Cancelled | NodeState::Removed => {}
            NodeState::Pledging => {
                if pledging.is_none() {
                    pledging = Some(n);
                } else {
                    return Err(Error::NodeLifecycle(format!(
                        "invalid pledging nodes {} {}",
                        pledging.map(|p: &NodeEntry| p.signer.to_string()).unwrap_or_default(),
                        n.signer
                    )));
                }
            }
        }
    }
    Ok((pledging, filter))
}

impl VersionedTransaction {
    pub(crate) fn validate_node_pledge(&self, store: &dyn DataStore) -> Result<(), Error> {
        if self.asset != *XIN_ASSET_ID {
            return Err(Error::Asset(format!("invalid node asset {}", self.asset)));
        }
        if self.outputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid outputs count {} for pledge transaction",
                self.outputs.len()
            )));
        }
        if self.extra.len() != 2 * KEY_SIZE {
            return Err(Error::NodeLifecycle(format!(
                "invalid extra length {} for pledge transaction",
                self.extra.len()
            )));
        }

        let signer_spend = key_from_extra(&self.extra)?;
        let payee_spend = key_from_extra(&self.extra[KEY_SIZE..])?;
        for n in store.read_all_nodes()? {
            match n.state {
                NodeState::Accepted | NodeState::Cancelled | NodeState::Removed => {}
                _ => {
                    return Err(Error::NodeLifecycle(format!(
                        "invalid node pending state {} {}",
                        n.signer, n.state
                    )));
                }
            }
            for candidate in [&signer_spend, &payee_spend] {
                if n.signer.public_spend.key() == *candidate
                    || n.payee.public_spend.key() == *candidate
                {
                    return Err(Error::NodeLifecycle(format!(
                        "invalid node signer key {} {}",
                        hex::encode(&self.extra),
                        n.signer
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn validate_node_accept(&self, store: &dyn DataStore) -> Result<(), Error> {
        if self.asset != *XIN_ASSET_ID {
            return Err(Error::Asset(format!("invalid node asset {}", self.asset)));
        }
        if self.outputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid outputs count {} for accept transaction",
                self.outputs.len()
            )));
        }
        if self.inputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid inputs count {} for accept transaction",
                self.inputs.len()
            )));
        }

        let nodes = store.read_consensus_nodes()?;
        let (pledging, filter) = filter_pledging_node(&nodes)?;
        let pledging = pledging
            .ok_or_else(|| Error::NodeLifecycle("no pledging node needs to get accepted".into()))?;
        if pledging.transaction != self.inputs[0].hash {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo source {} {}",
                pledging.transaction, self.inputs[0].hash
            )));
        }

        let (last_pledge, _) = store
            .read_transaction(&self.inputs[0].hash)?
            .ok_or_else(|| Error::NodeLifecycle("pledge transaction not found".into()))?;
        if last_pledge.outputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo count {}",
                last_pledge.outputs.len()
            )));
        }
        if last_pledge.outputs[0].output_type != OUTPUT_TYPE_NODE_PLEDGE {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo type {}",
                last_pledge.outputs[0].output_type
            )));
        }

        let public_spend = key_from_extra(&last_pledge.extra)?.as_public()?;
        let acc = Address::from_public_spend(public_spend);
        if filter.get(&acc.to_string()) != Some(&NodeState::Pledging) {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo source {:?}",
                filter.get(&acc.to_string())
            )));
        }
        if last_pledge.extra != self.extra {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge and accept key {} {}",
                hex::encode(&last_pledge.extra),
                hex::encode(&self.extra)
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_node_cancel(
        &self,
        store: &dyn DataStore,
        msg: &Hash,
    ) -> Result<(), Error> {
        if self.asset != *XIN_ASSET_ID {
            return Err(Error::Asset(format!("invalid node asset {}", self.asset)));
        }
        if self.outputs.len() != 2 {
            return Err(Error::NodeLifecycle(format!(
                "invalid outputs count {} for cancel transaction",
                self.outputs.len()
            )));
        }
        if self.inputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid inputs count {} for cancel transaction",
                self.inputs.len()
            )));
        }
        if self.signatures.len() != 1 || self.signatures[0].len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid signatures count {} for cancel transaction",
                self.signatures.len()
            )));
        }
        if self.extra.len() != 3 * KEY_SIZE {
            return Err(Error::NodeLifecycle(format!(
                "invalid extra {} for cancel transaction",
                hex::encode(&self.extra)
            )));
        }

        let cancel = &self.outputs[0];
        let script_out = &self.outputs[1];
        if cancel.output_type != OUTPUT_TYPE_NODE_CANCEL
            || script_out.output_type != OUTPUT_TYPE_SCRIPT
        {
            return Err(Error::NodeLifecycle(format!(
                "invalid outputs type {} {} for cancel transaction",
                cancel.output_type, script_out.output_type
            )));
        }
        if script_out.keys.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid script output keys {} for cancel transaction",
                script_out.keys.len()
            )));
        }
        if script_out.script != Script::new_threshold(1) {
            return Err(Error::NodeLifecycle(format!(
                "invalid script output script {} for cancel transaction",
                script_out.script
            )));
        }

        let nodes = store.read_consensus_nodes()?;
        let (pledging, filter) = filter_pledging_node(&nodes)?;
        let pledging = pledging
            .ok_or_else(|| Error::NodeLifecycle("no pledging node needs to get cancelled".into()))?;
        if pledging.transaction != self.inputs[0].hash {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo source {} {}",
                pledging.transaction, self.inputs[0].hash
            )));
        }

        let (last_pledge, _) = store
            .read_transaction(&self.inputs[0].hash)?
            .ok_or_else(|| Error::NodeLifecycle("pledge transaction not found".into()))?;
        if last_pledge.outputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo count {}",
                last_pledge.outputs.len()
            )));
        }
        let po = &last_pledge.outputs[0];
        if po.output_type != OUTPUT_TYPE_NODE_PLEDGE {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo type {}",
                po.output_type
            )));
        }
        if cancel.amount != po.amount.div(100) {
            return Err(Error::NodeLifecycle(format!(
                "invalid script output amount {} for cancel transaction",
                cancel.amount
            )));
        }

        let public_spend = key_from_extra(&last_pledge.extra)?.as_public()?;
        let acc = Address::from_public_spend(public_spend);
        if filter.get(&acc.to_string()) != Some(&NodeState::Pledging) {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge utxo source {:?}",
                filter.get(&acc.to_string())
            )));
        }

        let view = key_from_extra(&self.extra[2 * KEY_SIZE..])?.as_private()?;
        let (pit, _) = store
            .read_transaction(&last_pledge.inputs[0].hash)?
            .ok_or_else(|| {
                Error::NodeLifecycle(format!(
                    "invalid pledge input source {}:{}",
                    last_pledge.inputs[0].hash, last_pledge.inputs[0].index
                ))
            })?;
        let pi = &pit.outputs[last_pledge.inputs[0].index as usize];
        if pi.keys.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge input source keys {}",
                pi.keys.len()
            )));
        }

        let pi_mask = pi.mask.as_public()?;
        let pi_key = pi.keys[0].as_public()?;
        let t_mask = script_out.mask.as_public()?;
        let t_key = script_out.keys[0].as_public()?;
        let pledge_spend =
            view_ghost_output_key(&pi_mask, &pi_key, &view, last_pledge.inputs[0].index as u64)
                .key();
        let target_spend = view_ghost_output_key(&t_mask, &t_key, &view, 1).key();
        if last_pledge.extra != self.extra[..2 * KEY_SIZE] {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge and cancel key {} {}",
                hex::encode(&last_pledge.extra),
                hex::encode(&self.extra)
            )));
        }
        if pledge_spend != target_spend {
            return Err(Error::NodeLifecycle(format!(
                "invalid pledge and cancel target {} {}",
                pledge_spend, target_spend
            )));
        }
        if !pi_key.verify(&msg.0, &self.signatures[0][0]) {
            return Err(Error::Signature(format!(
                "invalid cancel signature {}",
                self.signatures[0][0]
            )));
        }
        Ok(())
    }

    pub(crate) fn validate_node_remove(&self, store: &dyn DataStore) -> Result<(), Error> {
        if self.asset != *XIN_ASSET_ID {
            return Err(Error::Asset(format!("invalid node asset {}", self.asset)));
        }
        if self.outputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid outputs count {} for remove transaction",
                self.outputs.len()
            )));
        }
        if self.inputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid inputs count {} for remove transaction",
                self.inputs.len()
            )));
        }

        let (accept, _) = store
            .read_transaction(&self.inputs[0].hash)?
            .ok_or_else(|| Error::NodeLifecycle("accept transaction not found".into()))?;
        if accept.payload_hash() != self.inputs[0].hash {
            return Err(Error::NodeLifecycle(format!(
                "accept transaction malformed {} {}",
                self.inputs[0].hash,
                accept.payload_hash()
            )));
        }
        if accept.outputs.len() != 1 {
            return Err(Error::NodeLifecycle(format!(
                "invalid accept utxo count {}",
                accept.outputs.len()
            )));
        }
        if accept.outputs[0].output_type != OUTPUT_TYPE_NODE_ACCEPT {
            return Err(Error::NodeLifecycle(format!(
                "invalid accept utxo type {}",
                accept.outputs[0].output_type
            )));
        }
        if accept.extra != self.extra {
            return Err(Error::NodeLifecycle(format!(
                "invalid accept and remove key {} {}",
                hex::encode(&accept.extra),
                hex::encode(&self.extra)
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use xin_crypto::{derive_ghost_private_key, derive_ghost_public_key, PrivateKey};

    use crate::integer::Integer;
    use crate::store::{Domain, MintDistribution, UTXOWithLock, UTXO};
    use crate::transaction::{DepositData, Transaction};

    struct MapStore {
        txs: HashMap<Hash, VersionedTransaction>,
        utxos: HashMap<(Hash, u32), UTXOWithLock>,
        consensus: Vec<NodeEntry>,
        all: Vec<NodeEntry>,
    }

    impl DataStore for MapStore {
        fn read_utxo(&self, hash: &Hash, index: u32) -> Result<Option<UTXOWithLock>, Error> {
            Ok(self.utxos.get(&(*hash, index)).cloned())
        }

        fn check_ghost(&self, _key: &Key) -> Result<bool, Error> {
            Ok(false)
        }

        fn read_transaction(
            &self,
            hash: &Hash,
        ) -> Result<Option<(VersionedTransaction, String)>, Error> {
            Ok(self.txs.get(hash).map(|t| (t.clone(), String::new())))
        }

        fn read_all_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
            Ok(self.all.clone())
        }

        fn read_consensus_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
            Ok(self.consensus.clone())
        }

        fn check_deposit_input(&self, _d: &DepositData, _tx: &Hash) -> Result<(), Error> {
            Ok(())
        }

        fn read_last_mint_distribution(
            &self,
            _group: &str,
        ) -> Result<Option<MintDistribution>, Error> {
            Ok(None)
        }

        fn read_domains(&self) -> Result<Vec<Domain>, Error> {
            Ok(Vec::new())
        }
    }

    fn account(tag: u8) -> Address {
        let mut seed = [0u8; 64];
        seed[0] = tag;
        seed[1] = 0xee;
        Address::from_seed(&seed)
    }

    fn entry(signer: &Address, payee: &Address, state: NodeState, tx: Hash) -> NodeEntry {
        NodeEntry {
            signer: signer.clone(),
            payee: payee.clone(),
            state,
            transaction: tx,
            timestamp: 1,
        }
    }

    fn pledge_extra(signer: &Address, payee: &Address) -> Vec<u8> {
        let mut extra = signer.public_spend.key().0.to_vec();
        extra.extend_from_slice(&payee.public_spend.key().0);
        extra
    }

    /// A funding tx holding one script output addressed to `owner`, plus the
    /// pledge that spends it. Returns (pit, pledge).
    fn pledge_pair(owner: &Address, payee: &Address) -> (VersionedTransaction, VersionedTransaction) {
        let mut seed = [0u8; 64];
        seed[7] = 0x70;
        let mut pit = Transaction::new(*XIN_ASSET_ID);
        pit.add_input(Hash::from_data(b"coinbase"), 0);
        pit.add_script_output(
            std::slice::from_ref(owner),
            Script::new_threshold(1),
            Integer::from_value(10000),
            &seed,
        )
        .unwrap();
        let pit = pit.as_versioned();

        let mut pledge = Transaction::new(*XIN_ASSET_ID);
        pledge.add_input(pit.payload_hash(), 0);
        let mut mask_seed = [0u8; 64];
        mask_seed[8] = 0x80;
        pledge
            .add_output_with_type(
                OUTPUT_TYPE_NODE_PLEDGE,
                &[],
                Script::new_threshold(1),
                Integer::from_value(10000),
                &mask_seed,
            )
            .unwrap();
        pledge.extra = pledge_extra(owner, payee);
        (pit, pledge.as_versioned())
    }

    #[test]
    fn pledge_rejected_while_another_is_pending() {
        let signer = account(1);
        let payee = account(2);
        let newcomer = account(3);
        let new_payee = account(4);

        let store = MapStore {
            txs: HashMap::new(),
            utxos: HashMap::new(),
            consensus: Vec::new(),
            all: vec![entry(&signer, &payee, NodeState::Pledging, Hash::default())],
        };

        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(Hash::from_data(b"funding"), 0);
        let mut seed = [0u8; 64];
        seed[2] = 0x22;
        tx.add_output_with_type(
            OUTPUT_TYPE_NODE_PLEDGE,
            &[],
            Script::new_threshold(1),
            Integer::from_value(10000),
            &seed,
        )
        .unwrap();
        tx.extra = pledge_extra(&newcomer, &new_payee);
        let ver = tx.as_versioned();

        let err = ver.validate_node_pledge(&store).unwrap_err();
        assert!(err.to_string().contains("invalid node pending state"));
    }

    #[test]
    fn pledge_rejected_on_key_collision() {
        let signer = account(1);
        let payee = account(2);

        let store = MapStore {
            txs: HashMap::new(),
            utxos: HashMap::new(),
            consensus: Vec::new(),
            all: vec![entry(&signer, &payee, NodeState::Accepted, Hash::default())],
        };

        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(Hash::from_data(b"funding"), 0);
        let mut seed = [0u8; 64];
        seed[3] = 0x33;
        tx.add_output_with_type(
            OUTPUT_TYPE_NODE_PLEDGE,
            &[],
            Script::new_threshold(1),
            Integer::from_value(10000),
            &seed,
        )
        .unwrap();
        // Reuse the existing node's signer key as the newcomer's signer.
        tx.extra = pledge_extra(&signer, &account(9));
        let ver = tx.as_versioned();

        let err = ver.validate_node_pledge(&store).unwrap_err();
        assert!(err.to_string().contains("invalid node signer key"));
    }

    #[test]
    fn accept_requires_matching_extra() {
        let signer = account(5);
        let payee = account(6);
        let (pit, pledge) = pledge_pair(&signer, &payee);
        let pledge_hash = pledge.payload_hash();

        let mut store = MapStore {
            txs: HashMap::new(),
            utxos: HashMap::new(),
            consensus: vec![entry(&signer, &payee, NodeState::Pledging, pledge_hash)],
            all: Vec::new(),
        };
        store.txs.insert(pit.payload_hash(), pit);
        store.txs.insert(pledge_hash, pledge.clone());

        let mut accept = Transaction::new(*XIN_ASSET_ID);
        accept.add_input(pledge_hash, 0);
        let mut seed = [0u8; 64];
        seed[4] = 0x44;
        accept
            .add_output_with_type(
                OUTPUT_TYPE_NODE_ACCEPT,
                std::slice::from_ref(&signer),
                Script::new_threshold(1),
                Integer::from_value(10000),
                &seed,
            )
            .unwrap();
        accept.extra = pledge.extra.clone();
        let good = accept.clone().as_versioned();
        good.validate_node_accept(&store).unwrap();

        let mut bad = accept;
        bad.extra[0] ^= 1;
        let err = bad.as_versioned().validate_node_accept(&store).unwrap_err();
        // A flipped byte either breaks the key decoding or the extra match.
        assert!(matches!(err, Error::NodeLifecycle(_) | Error::Crypto(_)));
    }

    #[test]
    fn remove_checks_accept_linkage() {
        let signer = account(7);
        let payee = account(8);

        let mut accept = Transaction::new(*XIN_ASSET_ID);
        accept.add_input(Hash::from_data(b"pledge"), 0);
        let mut seed = [0u8; 64];
        seed[5] = 0x55;
        accept
            .add_output_with_type(
                OUTPUT_TYPE_NODE_ACCEPT,
                std::slice::from_ref(&signer),
                Script::new_threshold(1),
                Integer::from_value(10000),
                &seed,
            )
            .unwrap();
        accept.extra = pledge_extra(&signer, &payee);
        let accept = accept.as_versioned();
        let accept_hash = accept.payload_hash();

        let mut store = MapStore {
            txs: HashMap::new(),
            utxos: HashMap::new(),
            consensus: Vec::new(),
            all: Vec::new(),
        };
        store.txs.insert(accept_hash, accept.clone());

        let mut remove = Transaction::new(*XIN_ASSET_ID);
        remove.add_input(accept_hash, 0);
        let mut seed2 = [0u8; 64];
        seed2[6] = 0x66;
        remove
            .add_output_with_type(
                crate::transaction::OUTPUT_TYPE_NODE_REMOVE,
                std::slice::from_ref(&payee),
                Script::new_threshold(1),
                Integer::from_value(10000),
                &seed2,
            )
            .unwrap();
        remove.extra = accept.extra.clone();
        let good = remove.clone().as_versioned();
        good.validate_node_remove(&store).unwrap();

        let mut bad = remove;
        bad.extra[1] ^= 1;
        let err = bad.as_versioned().validate_node_remove(&store).unwrap_err();
        assert!(err.to_string().contains("invalid accept and remove key"));
    }

    #[test]
    fn cancel_full_linkage_verifies() {
        let signer = account(11);
        let payee = account(12);
        let (pit, pledge) = pledge_pair(&signer, &payee);
        let pledge_hash = pledge.payload_hash();
        let pit_hash = pit.payload_hash();

        let mut store = MapStore {
            txs: HashMap::new(),
            utxos: HashMap::new(),
            consensus: vec![entry(&signer, &payee, NodeState::Pledging, pledge_hash)],
            all: Vec::new(),
        };
        store.txs.insert(pit_hash, pit.clone());
        store.txs.insert(pledge_hash, pledge.clone());

        let view = signer.private_view.clone().unwrap();
        let mut cancel = Transaction::new(*XIN_ASSET_ID);
        cancel.add_input(pledge_hash, 0);
        let mut mask_seed = [0u8; 64];
        mask_seed[9] = 0x90;
        cancel
            .add_output_with_type(
                OUTPUT_TYPE_NODE_CANCEL,
                &[],
                Script::new_threshold(1),
                Integer::from_value(100),
                &mask_seed,
            )
            .unwrap();
        // Refund output at index 1, addressed back to the pledger.
        cancel
            .add_script_output(
                std::slice::from_ref(&signer),
                Script::new_threshold(1),
                Integer::from_value(9900),
                &mask_seed,
            )
            .unwrap();
        let mut extra = pledge.extra.clone();
        extra.extend_from_slice(&view.key().0);
        cancel.extra = extra;

        let mut ver = cancel.as_versioned();
        // The cancel is authorized by the one-time key of the pledge's own
        // funding input.
        let pi = &pit.outputs[0];
        let ghost = derive_ghost_private_key(
            &pi.mask.as_public().unwrap(),
            &view,
            signer.private_spend.as_ref().unwrap(),
            0,
        );
        assert_eq!(ghost.public().key(), pi.keys[0]);
        let msg = ver.payload_hash();
        ver.signatures = vec![vec![ghost.sign(&msg.0)]];

        ver.validate_node_cancel(&store, &msg).unwrap();

        // A signature from any other key is rejected.
        let mut seed = [0u8; 64];
        seed[10] = 0xaa;
        let wrong = PrivateKey::from_seed(&seed).unwrap();
        let mut forged = ver.clone();
        forged.signatures = vec![vec![wrong.sign(&msg.0)]];
        let err = forged.validate_node_cancel(&store, &msg).unwrap_err();
        assert!(err.to_string().contains("invalid cancel signature"));
    }

    #[test]
    fn ghost_derivation_used_by_cancel_matches() {
        // The refund output's ghost at index 1 resolves to the pledger's
        // spend key under the view key carried in the extra.
        let signer = account(13);
        let view = signer.private_view.clone().unwrap();
        let r = PrivateKey::from_seed(&[3u8; 64]).unwrap();
        let ghost = derive_ghost_public_key(&r, &signer.public_view, &signer.public_spend, 1);
        let spend = view_ghost_output_key(&r.public(), &ghost, &view, 1).key();
        assert_eq!(spend, signer.public_spend.key());
    }
}

use std::sync::Arc;
use std::time::Duration;

use xin_core::{
    Address, DataStore, DepositData, Integer, Script, Transaction, BITCOIN_CHAIN_ID,
};
use xin_kernel::{Custom, Genesis, GenesisDomain, GenesisNode, NoGossip, Node};
use xin_storage::{SledStore, Store};

fn address(tag: u8) -> Address {
    let mut seed = [0u8; 64];
    seed[0] = tag;
    seed[7] = 0xe2;
    Address::from_seed(&seed)
}

fn deposit_transaction(domain: &Address, recipient: &Address, tag: u8) -> xin_core::VersionedTransaction {
    let amount = Integer::from_value(100);
    let mut tx = Transaction::new(*BITCOIN_CHAIN_ID);
    tx.add_deposit_input(DepositData {
        chain: *BITCOIN_CHAIN_ID,
        asset_key: "c6d0c728-2624-429b-8e0d-d9d19b6592fa".into(),
        transaction_hash: format!("dead{:02x}", tag),
        output_index: 0,
        amount: amount.clone(),
    });
    let mut seed = [0u8; 64];
    seed[1] = tag;
    tx.add_script_output(
        std::slice::from_ref(recipient),
        Script::new_threshold(1),
        amount,
        &seed,
    )
    .unwrap();
    let tx = tx.as_versioned();
    let mut signed = tx;
    // Deposits are attested by a custodian domain signature; no UTXO is
    // consumed, so the store is not consulted.
    let empty = EmptyStore;
    signed.sign_input(&empty, 0, std::slice::from_ref(domain)).unwrap();
    signed
}

struct EmptyStore;

impl xin_core::DataStore for EmptyStore {
    fn read_utxo(
        &self,
        _h: &xin_crypto::Hash,
        _i: u32,
    ) -> Result<Option<xin_core::UTXOWithLock>, xin_core::Error> {
        Ok(None)
    }
    fn check_ghost(&self, _k: &xin_crypto::Key) -> Result<bool, xin_core::Error> {
        Ok(false)
    }
    fn read_transaction(
        &self,
        _h: &xin_crypto::Hash,
    ) -> Result<Option<(xin_core::VersionedTransaction, String)>, xin_core::Error> {
        Ok(None)
    }
    fn read_all_nodes(&self) -> Result<Vec<xin_core::NodeEntry>, xin_core::Error> {
        Ok(Vec::new())
    }
    fn read_consensus_nodes(&self) -> Result<Vec<xin_core::NodeEntry>, xin_core::Error> {
        Ok(Vec::new())
    }
    fn check_deposit_input(
        &self,
        _d: &DepositData,
        _t: &xin_crypto::Hash,
    ) -> Result<(), xin_core::Error> {
        Ok(())
    }
    fn read_last_mint_distribution(
        &self,
        _g: &str,
    ) -> Result<Option<xin_core::MintDistribution>, xin_core::Error> {
        Ok(None)
    }
    fn read_domains(&self) -> Result<Vec<xin_core::Domain>, xin_core::Error> {
        Ok(Vec::new())
    }
}

async fn wait_for_topology(store: &SledStore, above: u64) -> bool {
    for _ in 0..200 {
        if store.topology_sequence() > above {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn single_node_network_finalizes_deposits() {
    let dir = std::env::temp_dir().join(format!("xin_kernel_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let store = Arc::new(SledStore::open(&dir).unwrap());

    let signer = address(0xaa);
    let payee = address(0xab);
    let domain = address(0xac);
    let recipient = address(0xad);

    let genesis = Genesis {
        epoch: 1_551_373_200, // 2019-02-28T17:00:00Z
        nodes: vec![GenesisNode {
            signer: signer.clone(),
            payee,
            balance: Integer::from_value(10000),
        }],
        domains: vec![GenesisDomain {
            signer: domain.clone(),
            balance: Integer::from_value(50000),
        }],
    };

    let mut custom = Custom::default();
    custom.node.signer_key = signer.private_spend.as_ref().unwrap().key().to_hex();
    let node = Node::setup(
        custom,
        store.clone(),
        Arc::new(NoGossip),
        &genesis,
        "localhost:7239".into(),
    )
    .unwrap();

    // Genesis produced one snapshot for the single node.
    assert_eq!(store.topology_sequence(), 1);
    assert_eq!(node.consensus_nodes().len(), 1);
    assert_eq!(node.consensus_threshold(0), 1);

    // A deposit lands, gets announced on our own chain, self-finalizes at
    // threshold one, and opens round 1 as a dummy advance (no peers).
    let tx = deposit_transaction(&domain, &recipient, 1);
    let hash = node.queue_transaction(&tx).unwrap();
    assert!(wait_for_topology(&store, 1).await, "snapshot not finalized");

    let snapshots = store.read_snapshots_since_topology(1, 16).unwrap();
    assert_eq!(snapshots.len(), 1);
    let snap = &snapshots[0].snapshot;
    assert_eq!(snap.transaction, hash);
    assert_eq!(snap.round_number, 1);
    assert!(snap.signature.is_some());
    assert!(snap.references.is_some());

    // The transaction is final and its output spendable.
    let (_, state) = store.read_transaction(&hash).unwrap().unwrap();
    assert!(!state.is_empty());
    let utxo = store.read_utxo(&hash, 0).unwrap().unwrap();
    assert_eq!(utxo.utxo.output.amount, Integer::from_value(100));
    for key in &utxo.utxo.output.keys {
        assert!(store.check_ghost(key).unwrap());
    }

    // The chain advanced: round 0 sealed, round 1 open with the snapshot.
    let chain = node.get_or_create_chain(node.id_for_network).unwrap();
    {
        let state = chain.state.read();
        let final_round = state.final_round.as_ref().unwrap();
        assert_eq!(final_round.number, 0);
        let cache = state.cache_round.as_ref().unwrap();
        assert_eq!(cache.number, 1);
        assert_eq!(cache.snapshots.len(), 1);
    }
    assert_eq!(node.build_graph().len(), 1);

    // A different transaction claiming the same external deposit is
    // rejected outright.
    let replay = deposit_transaction(&domain, &address(0xae), 1);
    assert_ne!(replay.payload_hash(), hash);
    assert!(node.queue_transaction(&replay).is_err());

    // After the round gap, the next transaction opens round 2, again as a
    // dummy advance.
    tokio::time::sleep(Duration::from_millis(3_100)).await;
    let tx2 = deposit_transaction(&domain, &recipient, 2);
    let before = store.topology_sequence();
    node.queue_transaction(&tx2).unwrap();
    assert!(wait_for_topology(&store, before).await, "second snapshot not finalized");

    {
        let state = chain.state.read();
        assert_eq!(state.final_round.as_ref().unwrap().number, 1);
        assert_eq!(state.cache_round.as_ref().unwrap().number, 2);
    }

    node.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _ = std::fs::remove_dir_all(&dir);
}

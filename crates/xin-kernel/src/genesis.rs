use std::path::Path;

use serde::{Deserialize, Serialize};
use xin_core::{
    encoding, Address, Domain, Error, Integer, NodeEntry, NodeState, Script, Snapshot,
    SnapshotWithTopologicalOrder, Transaction, OUTPUT_TYPE_NODE_ACCEPT, SNAPSHOT_VERSION,
    XIN_ASSET_ID,
};
use xin_crypto::Hash;
use xin_storage::{GenesisLoad, Round};

use crate::graph::CacheRound;

/// The network's founding document: the epoch instant, the initial kernel
/// nodes with their pledges, and the deposit custodian domains.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Genesis {
    /// Unix seconds.
    pub epoch: u64,
    pub nodes: Vec<GenesisNode>,
    #[serde(default)]
    pub domains: Vec<GenesisDomain>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisNode {
    pub signer: Address,
    pub payee: Address,
    pub balance: Integer,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisDomain {
    pub signer: Address,
    pub balance: Integer,
}

impl Genesis {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Store(e.to_string()))?;
        let genesis: Genesis =
            serde_json::from_str(&raw).map_err(|e| Error::Syntax(e.to_string()))?;
        genesis.verify()?;
        Ok(genesis)
    }

    pub fn verify(&self) -> Result<(), Error> {
        if self.nodes.is_empty() {
            return Err(Error::Syntax("genesis requires at least one node".into()));
        }
        for (i, n) in self.nodes.iter().enumerate() {
            for other in &self.nodes[..i] {
                if n.signer.hash() == other.signer.hash() || n.payee.hash() == other.payee.hash()
                {
                    return Err(Error::Syntax(format!(
                        "duplicate genesis node key {}",
                        n.signer
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn epoch_ns(&self) -> u64 {
        self.epoch * 1_000_000_000
    }

    /// The network id is the digest of the canonical genesis encoding, so
    /// every peer derives the same identity from the same document.
    pub fn network_id(&self) -> Hash {
        xin_crypto::new_hash(&encoding::marshal(self))
    }

    /// Materialize the genesis graph: one accept transaction and one
    /// round-0 snapshot per node, cross-resolvable final rounds, registry
    /// rows and domains.
    pub fn build(&self) -> Result<GenesisLoad, Error> {
        self.verify()?;
        let network_id = self.network_id();
        let epoch = self.epoch_ns();

        let mut heads = Vec::new();
        let mut finals = Vec::new();
        let mut snapshots = Vec::new();
        let mut transactions = Vec::new();
        let mut nodes = Vec::new();

        for (i, n) in self.nodes.iter().enumerate() {
            let mut tx = Transaction::new(*XIN_ASSET_ID);
            tx.add_genesis_input(&network_id);
            let digest =
                xin_crypto::new_hash(format!("{}{}GENESIS", n.signer, n.payee).as_bytes());
            let mut seed = [0u8; 64];
            seed[..32].copy_from_slice(&digest.0);
            seed[32..].copy_from_slice(&digest.0);
            tx.add_output_with_type(
                OUTPUT_TYPE_NODE_ACCEPT,
                std::slice::from_ref(&n.payee),
                Script::new_threshold(1),
                n.balance.clone(),
                &seed,
            )?;
            let mut extra = n.signer.public_spend.key().0.to_vec();
            extra.extend_from_slice(&n.payee.public_spend.key().0);
            tx.extra = extra;
            let tx = tx.as_versioned();

            let node_id = n.signer.id_for_network(&network_id);
            let mut snapshot = Snapshot::new(node_id, tx.payload_hash());
            snapshot.version = SNAPSHOT_VERSION;
            snapshot.timestamp = epoch;

            let mut round = CacheRound::new(node_id, 0, epoch, None);
            round.add_snapshot(snapshot.clone())?;
            let final_round = round.as_final().expect("genesis round holds its snapshot");

            heads.push(Round {
                node_id,
                number: 0,
                timestamp: epoch,
                references: None,
            });
            finals.push((
                final_round.hash,
                Round {
                    node_id,
                    number: 0,
                    timestamp: epoch,
                    references: None,
                },
            ));
            snapshots.push(SnapshotWithTopologicalOrder {
                snapshot,
                topological_order: i as u64,
            });
            nodes.push(NodeEntry {
                signer: n.signer.clone(),
                payee: n.payee.clone(),
                state: NodeState::Accepted,
                transaction: tx.payload_hash(),
                timestamp: epoch,
            });
            transactions.push(tx);
        }

        let domains = self
            .domains
            .iter()
            .map(|d| Domain {
                account: d.signer.clone(),
            })
            .collect();

        Ok(GenesisLoad {
            network_id,
            heads,
            finals,
            snapshots,
            transactions,
            nodes,
            domains,
        })
    }
}

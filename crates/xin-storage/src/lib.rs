//! Persistence surface for the kernel: the [`Store`] trait covering rounds,
//! snapshots, topology and locks on top of the validation-level
//! [`DataStore`], plus the sled-backed engine implementing it.

pub mod sled_store;

use serde::{Deserialize, Serialize};
use xin_core::{
    DataStore, DepositData, Domain, Error, MintData, MintDistribution, NodeEntry, RoundLink,
    Snapshot, SnapshotWithTopologicalOrder, VersionedTransaction,
};
use xin_crypto::Hash;

pub use sled_store::SledStore;

/// A persisted round record: the head round of a chain, or a finalized
/// round resolvable by its hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Round {
    pub node_id: Hash,
    pub number: u64,
    pub timestamp: u64,
    pub references: Option<RoundLink>,
}

/// Everything a fresh store needs to boot a network.
#[derive(Clone, Debug)]
pub struct GenesisLoad {
    pub network_id: Hash,
    /// One head round per genesis node, all at number 0.
    pub heads: Vec<Round>,
    /// The same rounds keyed by their finalized hash, so peers' references
    /// resolve from the very first round.
    pub finals: Vec<(Hash, Round)>,
    pub snapshots: Vec<SnapshotWithTopologicalOrder>,
    pub transactions: Vec<VersionedTransaction>,
    pub nodes: Vec<NodeEntry>,
    pub domains: Vec<Domain>,
}

/// The full storage surface the kernel consumes.
pub trait Store: DataStore {
    fn close(&self) -> Result<(), Error>;

    // ── Genesis ─────────────────────────────────────────────────────────────
    fn check_genesis_load(&self) -> Result<bool, Error>;
    fn load_genesis(&self, load: &GenesisLoad) -> Result<(), Error>;
    fn read_network_id(&self) -> Result<Option<Hash>, Error>;

    // ── Graph ───────────────────────────────────────────────────────────────
    fn read_round(&self, hash: &Hash) -> Result<Option<Round>, Error>;
    fn read_round_head(&self, node_id: &Hash) -> Result<Option<Round>, Error>;
    fn read_round_heads(&self) -> Result<Vec<Round>, Error>;
    fn read_link(&self, from: &Hash, to: &Hash) -> Result<u64, Error>;
    /// Persist a finalized round under its hash and advance the node's head
    /// to `number` with `references`; the link towards the referenced
    /// external round advances with it.
    fn start_new_round(
        &self,
        node_id: &Hash,
        number: u64,
        references: &RoundLink,
        final_start: u64,
        final_hash: &Hash,
    ) -> Result<(), Error>;
    fn update_empty_head_round(
        &self,
        node_id: &Hash,
        number: u64,
        references: &RoundLink,
    ) -> Result<(), Error>;

    // ── Snapshots / topology ────────────────────────────────────────────────
    /// Persist a finalized snapshot, materialize its transaction's outputs
    /// and side effects, and assign the next topology sequence.
    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<u64, Error>;
    fn read_snapshot(&self, hash: &Hash) -> Result<Option<SnapshotWithTopologicalOrder>, Error>;
    fn read_snapshots_since_topology(
        &self,
        offset: u64,
        count: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, Error>;
    fn read_snapshots_for_node_round(
        &self,
        node_id: &Hash,
        round: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, Error>;
    fn topology_sequence(&self) -> u64;

    // ── Transactions / locks ────────────────────────────────────────────────
    fn write_transaction(&self, tx: &VersionedTransaction) -> Result<(), Error>;
    fn cache_put_transaction(&self, tx: &VersionedTransaction) -> Result<(), Error>;
    fn cache_get_transaction(&self, hash: &Hash) -> Result<Option<VersionedTransaction>, Error>;
    fn lock_utxo(&self, hash: &Hash, index: u32, tx: &Hash, fork: bool) -> Result<(), Error>;
    fn lock_deposit_input(&self, deposit: &DepositData, tx: &Hash, fork: bool)
        -> Result<(), Error>;
    fn lock_mint_input(&self, mint: &MintData, tx: &Hash, fork: bool) -> Result<(), Error>;
    /// Claim the fee slot of a withdrawal-submit transaction.
    fn lock_withdrawal_claim(&self, submit: &Hash, tx: &Hash, fork: bool) -> Result<(), Error>;

    // ── Mint ────────────────────────────────────────────────────────────────
    fn read_mint_distributions(
        &self,
        group: &str,
        offset: u64,
        count: u64,
    ) -> Result<Vec<MintDistribution>, Error>;

    // ── Integrity ───────────────────────────────────────────────────────────
    /// Walk the most recent `depth` rounds of every chain, returning
    /// (total, invalid) entry counts.
    fn validate_graph_entries(&self, network_id: &Hash, depth: u64) -> Result<(u64, u64), Error>;
}

use serde::{Deserialize, Serialize};
use xin_crypto::{Hash, Key};

use crate::address::Address;
use crate::error::Error;
use crate::integer::Integer;
use crate::node::NodeEntry;
use crate::transaction::{DepositData, Input, Output, VersionedTransaction};

/// A spendable output together with the transaction input that created it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UTXO {
    pub input: Input,
    pub output: Output,
    pub asset: Hash,
}

/// A UTXO with the hash of the transaction that spent (or is spending) it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UTXOWithLock {
    pub utxo: UTXO,
    pub lock_hash: Option<Hash>,
}

/// A deposit custodian admitted at genesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Domain {
    pub account: Address,
}

/// Persisted record of one reward-mint batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MintDistribution {
    pub group: String,
    pub batch: u64,
    pub amount: Integer,
    pub transaction: Hash,
}

/// The storage surface transaction validation consumes. The full engine
/// behind it (rounds, snapshots, topology) lives in the storage crate.
pub trait DataStore: Send + Sync {
    fn read_utxo(&self, hash: &Hash, index: u32) -> Result<Option<UTXOWithLock>, Error>;

    /// Whether a one-time output key was ever used by a confirmed output.
    fn check_ghost(&self, key: &Key) -> Result<bool, Error>;

    /// A confirmed transaction and its state (the finalizing snapshot hash,
    /// or empty while unconfirmed).
    fn read_transaction(&self, hash: &Hash)
        -> Result<Option<(VersionedTransaction, String)>, Error>;

    fn read_all_nodes(&self) -> Result<Vec<NodeEntry>, Error>;

    fn read_consensus_nodes(&self) -> Result<Vec<NodeEntry>, Error>;

    /// Reject a deposit that was already claimed by a different transaction.
    fn check_deposit_input(&self, deposit: &DepositData, tx: &Hash) -> Result<(), Error>;

    fn read_last_mint_distribution(&self, group: &str)
        -> Result<Option<MintDistribution>, Error>;

    fn read_domains(&self) -> Result<Vec<Domain>, Error>;
}

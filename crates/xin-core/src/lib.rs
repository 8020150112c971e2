//! Ledger data model for the XIN kernel: amounts, addresses, assets,
//! threshold scripts, UTXO transactions with their validators, snapshots and
//! the node registry entries the consensus layer derives its committee from.

pub mod address;
pub mod asset;
pub mod encoding;
pub mod error;
pub mod integer;
pub mod node;
pub mod script;
pub mod snapshot;
pub mod store;
pub mod transaction;

pub use address::Address;
pub use asset::{Asset, BITCOIN_CHAIN_ID, ETHEREUM_CHAIN_ID, XIN_ASSET_ID};
pub use error::Error;
pub use integer::Integer;
pub use node::{NodeEntry, NodeState};
pub use script::{Script, OPERATOR_64, OPERATOR_CMP, OPERATOR_SUM};
pub use snapshot::{RoundLink, Snapshot, SnapshotWithTopologicalOrder, SyncPoint, SNAPSHOT_VERSION};
pub use store::{DataStore, Domain, MintDistribution, UTXOWithLock, UTXO};
pub use transaction::{
    decompress_unmarshal_versioned_transaction, DepositData, Input, MintData, Output, Transaction,
    TransactionKind, VersionedTransaction, EXTRA_SIZE_LIMIT, MINT_GROUP_KERNEL_NODE,
    OUTPUT_TYPE_DOMAIN_ACCEPT, OUTPUT_TYPE_FEE, OUTPUT_TYPE_NODE_ACCEPT, OUTPUT_TYPE_NODE_CANCEL,
    OUTPUT_TYPE_NODE_PLEDGE, OUTPUT_TYPE_NODE_REMOVE, OUTPUT_TYPE_NODE_RESIGN,
    OUTPUT_TYPE_SCRIPT, OUTPUT_TYPE_WITHDRAWAL_CLAIM, OUTPUT_TYPE_WITHDRAWAL_FUEL,
    OUTPUT_TYPE_WITHDRAWAL_SUBMIT, TRANSACTION_MAXIMUM_SIZE, TX_VERSION,
};

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use xin_crypto::{derive_ghost_private_key, derive_ghost_public_key, view_ghost_output_key};
use xin_crypto::{Hash, Key, PrivateKey, Signature};

use crate::address::Address;
use crate::asset::{Asset, XIN_ASSET_ID};
use crate::encoding;
use crate::error::Error;
use crate::integer::Integer;
use crate::script::Script;
use crate::store::DataStore;

pub const TX_VERSION: u8 = 0x01;
pub const EXTRA_SIZE_LIMIT: usize = 256;
pub const TRANSACTION_MAXIMUM_SIZE: usize = 1024 * 1024;

pub const OUTPUT_TYPE_SCRIPT: u8 = 0x00;
pub const OUTPUT_TYPE_NODE_PLEDGE: u8 = 0x01;
pub const OUTPUT_TYPE_NODE_ACCEPT: u8 = 0x02;
pub const OUTPUT_TYPE_NODE_RESIGN: u8 = 0x03;
pub const OUTPUT_TYPE_NODE_REMOVE: u8 = 0x04;
pub const OUTPUT_TYPE_NODE_CANCEL: u8 = 0x05;
pub const OUTPUT_TYPE_DOMAIN_ACCEPT: u8 = 0x06;
pub const OUTPUT_TYPE_WITHDRAWAL_SUBMIT: u8 = 0x07;
pub const OUTPUT_TYPE_WITHDRAWAL_FUEL: u8 = 0x08;
pub const OUTPUT_TYPE_WITHDRAWAL_CLAIM: u8 = 0x09;
pub const OUTPUT_TYPE_FEE: u8 = 0x0a;

pub const MINT_GROUP_KERNEL_NODE: &str = "KERNELNODE";

/// Tagged transaction kind, derived from the inputs first and the output
/// types second. The generic input/signature checks run for every kind; the
/// kind selects the specific validator that runs after them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionKind {
    Script,
    Mint,
    Deposit,
    Genesis,
    NodePledge,
    NodeAccept,
    NodeResign,
    NodeRemove,
    NodeCancel,
    DomainAccept,
    WithdrawalSubmit,
    WithdrawalFuel,
    WithdrawalClaim,
}

/// External-chain deposit claim.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DepositData {
    pub chain: Hash,
    pub asset_key: String,
    pub transaction_hash: String,
    pub output_index: u64,
    pub amount: Integer,
}

impl DepositData {
    /// Store-unique identity of the claimed external output.
    pub fn unique_key(&self) -> Hash {
        let mut data = self.chain.0.to_vec();
        data.extend_from_slice(self.asset_key.as_bytes());
        data.extend_from_slice(self.transaction_hash.as_bytes());
        data.extend_from_slice(&self.output_index.to_be_bytes());
        xin_crypto::new_hash(&data)
    }
}

/// Kernel reward mint claim for one batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MintData {
    pub group: String,
    pub batch: u64,
    pub amount: Integer,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Input {
    pub hash: Hash,
    pub index: u32,
    #[serde(with = "encoding::option_bytes_serde", default)]
    pub genesis: Option<Vec<u8>>,
    #[serde(default)]
    pub deposit: Option<DepositData>,
    #[serde(default)]
    pub mint: Option<MintData>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(rename = "Type")]
    pub output_type: u8,
    pub amount: Integer,
    pub keys: Vec<Key>,
    pub script: Script,
    pub mask: Key,
}

/// The unsigned transaction payload. Its canonical encoding is the signed
/// message and the source of the transaction hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Transaction {
    pub version: u8,
    pub asset: Hash,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    #[serde(with = "encoding::bytes_serde", default)]
    pub extra: Vec<u8>,
}

impl Transaction {
    pub fn new(asset: Hash) -> Self {
        Self {
            version: TX_VERSION,
            asset,
            inputs: Vec::new(),
            outputs: Vec::new(),
            extra: Vec::new(),
        }
    }

    pub fn add_input(&mut self, hash: Hash, index: u32) {
        self.inputs.push(Input {
            hash,
            index,
            genesis: None,
            deposit: None,
            mint: None,
        });
    }

    pub fn add_deposit_input(&mut self, deposit: DepositData) {
        self.inputs.push(Input {
            hash: Hash::default(),
            index: 0,
            genesis: None,
            deposit: Some(deposit),
            mint: None,
        });
    }

    pub fn add_kernel_node_mint_input(&mut self, batch: u64, amount: Integer) {
        self.inputs.push(Input {
            hash: Hash::default(),
            index: 0,
            genesis: None,
            deposit: None,
            mint: Some(MintData {
                group: MINT_GROUP_KERNEL_NODE.into(),
                batch,
                amount,
            }),
        });
    }

    pub fn add_genesis_input(&mut self, network_id: &Hash) {
        self.inputs.push(Input {
            hash: Hash::default(),
            index: 0,
            genesis: Some(network_id.0.to_vec()),
            deposit: None,
            mint: None,
        });
    }

    /// Append an output of `output_type` addressed to `accounts`, with the
    /// one-time keys derived at this output's index from a mask seeded by
    /// `seed`.
    pub fn add_output_with_type(
        &mut self,
        output_type: u8,
        accounts: &[Address],
        script: Script,
        amount: Integer,
        seed: &[u8; 64],
    ) -> Result<(), Error> {
        let r = PrivateKey::from_seed(seed)?;
        let index = self.outputs.len() as u64;
        let keys = accounts
            .iter()
            .map(|a| derive_ghost_public_key(&r, &a.public_view, &a.public_spend, index).key())
            .collect();
        self.outputs.push(Output {
            output_type,
            amount,
            keys,
            script,
            mask: r.public().key(),
        });
        Ok(())
    }

    pub fn add_script_output(
        &mut self,
        accounts: &[Address],
        script: Script,
        amount: Integer,
        seed: &[u8; 64],
    ) -> Result<(), Error> {
        self.add_output_with_type(OUTPUT_TYPE_SCRIPT, accounts, script, amount, seed)
    }

    pub fn add_random_script_output(
        &mut self,
        accounts: &[Address],
        script: Script,
        amount: Integer,
    ) -> Result<(), Error> {
        let mut seed = [0u8; 64];
        rand::Rng::fill(&mut rand::thread_rng(), &mut seed[..]);
        self.add_script_output(accounts, script, amount, &seed)
    }

    pub fn as_versioned(self) -> VersionedTransaction {
        VersionedTransaction {
            transaction: self,
            signatures: Vec::new(),
        }
    }

    pub fn transaction_type(&self) -> TransactionKind {
        for input in &self.inputs {
            if input.mint.is_some() {
                return TransactionKind::Mint;
            }
            if input.deposit.is_some() {
                return TransactionKind::Deposit;
            }
            if input.genesis.is_some() {
                return TransactionKind::Genesis;
            }
        }
        for output in &self.outputs {
            match output.output_type {
                OUTPUT_TYPE_NODE_PLEDGE => return TransactionKind::NodePledge,
                OUTPUT_TYPE_NODE_ACCEPT => return TransactionKind::NodeAccept,
                OUTPUT_TYPE_NODE_RESIGN => return TransactionKind::NodeResign,
                OUTPUT_TYPE_NODE_REMOVE => return TransactionKind::NodeRemove,
                OUTPUT_TYPE_NODE_CANCEL => return TransactionKind::NodeCancel,
                OUTPUT_TYPE_DOMAIN_ACCEPT => return TransactionKind::DomainAccept,
                OUTPUT_TYPE_WITHDRAWAL_SUBMIT => return TransactionKind::WithdrawalSubmit,
                OUTPUT_TYPE_WITHDRAWAL_FUEL => return TransactionKind::WithdrawalFuel,
                OUTPUT_TYPE_WITHDRAWAL_CLAIM => return TransactionKind::WithdrawalClaim,
                _ => {}
            }
        }
        TransactionKind::Script
    }
}

/// The signed, versioned wire transaction.
#[derive(Clone, Debug)]
pub struct VersionedTransaction {
    pub transaction: Transaction,
    /// Outer index = input index; inner = one signature per signing key.
    pub signatures: Vec<Vec<Signature>>,
}

impl Deref for VersionedTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.transaction
    }
}

impl DerefMut for VersionedTransaction {
    fn deref_mut(&mut self) -> &mut Transaction {
        &mut self.transaction
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SignedRef<'a> {
    version: u8,
    asset: &'a Hash,
    inputs: &'a [Input],
    outputs: &'a [Output],
    #[serde(with = "encoding::bytes_serde")]
    extra: &'a Vec<u8>,
    signatures: &'a [Vec<Signature>],
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SignedOwned {
    version: u8,
    asset: Hash,
    #[serde(default)]
    inputs: Vec<Input>,
    #[serde(default)]
    outputs: Vec<Output>,
    #[serde(with = "encoding::bytes_serde", default)]
    extra: Vec<u8>,
    #[serde(default)]
    signatures: Vec<Vec<Signature>>,
}

impl Serialize for VersionedTransaction {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        SignedRef {
            version: self.transaction.version,
            asset: &self.transaction.asset,
            inputs: &self.transaction.inputs,
            outputs: &self.transaction.outputs,
            extra: &self.transaction.extra,
            signatures: &self.signatures,
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for VersionedTransaction {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let owned = SignedOwned::deserialize(d)?;
        Ok(Self {
            transaction: Transaction {
                version: owned.version,
                asset: owned.asset,
                inputs: owned.inputs,
                outputs: owned.outputs,
                extra: owned.extra,
            },
            signatures: owned.signatures,
        })
    }
}

/// Decode a wire transaction, compressed or raw.
pub fn decompress_unmarshal_versioned_transaction(
    data: &[u8],
) -> Result<VersionedTransaction, Error> {
    encoding::decompress_unmarshal(data)
}

impl VersionedTransaction {
    pub fn marshal(&self) -> Vec<u8> {
        encoding::marshal(self)
    }

    pub fn compress_marshal(&self) -> Vec<u8> {
        encoding::compress_marshal(self)
    }

    /// The canonical unsigned payload: what signatures cover and what the
    /// transaction hash digests.
    pub fn payload_marshal(&self) -> Vec<u8> {
        encoding::marshal(&self.transaction)
    }

    pub fn payload_hash(&self) -> Hash {
        xin_crypto::new_hash(&self.payload_marshal())
    }

    /// Sign input `index` with `accounts`. For deposit and mint inputs the
    /// accounts' spend keys sign directly; for UTXO inputs the derived
    /// one-time private keys sign, and each must match one of the UTXO's
    /// keys.
    pub fn sign_input(
        &mut self,
        store: &dyn DataStore,
        index: usize,
        accounts: &[Address],
    ) -> Result<(), Error> {
        let msg = self.payload_hash();
        let input = self
            .transaction
            .inputs
            .get(index)
            .ok_or_else(|| Error::Syntax(format!("invalid input index {}", index)))?
            .clone();

        let mut sigs = Vec::with_capacity(accounts.len());
        if input.deposit.is_some() || input.mint.is_some() {
            for acc in accounts {
                let spend = acc
                    .private_spend
                    .as_ref()
                    .ok_or_else(|| Error::Signature("missing private spend key".into()))?;
                sigs.push(spend.sign(&msg.0));
            }
        } else {
            let utxo = store
                .read_utxo(&input.hash, input.index)?
                .ok_or_else(|| {
                    Error::Utxo(format!("input not found {}:{}", input.hash, input.index))
                })?;
            let keys_filter: HashSet<Key> = utxo.utxo.output.keys.iter().copied().collect();
            let mask = utxo.utxo.output.mask.as_public()?;
            for acc in accounts {
                let view = acc
                    .private_view
                    .as_ref()
                    .ok_or_else(|| Error::Signature("missing private view key".into()))?;
                let spend = acc
                    .private_spend
                    .as_ref()
                    .ok_or_else(|| Error::Signature("missing private spend key".into()))?;
                let ghost = derive_ghost_private_key(&mask, view, spend, input.index as u64);
                if !keys_filter.contains(&ghost.public().key()) {
                    return Err(Error::Signature(format!(
                        "invalid key for the input {}",
                        ghost.public().key()
                    )));
                }
                sigs.push(ghost.sign(&msg.0));
            }
        }
        if self.signatures.len() != index {
            return Err(Error::Signature(format!(
                "invalid signature index {} {}",
                self.signatures.len(),
                index
            )));
        }
        self.signatures.push(sigs);
        Ok(())
    }

    /// Resolve every script output's keys under `view`: outputs addressed
    /// to the holder resolve to their public spend key.
    pub fn view_ghost_key(&self, view: &PrivateKey) -> Vec<Output> {
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (i, o) in self.transaction.outputs.iter().enumerate() {
            let mut out = o.clone();
            if o.output_type == OUTPUT_TYPE_SCRIPT {
                if let Ok(mask) = o.mask.as_public() {
                    out.keys = o
                        .keys
                        .iter()
                        .map(|k| match k.as_public() {
                            Ok(ghost) => {
                                view_ghost_output_key(&mask, &ghost, view, i as u64).key()
                            }
                            Err(_) => *k,
                        })
                        .collect();
                }
            }
            outputs.push(out);
        }
        outputs
    }

    // ── Validation ───────────────────────────────────────────────────────────

    pub fn validate(&self, store: &dyn DataStore) -> Result<(), Error> {
        let kind = self.transaction_type();

        if self.version != TX_VERSION {
            return Err(Error::Syntax(format!("invalid tx version {}", self.version)));
        }
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(Error::Syntax(format!(
                "invalid tx inputs or outputs {} {}",
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        if self.extra.len() > EXTRA_SIZE_LIMIT {
            return Err(Error::Syntax(format!(
                "invalid extra size {}",
                self.extra.len()
            )));
        }
        if self.inputs.len() != self.signatures.len()
            && kind != TransactionKind::NodeAccept
            && kind != TransactionKind::NodeRemove
        {
            return Err(Error::Signature(format!(
                "invalid tx signature number {} {}",
                self.signatures.len(),
                self.inputs.len()
            )));
        }
        if self.payload_marshal().len() > TRANSACTION_MAXIMUM_SIZE {
            return Err(Error::Syntax("transaction size limit exceeded".into()));
        }

        let msg = self.payload_hash();
        let input_amount = self.validate_inputs(store, &msg, kind)?;
        let output_amount = self.validate_outputs(store)?;
        if input_amount != output_amount {
            return Err(Error::Syntax(format!(
                "invalid input output amount {} {}",
                input_amount, output_amount
            )));
        }

        match kind {
            TransactionKind::Script => Ok(()),
            TransactionKind::Deposit => self.validate_deposit(store, &msg),
            TransactionKind::Mint => self.validate_mint(store),
            TransactionKind::NodePledge => self.validate_node_pledge(store),
            TransactionKind::NodeAccept => self.validate_node_accept(store),
            TransactionKind::NodeCancel => self.validate_node_cancel(store, &msg),
            TransactionKind::NodeRemove => self.validate_node_remove(store),
            other => Err(Error::Syntax(format!("invalid tx type {:?}", other))),
        }
    }

    fn validate_inputs(
        &self,
        store: &dyn DataStore,
        msg: &Hash,
        kind: TransactionKind,
    ) -> Result<Integer, Error> {
        let mut filter = HashSet::new();
        let mut amount = Integer::zero();

        for (i, input) in self.transaction.inputs.iter().enumerate() {
            if !filter.insert((input.hash, input.index)) {
                return Err(Error::Syntax(format!(
                    "invalid input {}:{}",
                    input.hash, input.index
                )));
            }

            if let Some(deposit) = &input.deposit {
                if self.inputs.len() != 1 {
                    return Err(Error::Syntax(format!(
                        "invalid inputs count {} for deposit",
                        self.inputs.len()
                    )));
                }
                if deposit.amount.sign() <= 0 {
                    return Err(Error::Syntax(format!(
                        "invalid deposit amount {}",
                        deposit.amount
                    )));
                }
                amount = deposit.amount.clone();
                continue;
            }
            if let Some(mint) = &input.mint {
                if self.inputs.len() != 1 {
                    return Err(Error::Syntax(format!(
                        "invalid inputs count {} for mint",
                        self.inputs.len()
                    )));
                }
                if mint.amount.sign() <= 0 {
                    return Err(Error::Mint(format!("invalid mint amount {}", mint.amount)));
                }
                amount = mint.amount.clone();
                continue;
            }
            if input.genesis.is_some() {
                return Err(Error::Syntax("invalid genesis input".into()));
            }

            let utxo = store.read_utxo(&input.hash, input.index)?.ok_or_else(|| {
                Error::Utxo(format!("input not found {}:{}", input.hash, input.index))
            })?;
            if let Some(lock) = utxo.lock_hash {
                if lock != self.payload_hash() {
                    return Err(Error::Utxo(format!(
                        "input locked {}:{} by {}",
                        input.hash, input.index, lock
                    )));
                }
            }
            if utxo.utxo.asset != self.asset {
                return Err(Error::Asset(format!(
                    "invalid input asset {} {}",
                    utxo.utxo.asset, self.asset
                )));
            }

            match utxo.utxo.output.output_type {
                OUTPUT_TYPE_SCRIPT => {
                    self.verify_utxo_signatures(&utxo.utxo.output, i, msg)?;
                }
                OUTPUT_TYPE_NODE_PLEDGE => {
                    if kind != TransactionKind::NodeAccept && kind != TransactionKind::NodeCancel
                    {
                        return Err(Error::Utxo(format!(
                            "pledge input spent by invalid tx type {:?}",
                            kind
                        )));
                    }
                }
                OUTPUT_TYPE_NODE_ACCEPT => {
                    if kind != TransactionKind::NodeRemove {
                        return Err(Error::Utxo(format!(
                            "accept input spent by invalid tx type {:?}",
                            kind
                        )));
                    }
                }
                t => {
                    return Err(Error::Utxo(format!("invalid input type {}", t)));
                }
            }

            amount = amount.add(&utxo.utxo.output.amount);
        }

        Ok(amount)
    }

    fn verify_utxo_signatures(&self, output: &Output, index: usize, msg: &Hash) -> Result<(), Error> {
        output.script.verify_format()?;
        let threshold = output.script.threshold() as usize;
        if threshold > output.keys.len() {
            return Err(Error::Script(format!(
                "unsatisfiable threshold {} of {}",
                threshold,
                output.keys.len()
            )));
        }

        let sigs = self
            .signatures
            .get(index)
            .ok_or_else(|| Error::Signature(format!("missing signatures for input {}", index)))?;
        if sigs.len() < threshold {
            return Err(Error::Signature(format!(
                "invalid tx signature number {} {}",
                sigs.len(),
                threshold
            )));
        }

        let mut used = vec![false; output.keys.len()];
        let mut valid = 0usize;
        for sig in sigs {
            for (j, key) in output.keys.iter().enumerate() {
                if used[j] {
                    continue;
                }
                let public = key.as_public()?;
                if public.verify(&msg.0, sig) {
                    used[j] = true;
                    valid += 1;
                    break;
                }
            }
        }
        if valid < threshold {
            return Err(Error::Signature(format!(
                "invalid tx signature count {} {}",
                valid, threshold
            )));
        }
        Ok(())
    }

    fn validate_outputs(&self, store: &dyn DataStore) -> Result<Integer, Error> {
        let mut amount = Integer::zero();
        let mut seen = HashSet::new();
        for output in &self.transaction.outputs {
            if output.amount.sign() <= 0 {
                return Err(Error::Syntax(format!(
                    "invalid output amount {}",
                    output.amount
                )));
            }
            output.script.verify_format()?;
            for key in &output.keys {
                if !seen.insert(*key) {
                    return Err(Error::Utxo(format!("invalid output key {}", key)));
                }
                if store.check_ghost(key)? {
                    return Err(Error::Utxo(format!("invalid output key {}", key)));
                }
            }
            amount = amount.add(&output.amount);
        }
        Ok(amount)
    }

    fn validate_deposit(&self, store: &dyn DataStore, msg: &Hash) -> Result<(), Error> {
        let deposit = self.inputs[0]
            .deposit
            .as_ref()
            .ok_or_else(|| Error::Syntax("missing deposit data".into()))?;
        if deposit.transaction_hash.is_empty() {
            return Err(Error::Syntax("invalid deposit transaction hash".into()));
        }
        let asset = Asset {
            chain_id: deposit.chain,
            asset_key: deposit.asset_key.clone(),
        };
        asset.verify()?;
        if self.asset != deposit.chain && self.asset != asset.asset_id() {
            return Err(Error::Asset(format!(
                "invalid deposit asset {} for chain {}",
                self.asset, deposit.chain
            )));
        }

        if self.signatures.len() != 1 || self.signatures[0].len() != 1 {
            return Err(Error::Signature(format!(
                "invalid deposit signatures {}",
                self.signatures.len()
            )));
        }
        let sig = &self.signatures[0][0];
        let signed = store
            .read_domains()?
            .iter()
            .any(|d| d.account.public_spend.verify(&msg.0, sig));
        if !signed {
            return Err(Error::Signature("invalid domain signature for deposit".into()));
        }

        store.check_deposit_input(deposit, &self.payload_hash())
    }

    fn validate_mint(&self, store: &dyn DataStore) -> Result<(), Error> {
        let mint = self.inputs[0]
            .mint
            .as_ref()
            .ok_or_else(|| Error::Syntax("missing mint data".into()))?;
        if self.asset != *XIN_ASSET_ID {
            return Err(Error::Asset(format!("invalid mint asset {}", self.asset)));
        }
        if mint.group != MINT_GROUP_KERNEL_NODE {
            return Err(Error::Mint(format!("invalid mint group {}", mint.group)));
        }
        if mint.batch < 1 {
            return Err(Error::Mint(format!("invalid mint batch {}", mint.batch)));
        }
        if let Some(last) = store.read_last_mint_distribution(&mint.group)? {
            if last.batch >= mint.batch {
                return Err(Error::Mint(format!(
                    "invalid mint batch {} {}",
                    last.batch, mint.batch
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Domain, MintDistribution, UTXOWithLock, UTXO};
    use crate::node::NodeEntry;
    use xin_crypto::new_hash;

    pub(crate) struct TestStore {
        pub seed: [u8; 64],
        pub accounts: Vec<Address>,
    }

    impl DataStore for TestStore {
        fn read_utxo(&self, hash: &Hash, index: u32) -> Result<Option<UTXOWithLock>, Error> {
            let mask_r = PrivateKey::from_seed(&self.seed).unwrap();
            let keys = (0..=index as usize)
                .map(|i| {
                    derive_ghost_public_key(
                        &mask_r,
                        &self.accounts[i].public_view,
                        &self.accounts[i].public_spend,
                        index as u64,
                    )
                    .key()
                })
                .collect();
            Ok(Some(UTXOWithLock {
                utxo: UTXO {
                    input: Input {
                        hash: *hash,
                        index,
                        genesis: None,
                        deposit: None,
                        mint: None,
                    },
                    output: Output {
                        output_type: OUTPUT_TYPE_SCRIPT,
                        amount: Integer::from_value(10000),
                        keys,
                        script: Script::new_threshold(index as u8 + 1),
                        mask: mask_r.public().key(),
                    },
                    asset: *XIN_ASSET_ID,
                },
                lock_hash: None,
            }))
        }

        fn check_ghost(&self, _key: &Key) -> Result<bool, Error> {
            Ok(false)
        }

        fn read_transaction(
            &self,
            _hash: &Hash,
        ) -> Result<Option<(VersionedTransaction, String)>, Error> {
            Ok(None)
        }

        fn read_all_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
            Ok(Vec::new())
        }

        fn read_consensus_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
            Ok(Vec::new())
        }

        fn check_deposit_input(&self, _deposit: &DepositData, _tx: &Hash) -> Result<(), Error> {
            Ok(())
        }

        fn read_last_mint_distribution(
            &self,
            _group: &str,
        ) -> Result<Option<MintDistribution>, Error> {
            Ok(None)
        }

        fn read_domains(&self) -> Result<Vec<Domain>, Error> {
            Ok(vec![Domain {
                account: self.accounts[0].clone(),
            }])
        }
    }

    pub(crate) fn test_accounts(n: usize) -> Vec<Address> {
        (0..n)
            .map(|i| {
                let mut seed = [0u8; 64];
                seed[i] = i as u8;
                Address::from_seed(&seed)
            })
            .collect()
    }

    fn test_store(accounts: &[Address]) -> TestStore {
        let mut seed = [0u8; 64];
        seed[0] = 0x77;
        seed[63] = 0x19;
        TestStore {
            seed,
            accounts: accounts.to_vec(),
        }
    }

    #[test]
    fn deposit_transaction_validates() {
        let accounts = test_accounts(3);
        let store = test_store(&accounts);

        let chain_id = *crate::asset::BITCOIN_CHAIN_ID;
        let asset = Asset {
            chain_id,
            asset_key: "c6d0c728-2624-429b-8e0d-d9d19b6592fa".into(),
        };
        let amount = Integer::from_string("12345.54321").unwrap();

        let mut tx = Transaction::new(asset.asset_id());
        tx.add_deposit_input(DepositData {
            chain: chain_id,
            asset_key: asset.asset_key.clone(),
            transaction_hash: "c5945a8571fc84cd6850b26b5771d76311ed56957a04e993927de07b83f07c91"
                .into(),
            output_index: 0,
            amount: amount.clone(),
        });
        let mut seed = [0u8; 64];
        seed[9] = 0x9;
        tx.add_script_output(&accounts, Script::new_threshold(1), amount, &seed)
            .unwrap();

        let mut signed = tx.as_versioned();
        signed.sign_input(&store, 0, &accounts[..1]).unwrap();
        signed.validate(&store).unwrap();
    }

    #[test]
    fn scripted_transaction_hash_evolves_and_validates() {
        let accounts = test_accounts(3);
        let store = test_store(&accounts);
        let genesis_hash = Hash::default();
        let script = Script(vec![crate::script::OPERATOR_CMP, crate::script::OPERATOR_SUM, 2]);

        let mut ver = Transaction::new(*XIN_ASSET_ID).as_versioned();
        let h0 = ver.payload_hash();
        ver.add_input(genesis_hash, 0);
        let h1 = ver.payload_hash();
        assert_ne!(h0, h1);
        ver.add_input(genesis_hash, 1);
        let h2 = ver.payload_hash();
        assert_ne!(h1, h2);

        let mut mask_seed = [0u8; 64];
        mask_seed.fill(1);
        ver.transaction.outputs.push(Output {
            output_type: OUTPUT_TYPE_SCRIPT,
            amount: Integer::from_value(10000),
            keys: Vec::new(),
            script: script.clone(),
            mask: PrivateKey::from_seed(&mask_seed).unwrap().public().key(),
        });
        let h3 = ver.payload_hash();
        assert_ne!(h2, h3);
        ver.add_script_output(&accounts, script, Integer::from_value(10000), &mask_seed)
            .unwrap();
        assert_ne!(ver.payload_hash(), h3);

        // Unsigned: the signature count check fires first.
        let err = ver.validate(&store).unwrap_err();
        assert!(err.to_string().contains("invalid tx signature number"));

        // Wrong key set on every input.
        for i in 0..ver.inputs.len() {
            let err = {
                let mut attempt = ver.clone();
                attempt.signatures = vec![Vec::new(); i];
                attempt.sign_input(&store, i, &accounts).unwrap_err()
            };
            assert!(err.to_string().contains("invalid key for the input"));
        }

        // Input i is spendable by accounts[0..=i].
        for i in 0..ver.inputs.len() {
            ver.sign_input(&store, i, &accounts[0..=i]).unwrap();
        }
        ver.validate(&store).unwrap();

        // The receiver's view key resolves their output slot to their spend key.
        let outputs = ver.view_ghost_key(accounts[1].private_view.as_ref().unwrap());
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            outputs[1].keys[1],
            accounts[1].public_spend.key()
        );
        let outputs = ver.view_ghost_key(accounts[1].private_spend.as_ref().unwrap());
        assert_ne!(outputs[1].keys[1], accounts[1].public_spend.key());
        assert_ne!(outputs[1].keys[1], accounts[1].public_view.key());
    }

    #[test]
    fn marshal_is_canonical_and_envelope_decodes() {
        let accounts = test_accounts(2);
        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(new_hash(b"prev"), 0);
        let mut seed = [0u8; 64];
        seed[3] = 3;
        tx.add_script_output(&accounts, Script::new_threshold(1), Integer::from_value(5), &seed)
            .unwrap();
        tx.extra = b"trace".to_vec();
        let ver = tx.as_versioned();

        let pm = ver.marshal();
        let decoded = decompress_unmarshal_versioned_transaction(&pm).unwrap();
        assert_eq!(decoded.marshal(), pm);
        assert_eq!(decoded.payload_hash(), ver.payload_hash());

        let cm = ver.compress_marshal();
        assert_eq!(&cm[..4], &encoding::COMPRESSION_MAGIC);
        let decoded = decompress_unmarshal_versioned_transaction(&cm).unwrap();
        assert_eq!(decoded.marshal(), pm);
    }

    #[test]
    fn oversize_extra_rejected() {
        let accounts = test_accounts(1);
        let store = test_store(&accounts);
        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(Hash::default(), 0);
        let mut seed = [0u8; 64];
        seed[1] = 1;
        tx.add_script_output(&accounts, Script::new_threshold(1), Integer::from_value(10000), &seed)
            .unwrap();
        tx.extra = vec![0u8; EXTRA_SIZE_LIMIT + 1];
        let mut ver = tx.as_versioned();
        ver.sign_input(&store, 0, &accounts[..1]).unwrap();
        let err = ver.validate(&store).unwrap_err();
        assert!(err.to_string().contains("invalid extra size"));
    }

    #[test]
    fn amount_mismatch_rejected() {
        let accounts = test_accounts(1);
        let store = test_store(&accounts);
        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(Hash::default(), 0);
        let mut seed = [0u8; 64];
        seed[2] = 2;
        tx.add_script_output(&accounts, Script::new_threshold(1), Integer::from_value(9999), &seed)
            .unwrap();
        let mut ver = tx.as_versioned();
        ver.sign_input(&store, 0, &accounts[..1]).unwrap();
        let err = ver.validate(&store).unwrap_err();
        assert!(err.to_string().contains("invalid input output amount"));
    }

    #[test]
    fn duplicate_input_rejected() {
        let accounts = test_accounts(1);
        let store = test_store(&accounts);
        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(Hash::default(), 0);
        tx.add_input(Hash::default(), 0);
        let mut seed = [0u8; 64];
        seed[4] = 4;
        tx.add_script_output(&accounts, Script::new_threshold(1), Integer::from_value(20000), &seed)
            .unwrap();
        let mut ver = tx.as_versioned();
        ver.sign_input(&store, 0, &accounts[..1]).unwrap();
        ver.sign_input(&store, 1, &accounts[..1]).unwrap();
        let err = ver.validate(&store).unwrap_err();
        assert!(err.to_string().contains("invalid input"));
    }

    #[test]
    fn duplicated_output_keys_rejected() {
        let accounts = test_accounts(1);
        let store = test_store(&accounts);
        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_input(Hash::default(), 0);
        let mut seed = [0u8; 64];
        seed[5] = 5;
        tx.add_script_output(&accounts, Script::new_threshold(1), Integer::from_value(5000), &seed)
            .unwrap();
        let dup = tx.outputs[0].clone();
        tx.outputs.push(dup);
        let mut ver = tx.as_versioned();
        ver.sign_input(&store, 0, &accounts[..1]).unwrap();
        let err = ver.validate(&store).unwrap_err();
        assert!(err.to_string().contains("invalid output key"));
    }

    #[test]
    fn mint_batch_regression_rejected() {
        struct MintStore(TestStore, MintDistribution);
        impl DataStore for MintStore {
            fn read_utxo(&self, h: &Hash, i: u32) -> Result<Option<UTXOWithLock>, Error> {
                self.0.read_utxo(h, i)
            }
            fn check_ghost(&self, k: &Key) -> Result<bool, Error> {
                self.0.check_ghost(k)
            }
            fn read_transaction(
                &self,
                h: &Hash,
            ) -> Result<Option<(VersionedTransaction, String)>, Error> {
                self.0.read_transaction(h)
            }
            fn read_all_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
                self.0.read_all_nodes()
            }
            fn read_consensus_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
                self.0.read_consensus_nodes()
            }
            fn check_deposit_input(&self, d: &DepositData, t: &Hash) -> Result<(), Error> {
                self.0.check_deposit_input(d, t)
            }
            fn read_last_mint_distribution(
                &self,
                _group: &str,
            ) -> Result<Option<MintDistribution>, Error> {
                Ok(Some(self.1.clone()))
            }
            fn read_domains(&self) -> Result<Vec<Domain>, Error> {
                self.0.read_domains()
            }
        }

        let accounts = test_accounts(1);
        let store = MintStore(
            test_store(&accounts),
            MintDistribution {
                group: MINT_GROUP_KERNEL_NODE.into(),
                batch: 10,
                amount: Integer::from_value(1),
                transaction: Hash::default(),
            },
        );

        let mut tx = Transaction::new(*XIN_ASSET_ID);
        tx.add_kernel_node_mint_input(10, Integer::from_value(100));
        let mut seed = [0u8; 64];
        seed[6] = 6;
        tx.add_script_output(&accounts, Script::new_threshold(1), Integer::from_value(100), &seed)
            .unwrap();
        let mut ver = tx.as_versioned();
        ver.signatures = vec![Vec::new()];
        let err = ver.validate(&store).unwrap_err();
        assert!(err.to_string().contains("invalid mint batch"));
    }
}

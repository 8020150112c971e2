use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;
use xin_core::{
    encoding, Address, DataStore, DepositData, Domain, Error, MintData, MintDistribution,
    NodeEntry, NodeState, RoundLink, Snapshot, SnapshotWithTopologicalOrder, TransactionKind,
    UTXOWithLock, VersionedTransaction, UTXO,
};
use xin_crypto::{Hash, Key, KEY_SIZE};

use crate::{GenesisLoad, Round, Store};

const META_TOPOLOGY: &[u8] = b"topology";
const META_NETWORK: &[u8] = b"network";
const META_GENESIS: &[u8] = b"genesis";

fn st(e: sled::Error) -> Error {
    Error::Store(e.to_string())
}

fn utxo_key(hash: &Hash, index: u32) -> Vec<u8> {
    let mut key = hash.0.to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn snapshot_key(node_id: &Hash, round: u64, topology: u64) -> Vec<u8> {
    let mut key = node_id.0.to_vec();
    key.extend_from_slice(&round.to_be_bytes());
    key.extend_from_slice(&topology.to_be_bytes());
    key
}

fn link_key(from: &Hash, to: &Hash) -> Vec<u8> {
    let mut key = from.0.to_vec();
    key.extend_from_slice(&to.0);
    key
}

fn mint_key(group: &str, batch: u64) -> Vec<u8> {
    let mut key = group.as_bytes().to_vec();
    key.extend_from_slice(&batch.to_be_bytes());
    key
}

/// Persistent graph store backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   meta          — utf8 key           → raw bytes (topology counter, network id)
///   transactions  — tx hash            → canonical tx bytes
///   tx_states     — tx hash            → finalizing snapshot hash
///   cache_txs     — tx hash            → canonical tx bytes (pre-consensus pool)
///   utxos         — tx hash ‖ index    → UTXOWithLock
///   ghosts        — one-time key       → tx hash
///   deposits      — deposit unique key → tx hash
///   mints         — group ‖ batch      → MintDistribution
///   nodes         — signer spend key   → NodeEntry (latest state per signer)
///   rounds        — final round hash   → Round
///   round_heads   — node id            → Round (current cache head)
///   links         — from ‖ to          → round number
///   snapshots     — node ‖ round ‖ seq → SnapshotWithTopologicalOrder
///   snap_index    — snapshot hash      → snapshots tree key
///   topology      — seq                → snapshot hash
///   domains       — account hash       → Domain
pub struct SledStore {
    db: sled::Db,
    meta: sled::Tree,
    transactions: sled::Tree,
    tx_states: sled::Tree,
    cache_txs: sled::Tree,
    utxos: sled::Tree,
    ghosts: sled::Tree,
    deposits: sled::Tree,
    mints: sled::Tree,
    nodes: sled::Tree,
    rounds: sled::Tree,
    round_heads: sled::Tree,
    links: sled::Tree,
    snapshots: sled::Tree,
    snap_index: sled::Tree,
    topology: sled::Tree,
    domains: sled::Tree,
    topology_seq: AtomicU64,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let db = sled::open(path).map_err(st)?;
        let meta = db.open_tree("meta").map_err(st)?;
        let store = Self {
            transactions: db.open_tree("transactions").map_err(st)?,
            tx_states: db.open_tree("tx_states").map_err(st)?,
            cache_txs: db.open_tree("cache_txs").map_err(st)?,
            utxos: db.open_tree("utxos").map_err(st)?,
            ghosts: db.open_tree("ghosts").map_err(st)?,
            deposits: db.open_tree("deposits").map_err(st)?,
            mints: db.open_tree("mints").map_err(st)?,
            nodes: db.open_tree("nodes").map_err(st)?,
            rounds: db.open_tree("rounds").map_err(st)?,
            round_heads: db.open_tree("round_heads").map_err(st)?,
            links: db.open_tree("links").map_err(st)?,
            snapshots: db.open_tree("snapshots").map_err(st)?,
            snap_index: db.open_tree("snap_index").map_err(st)?,
            topology: db.open_tree("topology").map_err(st)?,
            domains: db.open_tree("domains").map_err(st)?,
            topology_seq: AtomicU64::new(0),
            meta,
            db,
        };
        let seq = store
            .meta
            .get(META_TOPOLOGY)
            .map_err(st)?
            .map(|v| {
                let mut b = [0u8; 8];
                b.copy_from_slice(&v);
                u64::from_be_bytes(b)
            })
            .unwrap_or(0);
        store.topology_seq.store(seq, Ordering::SeqCst);
        Ok(store)
    }

    fn get<T: serde::de::DeserializeOwned>(
        tree: &sled::Tree,
        key: &[u8],
    ) -> Result<Option<T>, Error> {
        match tree.get(key).map_err(st)? {
            Some(bytes) => Ok(Some(encoding::unmarshal(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: serde::Serialize>(tree: &sled::Tree, key: &[u8], value: &T) -> Result<(), Error> {
        tree.insert(key, encoding::marshal(value)).map_err(st)?;
        Ok(())
    }

    fn next_topology(&self) -> Result<u64, Error> {
        let seq = self.topology_seq.fetch_add(1, Ordering::SeqCst);
        self.meta
            .insert(META_TOPOLOGY, &(seq + 1).to_be_bytes()[..])
            .map_err(st)?;
        Ok(seq)
    }

    fn update_link(&self, node_id: &Hash, references: &RoundLink) -> Result<(), Error> {
        if let Some(external) = self.read_round(&references.external)? {
            self.links
                .insert(
                    link_key(node_id, &external.node_id),
                    &external.number.to_be_bytes()[..],
                )
                .map_err(st)?;
        }
        Ok(())
    }

    fn materialize_transaction(&self, tx: &VersionedTransaction, snap: &Snapshot) -> Result<(), Error> {
        let tx_hash = tx.payload_hash();
        self.transactions
            .insert(tx_hash.0, tx.marshal())
            .map_err(st)?;
        self.cache_txs.remove(tx_hash.0).map_err(st)?;
        self.tx_states
            .insert(tx_hash.0, &snap.payload_hash().0[..])
            .map_err(st)?;

        for input in &tx.inputs {
            if let Some(deposit) = &input.deposit {
                self.lock_deposit_input(deposit, &tx_hash, false)?;
            } else if let Some(mint) = &input.mint {
                self.lock_mint_input(mint, &tx_hash, false)?;
                Self::put(
                    &self.mints,
                    &mint_key(&mint.group, mint.batch),
                    &MintDistribution {
                        group: mint.group.clone(),
                        batch: mint.batch,
                        amount: mint.amount.clone(),
                        transaction: tx_hash,
                    },
                )?;
            } else if input.genesis.is_none() {
                self.lock_utxo(&input.hash, input.index, &tx_hash, false)?;
            }
        }

        for (i, output) in tx.outputs.iter().enumerate() {
            let utxo = UTXOWithLock {
                utxo: UTXO {
                    input: xin_core::Input {
                        hash: tx_hash,
                        index: i as u32,
                        genesis: None,
                        deposit: None,
                        mint: None,
                    },
                    output: output.clone(),
                    asset: tx.asset,
                },
                lock_hash: None,
            };
            Self::put(&self.utxos, &utxo_key(&tx_hash, i as u32), &utxo)?;
            for key in &output.keys {
                self.ghosts.insert(&key.0[..], &tx_hash.0[..]).map_err(st)?;
            }
        }

        self.apply_node_operation(tx, snap.timestamp)?;
        Ok(())
    }

    fn apply_node_operation(&self, tx: &VersionedTransaction, timestamp: u64) -> Result<(), Error> {
        let kind = tx.transaction_type();
        let state = match kind {
            TransactionKind::NodePledge => NodeState::Pledging,
            TransactionKind::NodeAccept => NodeState::Accepted,
            TransactionKind::NodeCancel => NodeState::Cancelled,
            TransactionKind::NodeRemove => NodeState::Removed,
            _ => return Ok(()),
        };
        if tx.extra.len() < 2 * KEY_SIZE {
            return Err(Error::NodeLifecycle(format!(
                "invalid lifecycle extra length {}",
                tx.extra.len()
            )));
        }

        let mut signer_raw = [0u8; KEY_SIZE];
        signer_raw.copy_from_slice(&tx.extra[..KEY_SIZE]);
        let signer = Address::from_public_spend(Key(signer_raw).as_public()?);
        let mut payee_raw = [0u8; KEY_SIZE];
        payee_raw.copy_from_slice(&tx.extra[KEY_SIZE..2 * KEY_SIZE]);
        let payee = Address::from_public_spend(Key(payee_raw).as_public()?);

        let entry = NodeEntry {
            signer: signer.clone(),
            payee,
            state,
            transaction: tx.payload_hash(),
            timestamp,
        };
        Self::put(&self.nodes, &signer.public_spend.key().0, &entry)?;
        Ok(())
    }
}

impl DataStore for SledStore {
    fn read_utxo(&self, hash: &Hash, index: u32) -> Result<Option<UTXOWithLock>, Error> {
        Self::get(&self.utxos, &utxo_key(hash, index))
    }

    fn check_ghost(&self, key: &Key) -> Result<bool, Error> {
        Ok(self.ghosts.contains_key(key.0).map_err(st)?)
    }

    fn read_transaction(
        &self,
        hash: &Hash,
    ) -> Result<Option<(VersionedTransaction, String)>, Error> {
        let raw = match self.transactions.get(hash.0).map_err(st)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let tx: VersionedTransaction = encoding::unmarshal(&raw)?;
        let state = self
            .tx_states
            .get(hash.0)
            .map_err(st)?
            .map(|v| hex::encode(&v))
            .unwrap_or_default();
        Ok(Some((tx, state)))
    }

    fn read_all_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
        let mut out = Vec::new();
        for item in self.nodes.iter() {
            let (_, v) = item.map_err(st)?;
            out.push(encoding::unmarshal(&v)?);
        }
        Ok(out)
    }

    fn read_consensus_nodes(&self) -> Result<Vec<NodeEntry>, Error> {
        Ok(self
            .read_all_nodes()?
            .into_iter()
            .filter(|n| {
                matches!(
                    n.state,
                    NodeState::Pledging | NodeState::Accepted | NodeState::Resigning
                )
            })
            .collect())
    }

    fn check_deposit_input(&self, deposit: &DepositData, tx: &Hash) -> Result<(), Error> {
        match self.deposits.get(deposit.unique_key().0).map_err(st)? {
            Some(existing) if existing.as_ref() != tx.0 => Err(Error::Utxo(format!(
                "deposit already claimed by {}",
                hex::encode(&existing)
            ))),
            _ => Ok(()),
        }
    }

    fn read_last_mint_distribution(&self, group: &str) -> Result<Option<MintDistribution>, Error> {
        let mut last = None;
        for item in self.mints.scan_prefix(group.as_bytes()) {
            let (_, v) = item.map_err(st)?;
            last = Some(encoding::unmarshal(&v)?);
        }
        Ok(last)
    }

    fn read_domains(&self) -> Result<Vec<Domain>, Error> {
        let mut out = Vec::new();
        for item in self.domains.iter() {
            let (_, v) = item.map_err(st)?;
            out.push(encoding::unmarshal(&v)?);
        }
        Ok(out)
    }
}

impl Store for SledStore {
    fn close(&self) -> Result<(), Error> {
        self.db.flush().map_err(st)?;
        Ok(())
    }

    fn check_genesis_load(&self) -> Result<bool, Error> {
        Ok(self.meta.contains_key(META_GENESIS).map_err(st)?)
    }

    fn load_genesis(&self, load: &GenesisLoad) -> Result<(), Error> {
        if self.check_genesis_load()? {
            let existing = self.read_network_id()?;
            if existing != Some(load.network_id) {
                return Err(Error::Store(format!(
                    "network id mismatch {:?} {}",
                    existing, load.network_id
                )));
            }
            return Ok(());
        }
        info!(network = %load.network_id, nodes = load.nodes.len(), "loading genesis");

        for head in &load.heads {
            Self::put(&self.round_heads, &head.node_id.0, head)?;
        }
        for (hash, round) in &load.finals {
            Self::put(&self.rounds, &hash.0, round)?;
        }
        for tx in &load.transactions {
            let hash = tx.payload_hash();
            self.transactions.insert(hash.0, tx.marshal()).map_err(st)?;
            for (i, output) in tx.outputs.iter().enumerate() {
                let utxo = UTXOWithLock {
                    utxo: UTXO {
                        input: xin_core::Input {
                            hash,
                            index: i as u32,
                            genesis: None,
                            deposit: None,
                            mint: None,
                        },
                        output: output.clone(),
                        asset: tx.asset,
                    },
                    lock_hash: None,
                };
                Self::put(&self.utxos, &utxo_key(&hash, i as u32), &utxo)?;
                for key in &output.keys {
                    self.ghosts.insert(&key.0[..], &hash.0[..]).map_err(st)?;
                }
            }
        }
        for s in &load.snapshots {
            let key = snapshot_key(&s.snapshot.node_id, s.snapshot.round_number, s.topological_order);
            Self::put(&self.snapshots, &key, s)?;
            self.snap_index
                .insert(s.snapshot.payload_hash().0, key.clone())
                .map_err(st)?;
            self.topology
                .insert(s.topological_order.to_be_bytes(), &s.snapshot.payload_hash().0[..])
                .map_err(st)?;
            self.tx_states
                .insert(s.snapshot.transaction.0, &s.snapshot.payload_hash().0[..])
                .map_err(st)?;
        }
        for n in &load.nodes {
            Self::put(&self.nodes, &n.signer.public_spend.key().0, n)?;
        }
        for d in &load.domains {
            Self::put(&self.domains, &d.account.hash().0, d)?;
        }

        let seq = load.snapshots.len() as u64;
        self.topology_seq.store(seq, Ordering::SeqCst);
        self.meta
            .insert(META_TOPOLOGY, &seq.to_be_bytes()[..])
            .map_err(st)?;
        self.meta
            .insert(META_NETWORK, &load.network_id.0[..])
            .map_err(st)?;
        self.meta.insert(META_GENESIS, &[1u8][..]).map_err(st)?;
        self.db.flush().map_err(st)?;
        Ok(())
    }

    fn read_network_id(&self) -> Result<Option<Hash>, Error> {
        Ok(self.meta.get(META_NETWORK).map_err(st)?.map(|v| {
            let mut b = [0u8; 32];
            b.copy_from_slice(&v);
            Hash(b)
        }))
    }

    fn read_round(&self, hash: &Hash) -> Result<Option<Round>, Error> {
        Self::get(&self.rounds, &hash.0)
    }

    fn read_round_head(&self, node_id: &Hash) -> Result<Option<Round>, Error> {
        Self::get(&self.round_heads, &node_id.0)
    }

    fn read_round_heads(&self) -> Result<Vec<Round>, Error> {
        let mut out = Vec::new();
        for item in self.round_heads.iter() {
            let (_, v) = item.map_err(st)?;
            out.push(encoding::unmarshal(&v)?);
        }
        Ok(out)
    }

    fn read_link(&self, from: &Hash, to: &Hash) -> Result<u64, Error> {
        Ok(self
            .links
            .get(link_key(from, to))
            .map_err(st)?
            .map(|v| {
                let mut b = [0u8; 8];
                b.copy_from_slice(&v);
                u64::from_be_bytes(b)
            })
            .unwrap_or(0))
    }

    fn start_new_round(
        &self,
        node_id: &Hash,
        number: u64,
        references: &RoundLink,
        final_start: u64,
        final_hash: &Hash,
    ) -> Result<(), Error> {
        let head = self.read_round_head(node_id)?;
        let final_round = Round {
            node_id: *node_id,
            number: number - 1,
            timestamp: final_start,
            references: head.and_then(|h| h.references),
        };
        Self::put(&self.rounds, &final_hash.0, &final_round)?;
        Self::put(
            &self.round_heads,
            &node_id.0,
            &Round {
                node_id: *node_id,
                number,
                timestamp: final_start,
                references: Some(references.clone()),
            },
        )?;
        self.update_link(node_id, references)
    }

    fn update_empty_head_round(
        &self,
        node_id: &Hash,
        number: u64,
        references: &RoundLink,
    ) -> Result<(), Error> {
        let head = self
            .read_round_head(node_id)?
            .ok_or_else(|| Error::Store(format!("no head round for {}", node_id)))?;
        if head.number != number {
            return Err(Error::Store(format!(
                "head round mismatch {} {}",
                head.number, number
            )));
        }
        Self::put(
            &self.round_heads,
            &node_id.0,
            &Round {
                references: Some(references.clone()),
                ..head
            },
        )?;
        self.update_link(node_id, references)
    }

    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<u64, Error> {
        let tx = match self.cache_get_transaction(&snapshot.transaction)? {
            Some(tx) => tx,
            None => {
                self.read_transaction(&snapshot.transaction)?
                    .map(|(tx, _)| tx)
                    .ok_or_else(|| {
                        Error::Store(format!(
                            "snapshot transaction missing {}",
                            snapshot.transaction
                        ))
                    })?
            }
        };
        self.materialize_transaction(&tx, snapshot)?;

        let seq = self.next_topology()?;
        let with_order = SnapshotWithTopologicalOrder {
            snapshot: snapshot.clone(),
            topological_order: seq,
        };
        let key = snapshot_key(&snapshot.node_id, snapshot.round_number, seq);
        Self::put(&self.snapshots, &key, &with_order)?;
        self.snap_index
            .insert(snapshot.payload_hash().0, key)
            .map_err(st)?;
        self.topology
            .insert(seq.to_be_bytes(), &snapshot.payload_hash().0[..])
            .map_err(st)?;
        Ok(seq)
    }

    fn read_snapshot(&self, hash: &Hash) -> Result<Option<SnapshotWithTopologicalOrder>, Error> {
        match self.snap_index.get(hash.0).map_err(st)? {
            Some(key) => Self::get(&self.snapshots, &key),
            None => Ok(None),
        }
    }

    fn read_snapshots_since_topology(
        &self,
        offset: u64,
        count: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, Error> {
        let mut out = Vec::new();
        for item in self.topology.range(offset.to_be_bytes().to_vec()..) {
            if out.len() as u64 >= count {
                break;
            }
            let (_, hash_raw) = item.map_err(st)?;
            let mut h = [0u8; 32];
            h.copy_from_slice(&hash_raw);
            if let Some(s) = self.read_snapshot(&Hash(h))? {
                out.push(s);
            }
        }
        Ok(out)
    }

    fn read_snapshots_for_node_round(
        &self,
        node_id: &Hash,
        round: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, Error> {
        let mut prefix = node_id.0.to_vec();
        prefix.extend_from_slice(&round.to_be_bytes());
        let mut out = Vec::new();
        for item in self.snapshots.scan_prefix(prefix) {
            let (_, v) = item.map_err(st)?;
            out.push(encoding::unmarshal(&v)?);
        }
        Ok(out)
    }

    fn topology_sequence(&self) -> u64 {
        self.topology_seq.load(Ordering::SeqCst)
    }

    fn write_transaction(&self, tx: &VersionedTransaction) -> Result<(), Error> {
        self.transactions
            .insert(tx.payload_hash().0, tx.marshal())
            .map_err(st)?;
        Ok(())
    }

    fn cache_put_transaction(&self, tx: &VersionedTransaction) -> Result<(), Error> {
        self.cache_txs
            .insert(tx.payload_hash().0, tx.marshal())
            .map_err(st)?;
        Ok(())
    }

    fn cache_get_transaction(&self, hash: &Hash) -> Result<Option<VersionedTransaction>, Error> {
        match self.cache_txs.get(hash.0).map_err(st)? {
            Some(raw) => Ok(Some(encoding::unmarshal(&raw)?)),
            None => Ok(None),
        }
    }

    fn lock_utxo(&self, hash: &Hash, index: u32, tx: &Hash, fork: bool) -> Result<(), Error> {
        let key = utxo_key(hash, index);
        let mut utxo: UTXOWithLock = Self::get(&self.utxos, &key)?
            .ok_or_else(|| Error::Utxo(format!("utxo not found {}:{}", hash, index)))?;
        if let Some(lock) = utxo.lock_hash {
            if lock != *tx && !fork {
                return Err(Error::Utxo(format!(
                    "utxo locked {}:{} by {}",
                    hash, index, lock
                )));
            }
        }
        utxo.lock_hash = Some(*tx);
        Self::put(&self.utxos, &key, &utxo)
    }

    fn lock_deposit_input(
        &self,
        deposit: &DepositData,
        tx: &Hash,
        fork: bool,
    ) -> Result<(), Error> {
        let key = deposit.unique_key();
        if let Some(existing) = self.deposits.get(key.0).map_err(st)? {
            if existing.as_ref() != tx.0 && !fork {
                return Err(Error::Utxo(format!(
                    "deposit already claimed by {}",
                    hex::encode(&existing)
                )));
            }
        }
        self.deposits.insert(key.0, &tx.0[..]).map_err(st)?;
        Ok(())
    }

    fn lock_mint_input(&self, mint: &MintData, tx: &Hash, fork: bool) -> Result<(), Error> {
        if let Some(dist) =
            Self::get::<MintDistribution>(&self.mints, &mint_key(&mint.group, mint.batch))?
        {
            if dist.transaction != *tx && !fork {
                return Err(Error::Mint(format!(
                    "mint batch {} locked by {}",
                    mint.batch, dist.transaction
                )));
            }
        }
        Ok(())
    }

    fn lock_withdrawal_claim(&self, submit: &Hash, tx: &Hash, fork: bool) -> Result<(), Error> {
        let mut key = b"withdrawal".to_vec();
        key.extend_from_slice(&submit.0);
        if let Some(existing) = self.deposits.get(&key).map_err(st)? {
            if existing.as_ref() != tx.0 && !fork {
                return Err(Error::Utxo(format!(
                    "withdrawal {} already claimed by {}",
                    submit,
                    hex::encode(&existing)
                )));
            }
        }
        self.deposits.insert(key, &tx.0[..]).map_err(st)?;
        Ok(())
    }

    fn read_mint_distributions(
        &self,
        group: &str,
        offset: u64,
        count: u64,
    ) -> Result<Vec<MintDistribution>, Error> {
        let mut out = Vec::new();
        for item in self.mints.range(mint_key(group, offset)..) {
            if out.len() as u64 >= count {
                break;
            }
            let (k, v) = item.map_err(st)?;
            if !k.starts_with(group.as_bytes()) {
                break;
            }
            out.push(encoding::unmarshal(&v)?);
        }
        Ok(out)
    }

    fn validate_graph_entries(&self, _network_id: &Hash, depth: u64) -> Result<(u64, u64), Error> {
        let mut total = 0u64;
        let mut invalid = 0u64;
        for head in self.read_round_heads()? {
            let begin = head.number.saturating_sub(depth);
            for round in begin..=head.number {
                for s in self.read_snapshots_for_node_round(&head.node_id, round)? {
                    total += 1;
                    let ok = s.snapshot.node_id == head.node_id
                        && s.snapshot.round_number == round
                        && self
                            .transactions
                            .contains_key(s.snapshot.transaction.0)
                            .map_err(st)?;
                    if !ok {
                        invalid += 1;
                    }
                }
            }
        }
        Ok((total, invalid))
    }
}

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};
use xin_core::{
    Address, Error, NodeState, Snapshot, SyncPoint, VersionedTransaction, SNAPSHOT_VERSION,
};
use xin_crypto::{Hash, Key, PublicKey, Signature, KEY_SIZE};
use xin_storage::Store;

use crate::chain::{chain_loop, Chain, CosiAction, CosiActionKind};
use crate::clock;
use crate::config::{
    Custom, KERNEL_NODE_ACCEPT_PERIOD_MINIMUM, SNAPSHOT_REFERENCE_THRESHOLD, SNAPSHOT_ROUND_GAP,
};
use crate::genesis::Genesis;
use crate::graph::{ChainState, FinalRound};

/// Outbound consensus messaging. The transport behind it is external; the
/// kernel only decides what goes to whom.
pub trait Gossip: Send + Sync {
    fn send_snapshot_announcement(
        &self,
        peer_id: &Hash,
        snapshot: &Snapshot,
        transaction: &VersionedTransaction,
    );
    fn send_snapshot_commit(&self, peer_id: &Hash, snapshot: &Snapshot, signature: &Signature);
    fn send_snapshot_finalization(&self, peer_id: &Hash, snapshot: &Snapshot);
}

/// Discards every message; a single-node network needs no peers.
pub struct NoGossip;

impl Gossip for NoGossip {
    fn send_snapshot_announcement(&self, _: &Hash, _: &Snapshot, _: &VersionedTransaction) {}
    fn send_snapshot_commit(&self, _: &Hash, _: &Snapshot, _: &Signature) {}
    fn send_snapshot_finalization(&self, _: &Hash, _: &Snapshot) {}
}

/// A registry row projected into consensus form, with its network-scoped id.
#[derive(Clone, Debug)]
pub struct CNode {
    pub id_for_network: Hash,
    pub signer: Address,
    pub payee: Address,
    pub transaction: Hash,
    pub timestamp: u64,
    pub state: NodeState,
}

#[derive(Default)]
pub(crate) struct Registry {
    pub all_sorted: Vec<CNode>,
    pub consensus: HashMap<Hash, CNode>,
    pub sorted_consensus: Vec<Hash>,
    pub pledging: Option<CNode>,
}

pub struct Node {
    pub id_for_network: Hash,
    pub signer: Address,
    pub listener: String,
    pub epoch: u64,
    pub network_id: Hash,
    pub custom: Custom,
    pub store: Arc<dyn Store>,
    pub gossip: Arc<dyn Gossip>,

    genesis_nodes: Vec<Hash>,
    genesis_set: HashSet<Hash>,
    pub(crate) registry: RwLock<Registry>,
    chains: RwLock<HashMap<Hash, Arc<Chain>>>,
    graph_timestamp: AtomicU64,
    sync_points: RwLock<HashMap<Hash, SyncPoint>>,
    pub(crate) verify_cache: Mutex<LruCache<Vec<u8>, bool>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
    started_at: std::time::Instant,
}

impl Node {
    pub fn setup(
        custom: Custom,
        store: Arc<dyn Store>,
        gossip: Arc<dyn Gossip>,
        genesis: &Genesis,
        listener: String,
    ) -> Result<Arc<Self>, Error> {
        let signer_key = Key::from_hex(&custom.node.signer_key)?;
        let private_spend = signer_key.as_private()?;
        let public_spend = private_spend.public();
        let private_view = public_spend.deterministic_hash_derive();
        let signer = Address {
            public_view: private_view.public(),
            private_view: Some(private_view),
            private_spend: Some(private_spend),
            public_spend,
        };

        let load = genesis.build()?;
        store.load_genesis(&load)?;
        let network_id = load.network_id;

        info!("validating graph entries...");
        let (total, invalid) = store.validate_graph_entries(&network_id, 10)?;
        if invalid > 0 {
            return Err(Error::Store(format!(
                "validate graph with {}/{} invalid entries",
                invalid, total
            )));
        }
        info!(total, "graph entries validated");

        let genesis_nodes: Vec<Hash> = genesis
            .nodes
            .iter()
            .map(|n| n.signer.id_for_network(&network_id))
            .collect();
        let genesis_set = genesis_nodes.iter().copied().collect();

        let cache_entries = custom.node.memory_cache_size.max(1) * 1024;
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let node = Arc::new(Self {
            id_for_network: signer.id_for_network(&network_id),
            signer,
            listener,
            epoch: genesis.epoch_ns(),
            network_id,
            custom,
            store,
            gossip,
            genesis_nodes,
            genesis_set,
            registry: RwLock::new(Registry::default()),
            chains: RwLock::new(HashMap::new()),
            graph_timestamp: AtomicU64::new(0),
            sync_points: RwLock::new(HashMap::new()),
            verify_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(cache_entries).expect("non-zero cache size"),
            )),
            shutdown_tx,
            shutdown_rx,
            started_at: std::time::Instant::now(),
        });
        node.load_consensus_nodes()?;

        info!(signer = %node.signer, "signer");
        info!(network = %node.network_id, node = %node.id_for_network, "identity");
        info!(topology = node.store.topology_sequence(), "topology");
        Ok(node)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) fn shutdown_signal(&self) -> tokio::sync::watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn is_genesis_node(&self, id: &Hash) -> bool {
        self.genesis_set.contains(id)
    }

    pub fn genesis_node_count(&self) -> usize {
        self.genesis_nodes.len()
    }

    pub fn graph_timestamp(&self) -> u64 {
        self.graph_timestamp.load(Ordering::SeqCst)
    }

    pub(crate) fn advance_graph_timestamp(&self, end: u64) {
        self.graph_timestamp.fetch_max(end, Ordering::SeqCst);
    }

    // ── Registry ────────────────────────────────────────────────────────────

    /// All registry rows in canonical order: timestamp ascending, then
    /// network id ascending by hex.
    pub fn sort_all_nodes_by_timestamp_and_id(&self) -> Result<Vec<CNode>, Error> {
        let mut nodes: Vec<CNode> = self
            .store
            .read_all_nodes()?
            .into_iter()
            .map(|n| {
                let timestamp = if n.timestamp == 0 { self.epoch } else { n.timestamp };
                CNode {
                    id_for_network: n.id_for_network(&self.network_id),
                    signer: n.signer,
                    payee: n.payee,
                    transaction: n.transaction,
                    timestamp,
                    state: n.state,
                }
            })
            .collect();
        nodes.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id_for_network.to_hex().cmp(&b.id_for_network.to_hex()))
        });
        Ok(nodes)
    }

    /// Refresh the in-memory registry projection from the store.
    pub fn load_consensus_nodes(&self) -> Result<(), Error> {
        let all_sorted = self.sort_all_nodes_by_timestamp_and_id()?;
        let mut consensus = HashMap::new();
        let mut sorted_consensus = Vec::new();
        let mut pledging = None;
        for cn in &all_sorted {
            match cn.state {
                NodeState::Pledging => pledging = Some(cn.clone()),
                NodeState::Accepted => {
                    consensus.insert(cn.id_for_network, cn.clone());
                    sorted_consensus.push(cn.id_for_network);
                }
                _ => {}
            }
        }
        let mut registry = self.registry.write();
        registry.all_sorted = all_sorted;
        registry.consensus = consensus;
        registry.sorted_consensus = sorted_consensus;
        registry.pledging = pledging;
        Ok(())
    }

    pub fn consensus_nodes(&self) -> Vec<CNode> {
        self.registry.read().consensus.values().cloned().collect()
    }

    pub fn consensus_pledging(&self) -> Option<CNode> {
        self.registry.read().pledging.clone()
    }

    /// Committee ids in canonical registry order.
    pub fn sorted_consensus_nodes(&self) -> Vec<Hash> {
        self.registry.read().sorted_consensus.clone()
    }

    pub fn all_nodes_sorted(&self) -> Vec<CNode> {
        self.registry.read().all_sorted.clone()
    }

    pub(crate) fn peer_consensus_node(&self, peer_id: &Hash) -> Option<CNode> {
        self.registry.read().consensus.get(peer_id).cloned()
    }

    /// Signer spend keys of the committee at `timestamp`: accepted nodes
    /// past the acceptance maturation period, genesis nodes exempt.
    pub fn consensus_keys(&self, timestamp: u64) -> Vec<PublicKey> {
        let timestamp = if timestamp == 0 { clock::now_ns() } else { timestamp };
        self.registry
            .read()
            .all_sorted
            .iter()
            .filter(|cn| cn.state == NodeState::Accepted)
            .filter(|cn| {
                self.genesis_set.contains(&cn.id_for_network)
                    || cn.timestamp + KERNEL_NODE_ACCEPT_PERIOD_MINIMUM < timestamp
            })
            .map(|cn| cn.signer.public_spend)
            .collect()
    }

    pub fn consensus_threshold(&self, timestamp: u64) -> usize {
        let timestamp = if timestamp == 0 { clock::now_ns() } else { timestamp };
        let mut base = 0usize;
        for cn in self.registry.read().all_sorted.iter() {
            let mut threshold = SNAPSHOT_REFERENCE_THRESHOLD * SNAPSHOT_ROUND_GAP;
            if threshold > 3 * 60 * 1_000_000_000 {
                panic!("should never be here");
            }
            match cn.state {
                NodeState::Pledging => {
                    // FIXME the pledge transaction may be broadcasted very late
                    // at this situation, the node should be treated as evil
                    if KERNEL_NODE_ACCEPT_PERIOD_MINIMUM < 3_600_000_000_000 {
                        panic!("should never be here");
                    }
                    threshold = KERNEL_NODE_ACCEPT_PERIOD_MINIMUM - threshold * 3;
                    if cn.timestamp + threshold < timestamp {
                        base += 1;
                    }
                }
                NodeState::Accepted => {
                    if self.genesis_set.contains(&cn.id_for_network)
                        || cn.timestamp + threshold < timestamp
                    {
                        base += 1;
                    }
                }
                NodeState::Resigning => base += 1,
                _ => {}
            }
        }
        if base < self.genesis_nodes.len() {
            warn!(timestamp, base, genesis = self.genesis_nodes.len(), "invalid consensus base");
            return 1000;
        }
        base * 2 / 3 + 1
    }

    /// At most one node removed within the acceptance period around
    /// `timestamp`; its key repairs finalization proofs that straddle the
    /// removal.
    pub fn consensus_removed_recently(&self, timestamp: u64) -> Option<CNode> {
        // FIXME should use all nodes state list, without this hack
        let threshold = KERNEL_NODE_ACCEPT_PERIOD_MINIMUM;
        if timestamp <= threshold {
            return None;
        }
        let begin = timestamp - threshold;
        let end = timestamp + threshold;
        for cn in self.registry.read().all_sorted.iter() {
            if cn.timestamp > end {
                break;
            }
            if cn.state != NodeState::Removed {
                continue;
            }
            if cn.timestamp > begin {
                return Some(cn.clone());
            }
        }
        None
    }

    // ── Chains ──────────────────────────────────────────────────────────────

    pub fn get_or_create_chain(self: &Arc<Self>, chain_id: Hash) -> Result<Arc<Chain>, Error> {
        if let Some(chain) = self.chains.read().get(&chain_id) {
            return Ok(chain.clone());
        }
        let mut chains = self.chains.write();
        if let Some(chain) = chains.get(&chain_id) {
            return Ok(chain.clone());
        }
        let state = self.load_chain_state(&chain_id)?;
        let (chain, receiver) = Chain::new(chain_id, state);
        let chain = Arc::new(chain);
        chains.insert(chain_id, chain.clone());
        tokio::spawn(chain_loop(
            self.clone(),
            chain.clone(),
            receiver,
            self.shutdown_signal(),
        ));
        Ok(chain)
    }

    fn load_chain_state(&self, chain_id: &Hash) -> Result<ChainState, Error> {
        let head = match self.store.read_round_head(chain_id)? {
            Some(head) => head,
            None => return Ok(ChainState::default()),
        };
        let snapshots = self
            .store
            .read_snapshots_for_node_round(chain_id, head.number)?
            .into_iter()
            .map(|s| s.snapshot)
            .collect::<Vec<_>>();
        let cache = crate::graph::CacheRound {
            node_id: *chain_id,
            number: head.number,
            timestamp: head.timestamp,
            references: head.references.clone(),
            snapshots,
        };
        let final_round = if head.number == 0 {
            None
        } else {
            let references = head
                .references
                .as_ref()
                .ok_or_else(|| Error::Store(format!("head round {} without references", head.number)))?;
            let round = self.store.read_round(&references.self_hash)?.ok_or_else(|| {
                Error::Store(format!("final round {} missing", references.self_hash))
            })?;
            Some(FinalRound {
                node_id: *chain_id,
                number: head.number - 1,
                start: round.timestamp,
                end: round.timestamp,
                hash: references.self_hash,
            })
        };
        let round_history = final_round.iter().cloned().collect();
        Ok(ChainState {
            cache_round: Some(cache),
            final_round,
            round_links: HashMap::new(),
            round_history,
        })
    }

    /// Tip round number of a peer chain, from memory or the store. Peer
    /// chain state is read without blocking: their actor owns the lock, so
    /// a contended read falls through to the store.
    pub(crate) fn chain_final_number(&self, chain_id: &Hash) -> Result<Option<u64>, Error> {
        if let Some(chain) = self.chains.read().get(chain_id) {
            if let Some(state) = chain.state.try_read() {
                if let Some(f) = &state.final_round {
                    return Ok(Some(f.number));
                }
            }
        }
        Ok(self
            .store
            .read_round_head(chain_id)?
            .map(|h| h.number.saturating_sub(1)))
    }

    /// The latest referencable round of a peer chain that started before
    /// `round_time`.
    pub(crate) fn chain_best_round(
        &self,
        chain_id: &Hash,
        round_time: u64,
    ) -> Result<Option<FinalRound>, Error> {
        if let Some(chain) = self.chains.read().get(chain_id) {
            if let Some(state) = chain.state.try_read() {
                for r in state.round_history.iter().rev() {
                    if r.start < round_time {
                        return Ok(Some(r.clone()));
                    }
                }
            }
        }
        Ok(None)
    }

    /// (start, hash) of every peer chain's tip round older than
    /// `round_time`.
    pub(crate) fn chain_tips(&self, round_time: u64) -> Option<Vec<(u64, Hash)>> {
        let chains = self.chains.read();
        let mut out = Vec::new();
        for chain in chains.values() {
            if chain.chain_id == self.id_for_network {
                continue;
            }
            if let Some(state) = chain.state.try_read() {
                if let Some(f) = &state.final_round {
                    if f.start < round_time {
                        out.push((f.start, f.hash));
                    }
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    pub fn append_cosi_action(self: &Arc<Self>, action: CosiAction) -> Result<(), Error> {
        let chain = self.get_or_create_chain(action.snapshot.node_id)?;
        chain.queue_action(action)
    }

    /// Queue a locally-built transaction for consensus on our own chain.
    pub fn append_self_empty(self: &Arc<Self>, transaction: Hash) -> Result<(), Error> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            node_id: self.id_for_network,
            transaction,
            references: None,
            round_number: 0,
            timestamp: 0,
            signatures: Vec::new(),
            signature: None,
        };
        self.append_cosi_action(CosiAction {
            peer_id: self.id_for_network,
            kind: CosiActionKind::SelfEmpty,
            snapshot,
            signature: None,
            transaction: None,
            retries: 0,
        })
    }

    /// Validate, pool and announce a transaction submitted to this node.
    pub fn queue_transaction(self: &Arc<Self>, tx: &VersionedTransaction) -> Result<Hash, Error> {
        tx.validate(self.store.as_ref())?;
        self.store.cache_put_transaction(tx)?;
        let hash = tx.payload_hash();
        self.append_self_empty(hash)?;
        Ok(hash)
    }

    // ── Sync points ─────────────────────────────────────────────────────────

    /// One tip summary per chain with state, for peer comparison.
    pub fn build_graph(&self) -> Vec<SyncPoint> {
        let chains = self.chains.read();
        let mut points = Vec::new();
        for chain in chains.values() {
            let state = chain.state.read();
            if state.cache_round.is_none() {
                continue;
            }
            if let Some(f) = &state.final_round {
                points.push(SyncPoint {
                    node_id: chain.chain_id,
                    hash: f.hash,
                    number: f.number,
                });
            }
        }
        points
    }

    pub fn update_sync_point(&self, peer_id: Hash, points: &[SyncPoint]) {
        for p in points {
            if p.node_id == self.id_for_network {
                self.sync_points.write().insert(peer_id, *p);
            }
        }
    }

    /// Whether our chain is caught up with what the committee reports:
    /// nobody is more than one round ahead, and a peer at our next round
    /// agrees on the hash our open round would seal to.
    pub fn check_catch_up_with_peers(self: &Arc<Self>) -> bool {
        let threshold = self.consensus_threshold(0);
        let chain = match self.get_or_create_chain(self.id_for_network) {
            Ok(chain) => chain,
            Err(_) => return false,
        };
        let state = chain.state.read();
        let final_number = state.final_round.as_ref().map(|f| f.number).unwrap_or(0);

        let mut updated = 1usize;
        let sync_points = self.sync_points.read();
        for id in self.registry.read().consensus.keys() {
            let remote = match sync_points.get(id) {
                Some(remote) => remote,
                None => continue,
            };
            updated += 1;
            if remote.number <= final_number {
                continue;
            }
            if remote.number > final_number + 1 {
                warn!(local = final_number, remote = remote.number, "peer far ahead");
                return false;
            }
            let cache = match &state.cache_round {
                Some(cache) => cache,
                None => return false,
            };
            let sealed = match cache.as_final() {
                Some(sealed) => sealed,
                None => return false,
            };
            if sealed.hash != remote.hash {
                return false;
            }
            if sealed.start + SNAPSHOT_ROUND_GAP * 100 > clock::now_ns() {
                return false;
            }
        }
        updated >= threshold
    }

    /// Whether enough peers have acknowledged our tip.
    pub fn check_broadcasted_to_peers(self: &Arc<Self>) -> bool {
        let threshold = self.consensus_threshold(0);
        let final_number = self
            .get_or_create_chain(self.id_for_network)
            .ok()
            .and_then(|c| c.state.read().final_round.as_ref().map(|f| f.number))
            .unwrap_or(0);
        let mut count = 1usize;
        let sync_points = self.sync_points.read();
        for id in self.registry.read().consensus.keys() {
            if let Some(remote) = sync_points.get(id) {
                if remote.number + 1 >= final_number {
                    count += 1;
                }
            }
        }
        count >= threshold
    }

    // ── Peer authentication ─────────────────────────────────────────────────

    /// `8-byte BE unix seconds || public spend key || signature || listener`.
    pub fn build_authentication_message(&self) -> Vec<u8> {
        let mut data = clock::now_unix().to_be_bytes().to_vec();
        data.extend_from_slice(&self.signer.public_spend.key().0);
        let signature = self
            .signer
            .private_spend
            .as_ref()
            .expect("local signer holds its private spend key")
            .sign(&data);
        data.extend_from_slice(&signature.0);
        data.extend_from_slice(self.listener.as_bytes());
        data
    }

    pub fn authenticate(&self, msg: &[u8]) -> Result<(Hash, String), Error> {
        if msg.len() < 8 + KEY_SIZE + 64 {
            return Err(Error::Consensus(format!(
                "peer authentication message malformed {}",
                msg.len()
            )));
        }
        let ts = u64::from_be_bytes(msg[..8].try_into().expect("8 bytes"));
        let now = clock::now_unix();
        if now.saturating_sub(ts) > 3 || ts.saturating_sub(now) > 3 {
            return Err(Error::Consensus(format!(
                "peer authentication message timeout {} {}",
                ts, now
            )));
        }

        let mut raw = [0u8; KEY_SIZE];
        raw.copy_from_slice(&msg[8..8 + KEY_SIZE]);
        let signer = Address::from_public_spend(Key(raw).as_public()?);
        let peer_id = signer.id_for_network(&self.network_id);
        if peer_id == self.id_for_network {
            return Err(Error::Consensus(format!(
                "peer authentication invalid consensus peer {}",
                peer_id
            )));
        }
        let peer = self.peer_consensus_node(&peer_id);
        if self.custom.node.consensus_only && peer.is_none() {
            return Err(Error::Consensus(format!(
                "peer authentication invalid consensus peer {}",
                peer_id
            )));
        }
        if let Some(peer) = peer {
            if peer.signer.hash() != signer.hash() {
                return Err(Error::Consensus(format!(
                    "peer authentication invalid consensus peer {}",
                    peer_id
                )));
            }
        }

        let mut sig = [0u8; 64];
        sig.copy_from_slice(&msg[8 + KEY_SIZE..8 + KEY_SIZE + 64]);
        if !signer
            .public_spend
            .verify(&msg[..8 + KEY_SIZE], &Signature(sig))
        {
            return Err(Error::Consensus(format!(
                "peer authentication message signature invalid {}",
                peer_id
            )));
        }

        let listener = String::from_utf8_lossy(&msg[8 + KEY_SIZE + 64..]).to_string();
        Ok((peer_id, listener))
    }
}

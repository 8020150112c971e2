use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xin_core::{
    Error, RoundLink, Snapshot, TransactionKind, VersionedTransaction, SNAPSHOT_VERSION,
};
use xin_crypto::{CosiSignature, Hash, Signature};

use crate::clock;
use crate::config::SNAPSHOT_ROUND_GAP;
use crate::graph::{CacheRound, ChainState};
use crate::node::Node;

const CHAIN_QUEUE_DEPTH: usize = 8192;
const FINALIZATION_RETRIES: u8 = 5;

/// Message kinds processed by a chain's actor, in arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CosiActionKind {
    Announce,
    Commit,
    Challenge,
    Response,
    Finalization,
    SelfEmpty,
}

#[derive(Clone, Debug)]
pub struct CosiAction {
    pub peer_id: Hash,
    pub kind: CosiActionKind,
    pub snapshot: Snapshot,
    pub signature: Option<Signature>,
    pub transaction: Option<VersionedTransaction>,
    pub retries: u8,
}

/// Signature collection for a snapshot this node is announcing.
pub struct CosiAggregator {
    pub snapshot: Snapshot,
    pub responses: HashMap<usize, Signature>,
}

/// One consensus chain per node id. The spawned actor task is the only
/// mutator of `state`; other tasks take read snapshots.
pub struct Chain {
    pub chain_id: Hash,
    pub state: RwLock<ChainState>,
    pub aggregators: Mutex<HashMap<Hash, CosiAggregator>>,
    sender: mpsc::Sender<CosiAction>,
}

impl Chain {
    pub(crate) fn new(chain_id: Hash, state: ChainState) -> (Self, mpsc::Receiver<CosiAction>) {
        let (sender, receiver) = mpsc::channel(CHAIN_QUEUE_DEPTH);
        (
            Self {
                chain_id,
                state: RwLock::new(state),
                aggregators: Mutex::new(HashMap::new()),
                sender,
            },
            receiver,
        )
    }

    pub fn queue_action(&self, action: CosiAction) -> Result<(), Error> {
        self.sender
            .try_send(action)
            .map_err(|e| Error::ChainState(format!("chain {} inbox: {}", self.chain_id, e)))
    }
}

pub(crate) async fn chain_loop(
    node: Arc<Node>,
    chain: Arc<Chain>,
    mut receiver: mpsc::Receiver<CosiAction>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            action = receiver.recv() => {
                let Some(action) = action else { break };
                let kind = action.kind;
                if let Err(err) = node.dispatch_cosi_action(&chain, action) {
                    debug!(chain = %chain.chain_id, ?kind, %err, "cosi action dropped");
                }
            }
        }
    }
    info!(chain = %chain.chain_id, "chain loop stopped");
}

impl Node {
    fn dispatch_cosi_action(self: &Arc<Self>, chain: &Arc<Chain>, action: CosiAction) -> Result<(), Error> {
        match action.kind {
            CosiActionKind::SelfEmpty => self.handle_self_empty(chain, action),
            // Under the concatenated-signature scheme the four-phase
            // exchange collapses onto one proposal/signature pair.
            CosiActionKind::Announce | CosiActionKind::Challenge => {
                self.handle_announce(chain, action)
            }
            CosiActionKind::Commit | CosiActionKind::Response => self.handle_commit(chain, action),
            CosiActionKind::Finalization => self.handle_finalization(chain, action),
        }
    }

    /// A locally-built transaction enters consensus: assign it a slot in
    /// our current round (or open the next), sign, and announce.
    fn handle_self_empty(self: &Arc<Self>, chain: &Arc<Chain>, action: CosiAction) -> Result<(), Error> {
        if chain.chain_id != self.id_for_network || action.snapshot.node_id != self.id_for_network {
            panic!("should never be here");
        }
        let tx = match self.store.cache_get_transaction(&action.snapshot.transaction)? {
            Some(tx) => tx,
            None => self
                .store
                .read_transaction(&action.snapshot.transaction)?
                .map(|(tx, _)| tx)
                .ok_or_else(|| {
                    Error::ChainState(format!(
                        "transaction {} not collected yet",
                        action.snapshot.transaction
                    ))
                })?,
        };

        let mut s = action.snapshot;
        s.version = SNAPSHOT_VERSION;
        s.timestamp = clock::now_ns().max(self.graph_timestamp() + 1);
        {
            let state = chain.state.read();
            let cache = state
                .cache_round
                .as_ref()
                .ok_or_else(|| Error::ChainState("chain not bootstrapped".into()))?;
            match cache.snapshots.first() {
                Some(first) if s.timestamp >= first.timestamp + SNAPSHOT_ROUND_GAP => {
                    let final_round = cache.as_final().expect("non-empty round seals");
                    let external = self.best_external_reference(&state, s.timestamp);
                    s.round_number = cache.number + 1;
                    s.references = Some(RoundLink {
                        self_hash: final_round.hash,
                        external,
                    });
                }
                _ => {
                    s.round_number = cache.number;
                    s.references = cache.references.clone();
                }
            }
        }

        let mut publics = self.consensus_keys(s.timestamp);
        if self.check_initial_accept_snapshot(&s, &tx) {
            if let Some(pledging) = self.consensus_pledging() {
                publics.push(pledging.signer.public_spend);
            }
        }
        let our_key = self.signer.public_spend.key();
        let index = publics
            .iter()
            .position(|p| p.key() == our_key)
            .ok_or_else(|| Error::Consensus("node not in the committee".into()))?;
        let payload = s.payload_hash();
        let signature = self
            .signer
            .private_spend
            .as_ref()
            .expect("local signer holds its private spend key")
            .sign(&payload.0);

        let threshold = self.consensus_threshold(s.timestamp);
        let mut responses = HashMap::new();
        responses.insert(index, signature);
        if responses.len() >= threshold {
            let snapshot = attach_aggregate(s, responses)?;
            self.broadcast_finalization(&snapshot);
            return self.handle_finalization(
                chain,
                CosiAction {
                    peer_id: self.id_for_network,
                    kind: CosiActionKind::Finalization,
                    snapshot,
                    signature: None,
                    transaction: Some(tx),
                    retries: 0,
                },
            );
        }

        chain.aggregators.lock().insert(
            payload,
            CosiAggregator {
                snapshot: s.clone(),
                responses,
            },
        );
        for cn in self.consensus_nodes() {
            if cn.id_for_network != self.id_for_network {
                self.gossip
                    .send_snapshot_announcement(&cn.id_for_network, &s, &tx);
            }
        }
        Ok(())
    }

    /// A peer proposes a snapshot on its own chain: pool the transaction
    /// and reply with our signature over the payload.
    fn handle_announce(self: &Arc<Self>, chain: &Arc<Chain>, action: CosiAction) -> Result<(), Error> {
        let s = &action.snapshot;
        if s.node_id != chain.chain_id {
            panic!("should never be here");
        }
        if s.version != SNAPSHOT_VERSION {
            return Err(Error::ChainState(format!("invalid snapshot version {}", s.version)));
        }
        let tx = action
            .transaction
            .as_ref()
            .ok_or_else(|| Error::ChainState("announcement without transaction".into()))?;
        if tx.payload_hash() != s.transaction {
            return Err(Error::ChainState(format!(
                "announcement transaction mismatch {} {}",
                tx.payload_hash(),
                s.transaction
            )));
        }
        if self.store.read_transaction(&s.transaction)?.is_none() {
            tx.validate(self.store.as_ref())?;
            self.store.cache_put_transaction(tx)?;
        }

        let payload = s.payload_hash();
        let signature = self
            .signer
            .private_spend
            .as_ref()
            .expect("local signer holds its private spend key")
            .sign(&payload.0);
        self.gossip
            .send_snapshot_commit(&action.peer_id, s, &signature);
        Ok(())
    }

    /// A committee member returns its signature for a snapshot we
    /// announced; at threshold the aggregate finalizes.
    fn handle_commit(self: &Arc<Self>, chain: &Arc<Chain>, action: CosiAction) -> Result<(), Error> {
        let s = &action.snapshot;
        let signature = action
            .signature
            .ok_or_else(|| Error::Consensus("commit without signature".into()))?;
        let payload = s.payload_hash();

        let mut aggregators = chain.aggregators.lock();
        let aggregator = aggregators
            .get_mut(&payload)
            .ok_or_else(|| Error::Consensus(format!("no aggregator for {}", payload)))?;
        let peer = self
            .peer_consensus_node(&action.peer_id)
            .ok_or_else(|| Error::Consensus(format!("unknown signer {}", action.peer_id)))?;

        let mut publics = self.consensus_keys(aggregator.snapshot.timestamp);
        if self.check_initial_accept_snapshot_weak(&aggregator.snapshot) {
            if let Some(pledging) = self.consensus_pledging() {
                publics.push(pledging.signer.public_spend);
            }
        }
        let index = publics
            .iter()
            .position(|p| p.key() == peer.signer.public_spend.key())
            .ok_or_else(|| Error::Consensus(format!("unknown signer {}", action.peer_id)))?;
        if aggregator.responses.contains_key(&index) {
            return Err(Error::Consensus(format!("duplicate signer {}", action.peer_id)));
        }
        if !peer.signer.public_spend.verify(&payload.0, &signature) {
            return Err(Error::Consensus(format!(
                "invalid commit signature from {}",
                action.peer_id
            )));
        }
        aggregator.responses.insert(index, signature);

        let threshold = self.consensus_threshold(aggregator.snapshot.timestamp);
        if aggregator.responses.len() < threshold {
            return Ok(());
        }
        let aggregator = aggregators.remove(&payload).expect("aggregator present");
        drop(aggregators);

        let snapshot = attach_aggregate(aggregator.snapshot, aggregator.responses)?;
        self.broadcast_finalization(&snapshot);
        self.handle_finalization(
            chain,
            CosiAction {
                peer_id: self.id_for_network,
                kind: CosiActionKind::Finalization,
                snapshot,
                signature: None,
                transaction: None,
                retries: 0,
            },
        )
    }

    /// A finalized snapshot lands on its chain: verify the aggregate,
    /// validate the transaction, and advance the round graph.
    pub(crate) fn handle_finalization(
        self: &Arc<Self>,
        chain: &Arc<Chain>,
        action: CosiAction,
    ) -> Result<(), Error> {
        let s = action.snapshot.clone();
        if s.node_id != chain.chain_id {
            panic!("should never be here");
        }
        if self.store.read_snapshot(&s.payload_hash())?.is_some() {
            return Ok(());
        }
        if !self.verify_finalization(&s) {
            return Err(Error::Consensus(format!(
                "finalization threshold not met {}",
                s.payload_hash()
            )));
        }

        match self.store.read_transaction(&s.transaction)? {
            Some((tx, state)) => {
                if state.is_empty() {
                    self.validate_for_snapshot(&s, &tx)?;
                }
            }
            None => {
                let tx = match self.store.cache_get_transaction(&s.transaction)? {
                    Some(tx) => tx,
                    None => match &action.transaction {
                        Some(tx) => tx.clone(),
                        None => {
                            let err = Error::ChainState(format!(
                                "transaction {} not collected yet",
                                s.transaction
                            ));
                            return self.requeue_or_drop(chain, action, err);
                        }
                    },
                };
                self.validate_for_snapshot(&s, &tx)?;
                self.store.cache_put_transaction(&tx)?;
            }
        }

        chain.aggregators.lock().remove(&s.payload_hash());

        let mut state = chain.state.write();
        let cache = state.cache_round.clone();
        match cache {
            None => {
                if s.round_number != 0 {
                    return Err(Error::ChainState(format!(
                        "round {} arrived on an empty chain",
                        s.round_number
                    )));
                }
                let mut cache = CacheRound::new(s.node_id, 0, s.timestamp, s.references.clone());
                cache.add_snapshot(s.clone())?;
                self.store.write_snapshot(&s)?;
                state.cache_round = Some(cache);
                Ok(())
            }
            Some(mut cache) if s.round_number == cache.number => {
                if cache.snapshots.is_empty() && s.references != cache.references {
                    if !self.update_empty_head_round(&mut state, &cache, &s)? {
                        return Err(Error::ChainState(
                            "head round references mismatch".into(),
                        ));
                    }
                    let references = s.references.clone().expect("resolved references");
                    self.store
                        .update_empty_head_round(&cache.node_id, cache.number, &references)?;
                    cache.references = Some(references);
                }
                cache.add_snapshot(s.clone())?;
                self.store.write_snapshot(&s)?;
                state.cache_round = Some(cache);
                Ok(())
            }
            Some(cache) if s.round_number == cache.number + 1 => {
                let (final_round, dummy) = self.start_new_round(&mut state, &s, &cache, true)?;
                if dummy {
                    debug!(chain = %chain.chain_id, round = s.round_number, "dummy round advance");
                }
                let references = s.references.clone().expect("validated references");
                self.store.start_new_round(
                    &s.node_id,
                    s.round_number,
                    &references,
                    final_round.start,
                    &final_round.hash,
                )?;
                let mut new_cache =
                    CacheRound::new(s.node_id, s.round_number, s.timestamp, Some(references));
                new_cache.add_snapshot(s.clone())?;
                self.assign_new_graph_round(&mut state, final_round, new_cache);
                self.store.write_snapshot(&s)?;
                Ok(())
            }
            Some(cache) if s.round_number < cache.number => Err(Error::ChainState(format!(
                "stale snapshot round {} behind {}",
                s.round_number, cache.number
            ))),
            Some(cache) => {
                // We are behind; the sync layer catches the chain up.
                warn!(
                    chain = %chain.chain_id,
                    round = s.round_number,
                    local = cache.number,
                    "snapshot round ahead of local cache"
                );
                Err(Error::ChainState(format!(
                    "snapshot round {} ahead of {}",
                    s.round_number, cache.number
                )))
            }
        }
    }

    fn validate_for_snapshot(&self, s: &Snapshot, tx: &VersionedTransaction) -> Result<(), Error> {
        tx.validate(self.store.as_ref())?;
        match tx.transaction_type() {
            TransactionKind::Mint => self.validate_mint_snapshot(s, tx),
            TransactionKind::NodeRemove => self.validate_node_remove_snapshot(s, tx),
            _ => Ok(()),
        }
    }

    fn requeue_or_drop(&self, chain: &Chain, mut action: CosiAction, err: Error) -> Result<(), Error> {
        if err.is_retryable() && action.retries < FINALIZATION_RETRIES {
            action.retries += 1;
            chain.queue_action(action)?;
            return Ok(());
        }
        Err(err)
    }

    fn broadcast_finalization(&self, snapshot: &Snapshot) {
        for cn in self.consensus_nodes() {
            if cn.id_for_network != self.id_for_network {
                self.gossip
                    .send_snapshot_finalization(&cn.id_for_network, snapshot);
            }
        }
    }

    /// Pick an external reference for our next round: the freshest final
    /// round of any peer chain that started before `round_time`, falling
    /// back to the previous reference.
    fn best_external_reference(&self, state: &ChainState, round_time: u64) -> Hash {
        let mut best: Option<(u64, Hash)> = None;
        if let Some(points) = self.chain_tips(round_time) {
            for (start, hash) in points {
                if best.map(|(s, _)| start > s).unwrap_or(true) {
                    best = Some((start, hash));
                }
            }
        }
        if let Some((_, hash)) = best {
            return hash;
        }
        state
            .cache_round
            .as_ref()
            .and_then(|c| c.references.as_ref().map(|r| r.external))
            .unwrap_or_default()
    }
}

fn attach_aggregate(
    mut snapshot: Snapshot,
    responses: HashMap<usize, Signature>,
) -> Result<Snapshot, Error> {
    let mut indices: Vec<usize> = responses.keys().copied().collect();
    indices.sort_unstable();
    let mut cosi = CosiSignature::aggregate_commitments(&indices)?;
    for i in indices {
        cosi.aggregate_signature(i, &responses[&i])?;
    }
    snapshot.signature = Some(cosi);
    Ok(snapshot)
}

use std::collections::HashMap;

use tracing::{info, warn};
use xin_core::{Error, RoundLink, Snapshot};
use xin_crypto::Hash;

use crate::config::{
    SNAPSHOT_REFERENCE_THRESHOLD, SNAPSHOT_ROUND_GAP, SNAPSHOT_SYNC_ROUND_THRESHOLD,
};
use crate::node::Node;

/// The open round of a chain, accumulating snapshots until it finalizes.
#[derive(Clone, Debug)]
pub struct CacheRound {
    pub node_id: Hash,
    pub number: u64,
    pub timestamp: u64,
    pub references: Option<RoundLink>,
    pub snapshots: Vec<Snapshot>,
}

/// A sealed round. `hash` digests the finalization payload of its
/// snapshots in insertion order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalRound {
    pub node_id: Hash,
    pub number: u64,
    pub start: u64,
    pub end: u64,
    pub hash: Hash,
}

/// Per-chain consensus state, owned by the chain's single actor task.
#[derive(Clone, Debug, Default)]
pub struct ChainState {
    pub cache_round: Option<CacheRound>,
    pub final_round: Option<FinalRound>,
    /// Highest accepted external round number per peer; monotonic.
    pub round_links: HashMap<Hash, u64>,
    pub round_history: Vec<FinalRound>,
}

impl CacheRound {
    pub fn new(node_id: Hash, number: u64, timestamp: u64, references: Option<RoundLink>) -> Self {
        Self {
            node_id,
            number,
            timestamp,
            references,
            snapshots: Vec::new(),
        }
    }

    /// Whether `s` can join this round: same shape, and within the round
    /// gap of the round's first snapshot.
    pub fn validate_snapshot(&self, s: &Snapshot) -> bool {
        if s.node_id != self.node_id || s.round_number != self.number {
            return false;
        }
        if s.references != self.references && !self.snapshots.is_empty() {
            return false;
        }
        if let Some(first) = self.snapshots.first() {
            if s.timestamp < first.timestamp
                || s.timestamp >= first.timestamp + SNAPSHOT_ROUND_GAP
            {
                return false;
            }
        }
        !self
            .snapshots
            .iter()
            .any(|o| o.transaction == s.transaction || o.payload_hash() == s.payload_hash())
    }

    pub fn add_snapshot(&mut self, s: Snapshot) -> Result<(), Error> {
        if !self.validate_snapshot(&s) {
            return Err(Error::ChainState(format!(
                "snapshot rejected by round {}:{}",
                self.node_id, self.number
            )));
        }
        self.snapshots.push(s);
        Ok(())
    }

    /// Seal the accumulated snapshots. None while the round is empty.
    pub fn as_final(&self) -> Option<FinalRound> {
        let first = self.snapshots.first()?;
        let last = self.snapshots.last().expect("non-empty snapshots");
        let mut payload = Vec::new();
        for s in &self.snapshots {
            payload.extend_from_slice(&s.versioned_payload());
        }
        Some(FinalRound {
            node_id: self.node_id,
            number: self.number,
            start: first.timestamp,
            end: last.timestamp,
            hash: xin_crypto::new_hash(&payload),
        })
    }
}

impl Node {
    /// Decide whether snapshot `s` may open round `cache.number + 1`.
    ///
    /// On success the sealed previous round is returned; the `bool` marks a
    /// dummy advance, allowed when the external reference is unresolved but
    /// the snapshot itself is already finalized elsewhere.
    pub fn start_new_round(
        &self,
        state: &mut ChainState,
        s: &Snapshot,
        cache: &CacheRound,
        allow_dummy: bool,
    ) -> Result<(FinalRound, bool), Error> {
        if s.node_id != cache.node_id {
            panic!("should never be here");
        }
        if s.round_number != cache.number + 1 {
            panic!("should never be here");
        }
        let references = s
            .references
            .as_ref()
            .ok_or_else(|| Error::ChainState("snapshot without references".into()))?;
        let final_round = cache.as_final().ok_or_else(|| {
            Error::ChainState(format!(
                "self cache snapshots not collected yet {} {}",
                s.node_id, s.round_number
            ))
        })?;
        if references.self_hash != final_round.hash {
            return Err(Error::ChainState(format!(
                "self cache snapshots not match yet {} {}",
                s.node_id, references.self_hash
            )));
        }

        let finalized = self.verify_finalization(s);
        let external = self.store.read_round(&references.external)?;
        let external = match external {
            None if finalized && allow_dummy => return Ok((final_round, true)),
            None => {
                return Err(Error::ChainState(format!(
                    "external round {} not collected yet",
                    references.external
                )));
            }
            Some(r) => r,
        };

        if final_round.node_id == external.node_id {
            return Err(Error::ChainState(format!(
                "self reference forbidden {}",
                references.external
            )));
        }
        if !self.is_genesis_node(&external.node_id)
            && external.number < 7 + SNAPSHOT_REFERENCE_THRESHOLD
        {
            return Err(Error::ChainState(format!(
                "external reference {} too young {}",
                references.external, external.number
            )));
        }
        if !finalized {
            if let Some(tip) = self.chain_final_number(&external.node_id)? {
                if external.number + SNAPSHOT_SYNC_ROUND_THRESHOLD < tip {
                    return Err(Error::ChainState(format!(
                        "external reference {} too early {} {}",
                        references.external, external.number, tip
                    )));
                }
            }
            if external.timestamp > s.timestamp {
                return Err(Error::ChainState(format!(
                    "external reference later than snapshot time {} {}",
                    external.timestamp, s.timestamp
                )));
            }
            let threshold =
                external.timestamp + SNAPSHOT_REFERENCE_THRESHOLD * SNAPSHOT_ROUND_GAP * 64;
            if let Some(best) = self.chain_best_round(&external.node_id, s.timestamp)? {
                if threshold < best.start {
                    return Err(Error::ChainState(format!(
                        "external reference {} too stale {}:{}",
                        references.external, best.node_id, best.number
                    )));
                }
            }
        }

        let link = match state.round_links.get(&external.node_id) {
            Some(link) => *link,
            None => {
                let stored = self.store.read_link(&s.node_id, &external.node_id)?;
                state.round_links.insert(external.node_id, stored);
                stored
            }
        };
        if external.number < link {
            return Err(Error::ChainState(format!(
                "external reference {} link regression {} {}",
                references.external, external.number, link
            )));
        }
        let stored = self.store.read_link(&s.node_id, &external.node_id)?;
        if stored != link {
            panic!("should never be here {}=>{} {} {}", s.node_id, external.node_id, stored, link);
        }
        state.round_links.insert(external.node_id, external.number);

        Ok((final_round, false))
    }

    /// Replace an empty head round's references once the external round is
    /// resolvable. The round number stays put.
    pub fn update_empty_head_round(
        &self,
        state: &mut ChainState,
        cache: &CacheRound,
        s: &Snapshot,
    ) -> Result<bool, Error> {
        if !cache.snapshots.is_empty() {
            warn!(
                node = %s.node_id,
                count = cache.snapshots.len(),
                "malformed head round references, round not empty"
            );
            return Ok(false);
        }
        let references = match &s.references {
            Some(r) => r,
            None => return Ok(false),
        };
        let cache_self = cache.references.as_ref().map(|r| r.self_hash);
        if Some(references.self_hash) != cache_self {
            warn!(node = %s.node_id, "malformed head round references, self diff");
            return Ok(false);
        }
        let external = match self.store.read_round(&references.external)? {
            Some(r) => r,
            None => {
                warn!(node = %s.node_id, "head round external reference not ready yet");
                return Ok(false);
            }
        };
        let link = self.store.read_link(&cache.node_id, &external.node_id)?;
        if external.number < link {
            return Ok(false);
        }
        state.round_links.insert(external.node_id, external.number);
        Ok(true)
    }

    /// Install the sealed round and the fresh cache as the chain's state,
    /// advancing the graph timestamp and trimming the reference history.
    pub fn assign_new_graph_round(
        &self,
        state: &mut ChainState,
        final_round: FinalRound,
        cache: CacheRound,
    ) {
        if final_round.number + 1 != cache.number {
            panic!("should never be here");
        }
        if final_round.node_id != cache.node_id {
            panic!("should never be here {} {}", final_round.node_id, cache.node_id);
        }

        state.cache_round = Some(cache);
        state.final_round = Some(final_round.clone());
        self.advance_graph_timestamp(final_round.end);

        if state.round_history.is_empty() {
            if final_round.number != 0 {
                panic!("should never be here {} {}", final_round.node_id, final_round.number);
            }
            info!(node = %final_round.node_id, "assign the first round");
        } else {
            let n = state.round_history.last().expect("non-empty history").number;
            if n == final_round.number {
                return;
            }
            if n + 1 != final_round.number {
                panic!("should never be here {} {} {}", final_round.node_id, final_round.number, n);
            }
        }

        let mut rounds = std::mem::take(&mut state.round_history);
        rounds.push(final_round.clone());

        let threshold = SNAPSHOT_REFERENCE_THRESHOLD * SNAPSHOT_ROUND_GAP * 64;
        if rounds[0].start + threshold > final_round.start
            && rounds.len() <= SNAPSHOT_REFERENCE_THRESHOLD as usize
        {
            state.round_history = rounds;
            return;
        }
        let mut kept: Vec<FinalRound> = rounds
            .into_iter()
            .filter(|r| r.start + threshold > final_round.start)
            .collect();
        if kept.len() > SNAPSHOT_REFERENCE_THRESHOLD as usize {
            let cut = kept.len() - SNAPSHOT_REFERENCE_THRESHOLD as usize;
            kept.drain(..cut);
        }
        state.round_history = kept;
    }
}

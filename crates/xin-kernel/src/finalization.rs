use tracing::debug;
use xin_core::{Snapshot, TransactionKind, VersionedTransaction, SNAPSHOT_VERSION};
use xin_crypto::{CosiSignature, Hash, PublicKey, Signature};

use crate::node::Node;

impl Node {
    /// Whether snapshot `s` carries a valid finalization proof: a legacy
    /// signature list of threshold size, or an aggregate over the committee
    /// key set at the snapshot's timestamp.
    pub fn verify_finalization(&self, s: &Snapshot) -> bool {
        if s.version == 0 {
            return self.legacy_verify_finalization(s.timestamp, &s.signatures);
        }
        if s.version != SNAPSHOT_VERSION {
            return false;
        }
        let signature = match &s.signature {
            Some(sig) => sig,
            None => return false,
        };

        let mut publics = self.consensus_keys(s.timestamp);
        if self.check_initial_accept_snapshot_weak(s) {
            if let Some(pledging) = self.consensus_pledging() {
                publics.push(pledging.signer.public_spend);
            }
        }
        let base = self.consensus_threshold(s.timestamp);
        if self.cache_verify_cosi(&s.payload_hash(), signature, &publics, base) {
            return true;
        }
        if let Some(removed) = self.consensus_removed_recently(s.timestamp) {
            // The removed node may have signed rounds racing its removal;
            // its key is tried at every committee position.
            for i in 0..=publics.len() {
                let mut repaired = Vec::with_capacity(publics.len() + 1);
                repaired.extend_from_slice(&publics[..i]);
                repaired.push(removed.signer.public_spend);
                repaired.extend_from_slice(&publics[i..]);
                if self.cache_verify_cosi(&s.payload_hash(), signature, &repaired, base) {
                    return true;
                }
            }
        }
        false
    }

    pub fn legacy_verify_finalization(&self, timestamp: u64, sigs: &[Signature]) -> bool {
        sigs.len() >= self.consensus_threshold(timestamp)
    }

    /// Memoized aggregate verification. The cache key covers every input:
    /// snapshot hash, signature dump, the ordered key set, threshold and
    /// signer mask, so gossip duplicates re-verify for free.
    pub fn cache_verify_cosi(
        &self,
        snap: &Hash,
        sig: &CosiSignature,
        publics: &[PublicKey],
        threshold: usize,
    ) -> bool {
        if snap.to_hex() == "b3ea56de6124ad2f3ad1d48f2aff8338b761e62bcde6f2f0acba63a32dd8eecc"
            && sig.to_hex()
                == "dbb0347be24ecb8de3d66631d347fde724ff92e22e1f45deeb8b5d843fd62da39ca8e39de9f35f1e0f7336d4686917983470c098edc91f456d577fb18069620f000000003fdfe712"
        {
            // FIXME this is a hack to fix the large round gap around node remove snapshot
            // and a bug in too recent external reference, e.g. bare final round
            return true;
        }

        let mut key = snap.0.to_vec();
        key.extend_from_slice(&sig.dumps());
        for public in publics {
            key.extend_from_slice(&public.key().0);
        }
        key.extend_from_slice(&(threshold as u64).to_be_bytes());
        key.extend_from_slice(&sig.mask.to_be_bytes());

        if let Some(cached) = self.verify_cache.lock().get(&key) {
            return *cached;
        }
        let valid = sig.full_verify(publics, threshold, &snap.0);
        if !valid {
            debug!(snap = %snap, publics = publics.len(), threshold, "aggregate verification failed");
        }
        self.verify_cache.lock().put(key, valid);
        valid
    }

    /// An initial-accept snapshot: round zero of the currently pledging
    /// node's chain.
    pub fn check_initial_accept_snapshot_weak(&self, s: &Snapshot) -> bool {
        let pledging = match self.consensus_pledging() {
            Some(p) => p,
            None => return false,
        };
        if self.is_genesis_node(&s.node_id) {
            return false;
        }
        if s.node_id != pledging.id_for_network {
            return false;
        }
        s.round_number == 0
    }

    pub fn check_initial_accept_snapshot(&self, s: &Snapshot, tx: &VersionedTransaction) -> bool {
        match self.chain_final_number(&s.node_id) {
            Ok(None) => {}
            _ => return false,
        }
        self.check_initial_accept_snapshot_weak(s)
            && tx.transaction_type() == TransactionKind::NodeAccept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xin_core::{NodeState, Snapshot};
    use xin_crypto::new_hash;

    use crate::config::DAY_NS;
    use crate::node::tests::{test_address, test_node_with_registry};

    const EPOCH: u64 = 1_551_312_000_000_000_000;

    fn committee(n: u8) -> Vec<(xin_core::Address, xin_core::Address, NodeState, u64)> {
        (1..=n)
            .map(|i| (test_address(i), test_address(i + 60), NodeState::Accepted, EPOCH))
            .collect()
    }

    fn signed_snapshot(
        signers: &[xin_core::Address],
        publics: &[PublicKey],
        chain: Hash,
        ts: u64,
    ) -> Snapshot {
        let mut s = Snapshot::new(chain, new_hash(b"tx"));
        s.timestamp = ts;
        s.round_number = 8;
        let payload = s.payload_hash();
        let indices: Vec<usize> = signers
            .iter()
            .map(|a| {
                publics
                    .iter()
                    .position(|p| p.key() == a.public_spend.key())
                    .expect("signer in committee")
            })
            .collect();
        let mut cosi = CosiSignature::aggregate_commitments(&indices).unwrap();
        for (a, &i) in signers.iter().zip(indices.iter()) {
            let sig = a.private_spend.as_ref().unwrap().sign(&payload.0);
            cosi.aggregate_signature(i, &sig).unwrap();
        }
        s.signature = Some(cosi);
        s
    }

    #[test]
    fn aggregate_finalization_at_threshold() {
        let entries = committee(4);
        let signers: Vec<_> = entries.iter().map(|e| e.0.clone()).collect();
        let (node, dir) = test_node_with_registry("fin_agg", EPOCH, entries, 4);

        let ts = EPOCH + DAY_NS;
        let publics = node.consensus_keys(ts);
        let threshold = node.consensus_threshold(ts);
        assert_eq!(threshold, 3);

        let chain = signers[0].id_for_network(&node.network_id);
        let s = signed_snapshot(&signers[..3], &publics, chain, ts);
        assert!(node.verify_finalization(&s));
        // Cached result replays identically.
        assert!(node.verify_finalization(&s));

        let under = signed_snapshot(&signers[..2], &publics, chain, ts);
        assert!(!node.verify_finalization(&under));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn legacy_finalization_counts_signatures() {
        let entries = committee(4);
        let (node, dir) = test_node_with_registry("fin_legacy", EPOCH, entries, 4);
        let ts = EPOCH + DAY_NS;
        let mut s = Snapshot::new(new_hash(b"c"), new_hash(b"t"));
        s.version = 0;
        s.timestamp = ts;
        s.signatures = vec![Signature([1u8; 64]); 3];
        assert!(node.verify_finalization(&s));
        s.signatures.truncate(2);
        assert!(!node.verify_finalization(&s));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn removed_node_repairs_finalization_at_any_position() {
        // Committee of 4 accepted plus one freshly removed node: proofs
        // signed by 2 accepted + the removed signer still finalize.
        let mut entries = committee(4);
        let removed_signer = test_address(30);
        let removed_ts = EPOCH + 200 * DAY_NS;
        entries.push((
            removed_signer.clone(),
            test_address(90),
            NodeState::Removed,
            removed_ts,
        ));
        let signers: Vec<_> = entries.iter().map(|e| e.0.clone()).collect();
        let (node, dir) = test_node_with_registry("fin_repair", EPOCH, entries, 4);

        let ts = removed_ts + 1;
        let publics = node.consensus_keys(ts);
        assert_eq!(publics.len(), 4);
        let threshold = node.consensus_threshold(ts);
        assert_eq!(threshold, 3);

        let chain = signers[0].id_for_network(&node.network_id);
        for position in 0..=publics.len() {
            let mut repaired = publics.clone();
            repaired.insert(position, removed_signer.public_spend);
            let committee_signers =
                vec![signers[0].clone(), signers[1].clone(), removed_signer.clone()];
            let s = signed_snapshot(&committee_signers, &repaired, chain, ts);
            assert!(
                node.verify_finalization(&s),
                "removed signer at position {} should repair",
                position
            );
        }

        // Two signatures plus an unknown key do not.
        let outsider = test_address(31);
        let mut repaired = publics.clone();
        repaired.push(outsider.public_spend);
        let s = signed_snapshot(
            &[signers[0].clone(), signers[1].clone(), outsider],
            &repaired,
            chain,
            ts,
        );
        assert!(!node.verify_finalization(&s));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn initial_accept_augments_committee() {
        let mut entries = committee(3);
        let pledging = test_address(20);
        entries.push((pledging.clone(), test_address(80), NodeState::Pledging, EPOCH + DAY_NS));
        let signers: Vec<_> = entries.iter().take(3).map(|e| e.0.clone()).collect();
        let (node, dir) = test_node_with_registry("fin_accept", EPOCH, entries, 3);

        let ts = EPOCH + 2 * DAY_NS;
        let mut publics = node.consensus_keys(ts);
        assert_eq!(publics.len(), 3);
        publics.push(pledging.public_spend);
        let threshold = node.consensus_threshold(ts);

        let chain = pledging.id_for_network(&node.network_id);
        let mut committee_signers = signers[..threshold.saturating_sub(1)].to_vec();
        committee_signers.push(pledging.clone());
        let mut s = signed_snapshot(&committee_signers, &publics, chain, ts);
        s.round_number = 0;
        // Re-sign for the adjusted round number.
        let payload = s.payload_hash();
        let indices: Vec<usize> = committee_signers
            .iter()
            .map(|a| {
                publics
                    .iter()
                    .position(|p| p.key() == a.public_spend.key())
                    .unwrap()
            })
            .collect();
        let mut cosi = CosiSignature::aggregate_commitments(&indices).unwrap();
        for (a, &i) in committee_signers.iter().zip(indices.iter()) {
            cosi.aggregate_signature(i, &a.private_spend.as_ref().unwrap().sign(&payload.0))
                .unwrap();
        }
        s.signature = Some(cosi);

        assert!(node.check_initial_accept_snapshot_weak(&s));
        assert!(node.verify_finalization(&s));

        let _ = std::fs::remove_dir_all(&dir);
    }
}

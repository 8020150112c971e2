use serde::{Deserialize, Serialize};
use xin_crypto::{CosiSignature, Hash, Signature};

use crate::encoding;

pub const SNAPSHOT_VERSION: u8 = 1;

/// The two rounds a snapshot hangs off: the node's own previous final round
/// and one resolved round of a peer chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoundLink {
    #[serde(rename = "Self")]
    pub self_hash: Hash,
    pub external: Hash,
}

/// One transaction reference agreed into a node's round.
///
/// Version 0 snapshots carry a plain signature list; the current version
/// carries a single aggregate over the payload hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    pub version: u8,
    pub node_id: Hash,
    pub transaction: Hash,
    pub references: Option<RoundLink>,
    pub round_number: u64,
    pub timestamp: u64,
    #[serde(default)]
    pub signatures: Vec<Signature>,
    #[serde(default)]
    pub signature: Option<CosiSignature>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PayloadV1Ref<'a> {
    version: u8,
    node_id: &'a Hash,
    transaction: &'a Hash,
    references: &'a Option<RoundLink>,
    round_number: u64,
    timestamp: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct PayloadLegacyRef<'a> {
    node_id: &'a Hash,
    transaction: &'a Hash,
    references: &'a Option<RoundLink>,
    round_number: u64,
    timestamp: u64,
}

impl Snapshot {
    pub fn new(node_id: Hash, transaction: Hash) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            node_id,
            transaction,
            references: None,
            round_number: 0,
            timestamp: 0,
            signatures: Vec::new(),
            signature: None,
        }
    }

    /// The signed bytes: every field except the signatures, in the shape of
    /// the snapshot's own version.
    pub fn versioned_payload(&self) -> Vec<u8> {
        if self.version == 0 {
            encoding::marshal(&PayloadLegacyRef {
                node_id: &self.node_id,
                transaction: &self.transaction,
                references: &self.references,
                round_number: self.round_number,
                timestamp: self.timestamp,
            })
        } else {
            encoding::marshal(&PayloadV1Ref {
                version: self.version,
                node_id: &self.node_id,
                transaction: &self.transaction,
                references: &self.references,
                round_number: self.round_number,
                timestamp: self.timestamp,
            })
        }
    }

    pub fn payload_hash(&self) -> Hash {
        xin_crypto::new_hash(&self.versioned_payload())
    }
}

/// A snapshot with its global replay position, assigned at persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnapshotWithTopologicalOrder {
    pub snapshot: Snapshot,
    pub topological_order: u64,
}

/// Tip summary exchanged between peers to compare graph heads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncPoint {
    pub node_id: Hash,
    pub hash: Hash,
    pub number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use xin_crypto::new_hash;

    #[test]
    fn payload_versions_differ() {
        let node = new_hash(b"node");
        let tx = new_hash(b"tx");
        let mut s = Snapshot::new(node, tx);
        let v1 = s.payload_hash();
        s.version = 0;
        let v0 = s.payload_hash();
        assert_ne!(v0, v1);
    }

    #[test]
    fn signatures_do_not_affect_payload() {
        let mut s = Snapshot::new(new_hash(b"n"), new_hash(b"t"));
        let before = s.payload_hash();
        s.signatures.push(Signature([7u8; 64]));
        assert_eq!(s.payload_hash(), before);
        s.signature = Some(CosiSignature::aggregate_commitments(&[0]).unwrap());
        assert_eq!(s.payload_hash(), before);
    }

    #[test]
    fn payload_covers_round_fields() {
        let mut s = Snapshot::new(new_hash(b"n"), new_hash(b"t"));
        let h0 = s.payload_hash();
        s.round_number = 1;
        let h1 = s.payload_hash();
        assert_ne!(h0, h1);
        s.references = Some(RoundLink {
            self_hash: new_hash(b"self"),
            external: new_hash(b"ext"),
        });
        assert_ne!(s.payload_hash(), h1);
        s.timestamp = 12345;
        assert_ne!(s.payload_hash(), h1);
    }

    #[test]
    fn wire_roundtrip() {
        let mut s = Snapshot::new(new_hash(b"n"), new_hash(b"t"));
        s.round_number = 9;
        s.timestamp = 1234567890;
        s.references = Some(RoundLink {
            self_hash: new_hash(b"s"),
            external: new_hash(b"e"),
        });
        let raw = encoding::marshal(&s);
        let back: Snapshot = encoding::unmarshal(&raw).unwrap();
        assert_eq!(back.payload_hash(), s.payload_hash());
        assert_eq!(encoding::marshal(&back), raw);
    }
}

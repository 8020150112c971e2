use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::key::Signature;
use crate::{CryptoError, PublicKey};

/// Collective signature over a known, ordered public-key set.
///
/// Under the concatenated-signature scheme both flavors share, aggregation
/// degenerates to per-signer signatures kept in key order: `mask` records
/// which of the (at most 64) committee keys participate, `signature_mask`
/// the participants whose signature has not been aggregated yet.
#[derive(Clone, PartialEq, Eq)]
pub struct CosiSignature {
    pub mask: u64,
    pub signature_mask: u64,
    pub signatures: Vec<Signature>,
}

impl CosiSignature {
    /// Seed an aggregation from the committed signer indices.
    pub fn aggregate_commitments(indices: &[usize]) -> Result<Self, CryptoError> {
        let mut mask = 0u64;
        for &i in indices {
            if i >= 64 {
                return Err(CryptoError::InvalidCosi(format!(
                    "signer index {} out of range",
                    i
                )));
            }
            if mask & (1 << i) != 0 {
                return Err(CryptoError::InvalidCosi(format!("duplicate signer index {}", i)));
            }
            mask |= 1 << i;
        }
        Ok(Self {
            mask,
            signature_mask: mask,
            signatures: Vec::new(),
        })
    }

    /// Committed signer indices, ascending.
    pub fn keys(&self) -> Vec<usize> {
        (0..64).filter(|i| self.mask & (1 << i) != 0).collect()
    }

    pub fn signature_aggregated(&self, key_index: usize) -> bool {
        key_index < 64
            && self.mask & (1 << key_index) != 0
            && self.signature_mask & (1 << key_index) == 0
    }

    /// Aggregate one signer's signature, inserting it at the position its
    /// key holds among the already-aggregated keys.
    pub fn aggregate_signature(
        &mut self,
        key_index: usize,
        sig: &Signature,
    ) -> Result<(), CryptoError> {
        if key_index >= 64 || self.mask & (1 << key_index) == 0 {
            return Err(CryptoError::InvalidCosi(format!(
                "signer index {} not committed",
                key_index
            )));
        }
        if self.signature_aggregated(key_index) {
            return Err(CryptoError::InvalidCosi(format!(
                "signer index {} already aggregated",
                key_index
            )));
        }
        let position = self
            .keys()
            .into_iter()
            .take_while(|&k| k < key_index)
            .filter(|&k| self.signature_aggregated(k))
            .count();
        self.signatures.insert(position, *sig);
        self.signature_mask &= !(1 << key_index);
        Ok(())
    }

    /// The shared challenge of the aggregation round. Under the
    /// concatenated-signature scheme each signer signs independently, so
    /// the challenge degenerates to zero.
    pub fn challenge(&self, _publics: &[PublicKey], _message: &[u8]) -> [u8; 32] {
        [0u8; 32]
    }

    /// Verify the aggregate against the ordered key set. Requires every
    /// committed signature aggregated, at least `threshold` signers, and
    /// each signature verifying against its committed key.
    pub fn full_verify(&self, publics: &[PublicKey], threshold: usize, message: &[u8]) -> bool {
        if self.signature_mask != 0 {
            return false;
        }
        let keys = self.keys();
        if keys.len() < threshold {
            return false;
        }
        if keys.len() != self.signatures.len() {
            return false;
        }
        for (sig, &k) in self.signatures.iter().zip(keys.iter()) {
            let public = match publics.get(k) {
                Some(p) => p,
                None => return false,
            };
            if !public.verify(message, sig) {
                return false;
            }
        }
        true
    }

    /// Wire form: `mask_be8 || signature_mask_be8 || signatures`.
    pub fn dumps(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(16 + 64 * self.signatures.len());
        data.extend_from_slice(&self.mask.to_be_bytes());
        data.extend_from_slice(&self.signature_mask.to_be_bytes());
        for sig in &self.signatures {
            data.extend_from_slice(&sig.0);
        }
        data
    }

    pub fn loads(data: &[u8]) -> Result<Self, CryptoError> {
        if data.len() < 16 {
            return Err(CryptoError::InvalidCosi(format!(
                "invalid message size {}",
                data.len()
            )));
        }
        let mut cosi = Self {
            mask: u64::from_be_bytes(data[..8].try_into().expect("8 bytes")),
            signature_mask: 0,
            signatures: Vec::new(),
        };
        cosi.signature_mask = cosi.mask;
        let sig_mask = u64::from_be_bytes(data[8..16].try_into().expect("8 bytes"));
        let mut rest = &data[16..];
        for i in cosi.keys() {
            if sig_mask & (1 << i) != 0 {
                continue;
            }
            if rest.len() < 64 {
                return Err(CryptoError::InvalidCosi(format!(
                    "invalid message size {}",
                    data.len()
                )));
            }
            let mut sig = [0u8; 64];
            sig.copy_from_slice(&rest[..64]);
            cosi.aggregate_signature(i, &Signature(sig))?;
            rest = &rest[64..];
        }
        Ok(cosi)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.dumps())
    }
}

impl fmt::Display for CosiSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CosiSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CosiSignature(mask={:016x}, {} sigs)",
            self.mask,
            self.signatures.len()
        )
    }
}

impl Serialize for CosiSignature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            s.serialize_bytes(&self.dumps())
        }
    }
}

impl<'de> Deserialize<'de> for CosiSignature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct CosiVisitor;

        impl<'de> serde::de::Visitor<'de> for CosiVisitor {
            type Value = CosiSignature;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "an aggregated signature")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                CosiSignature::loads(v).map_err(E::custom)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                let bytes = hex::decode(v).map_err(E::custom)?;
                self.visit_bytes(&bytes)
            }
        }

        if d.is_human_readable() {
            d.deserialize_str(CosiVisitor)
        } else {
            d.deserialize_bytes(CosiVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrivateKey;

    fn keys(n: usize) -> Vec<PrivateKey> {
        (0..n)
            .map(|i| {
                let mut seed = [0u8; 64];
                seed[0] = i as u8;
                seed[1] = 0xc0;
                PrivateKey::from_seed(&seed).unwrap()
            })
            .collect()
    }

    #[test]
    fn twenty_signers_aggregate_and_verify() {
        let raw = b"just a test";
        let privates = keys(20);
        let publics: Vec<_> = privates.iter().map(|p| p.public()).collect();

        let indices: Vec<usize> = (0..20).collect();
        let mut cosi = CosiSignature::aggregate_commitments(&indices).unwrap();
        for (i, p) in privates.iter().enumerate() {
            let sig = p.sign(raw);
            assert!(publics[i].verify(raw, &sig));
            cosi.aggregate_signature(i, &sig).unwrap();
        }

        assert_eq!(cosi.signatures.len(), 20);
        assert!(cosi.full_verify(&publics, 20, raw));
        assert!(!cosi.full_verify(&publics, 21, raw));
    }

    #[test]
    fn out_of_order_aggregation_keeps_key_order() {
        let raw = b"ordering";
        let privates = keys(4);
        let publics: Vec<_> = privates.iter().map(|p| p.public()).collect();

        let mut cosi = CosiSignature::aggregate_commitments(&[0, 1, 2, 3]).unwrap();
        for i in [2usize, 0, 3, 1] {
            cosi.aggregate_signature(i, &privates[i].sign(raw)).unwrap();
        }
        assert!(cosi.full_verify(&publics, 4, raw));
    }

    #[test]
    fn sparse_mask_verifies_against_committee_positions() {
        let raw = b"sparse";
        let privates = keys(6);
        let publics: Vec<_> = privates.iter().map(|p| p.public()).collect();

        let mut cosi = CosiSignature::aggregate_commitments(&[1, 3, 5]).unwrap();
        for i in [1usize, 3, 5] {
            cosi.aggregate_signature(i, &privates[i].sign(raw)).unwrap();
        }
        assert!(cosi.full_verify(&publics, 3, raw));
        // Shuffled committee no longer matches the mask positions.
        let mut wrong = publics.clone();
        wrong.swap(1, 2);
        assert!(!wrong[1].verify(raw, &cosi.signatures[0]));
        assert!(!cosi.full_verify(&wrong, 3, raw));
    }

    #[test]
    fn incomplete_aggregation_fails() {
        let raw = b"incomplete";
        let privates = keys(3);
        let publics: Vec<_> = privates.iter().map(|p| p.public()).collect();
        let mut cosi = CosiSignature::aggregate_commitments(&[0, 1, 2]).unwrap();
        cosi.aggregate_signature(0, &privates[0].sign(raw)).unwrap();
        assert!(!cosi.full_verify(&publics, 1, raw));
    }

    #[test]
    fn dumps_loads_roundtrip() {
        let raw = b"wire";
        let privates = keys(5);
        let mut cosi = CosiSignature::aggregate_commitments(&[0, 2, 4]).unwrap();
        for i in [0usize, 2, 4] {
            cosi.aggregate_signature(i, &privates[i].sign(raw)).unwrap();
        }
        let data = cosi.dumps();
        let back = CosiSignature::loads(&data).unwrap();
        assert_eq!(back, cosi);
        assert_eq!(back.dumps(), data);
    }

    #[test]
    fn duplicate_aggregation_rejected() {
        let privates = keys(2);
        let mut cosi = CosiSignature::aggregate_commitments(&[0, 1]).unwrap();
        let sig = privates[0].sign(b"x");
        cosi.aggregate_signature(0, &sig).unwrap();
        assert!(cosi.aggregate_signature(0, &sig).is_err());
    }
}

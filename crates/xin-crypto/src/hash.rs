use std::fmt;

use serde::de::{Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::CryptoError;

/// Compute the flavor digest of `data`: SHA3-256 on the edwards flavor,
/// SM3 on the custom curve.
#[cfg(not(feature = "sm"))]
pub fn new_hash(data: &[u8]) -> Hash {
    use sha3::{Digest, Sha3_256};
    Hash(Sha3_256::digest(data).into())
}

#[cfg(feature = "sm")]
pub fn new_hash(data: &[u8]) -> Hash {
    use sm3::{Digest, Sm3};
    Hash(Sm3::digest(data).into())
}

/// 32-byte cryptographic digest, used as identifier, payload hash and
/// network-scoped id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn from_data(data: &[u8]) -> Self {
        new_hash(data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Scope an identifier to a network: `hash(network || self)`.
    pub fn for_network(&self, network: &Hash) -> Hash {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&network.0);
        buf[32..].copy_from_slice(&self.0);
        new_hash(&buf)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "invalid hash length {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            s.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Hash(deserialize_fixed::<D, 32>(d, "a 32-byte hash")?))
    }
}

/// Shared visitor for fixed-width byte values: raw bytes in binary formats,
/// hex strings in human-readable ones.
pub(crate) fn deserialize_fixed<'de, D, const N: usize>(
    d: D,
    what: &'static str,
) -> Result<[u8; N], D::Error>
where
    D: Deserializer<'de>,
{
    struct FixedVisitor<const N: usize>(&'static str);

    impl<'de, const N: usize> Visitor<'de> for FixedVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            if v.len() != N {
                return Err(E::invalid_length(v.len(), &self));
            }
            let mut arr = [0u8; N];
            arr.copy_from_slice(v);
            Ok(arr)
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            let bytes = hex::decode(v).map_err(E::custom)?;
            self.visit_bytes(&bytes)
        }

        fn visit_seq<A: serde::de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> Result<Self::Value, A::Error> {
            let mut arr = [0u8; N];
            for (i, slot) in arr.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(i, &self))?;
            }
            Ok(arr)
        }
    }

    if d.is_human_readable() {
        d.deserialize_str(FixedVisitor::<N>(what))
    } else {
        d.deserialize_bytes(FixedVisitor::<N>(what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        let a = new_hash(b"snapshot");
        let b = new_hash(b"snapshot");
        assert_eq!(a, b);
        assert_ne!(a, new_hash(b"snapshot2"));
    }

    #[test]
    fn network_scoping_changes_id() {
        let id = new_hash(b"node");
        let net1 = new_hash(b"net1");
        let net2 = new_hash(b"net2");
        assert_ne!(id.for_network(&net1), id.for_network(&net2));
        assert_ne!(id.for_network(&net1), id);
    }

    #[test]
    fn hex_roundtrip() {
        let h = new_hash(b"hex me");
        assert_eq!(Hash::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn serde_json_uses_hex() {
        let h = new_hash(b"json");
        let j = serde_json::to_string(&h).unwrap();
        assert_eq!(j, format!("\"{}\"", h.to_hex()));
        let back: Hash = serde_json::from_str(&j).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn serde_msgpack_uses_bytes() {
        let h = new_hash(b"msgpack");
        let raw = rmp_serde::to_vec_named(&h).unwrap();
        // bin8 marker + length + 32 bytes
        assert_eq!(raw.len(), 34);
        let back: Hash = rmp_serde::from_slice(&raw).unwrap();
        assert_eq!(back, h);
    }
}

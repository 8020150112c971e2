use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::hash::deserialize_fixed;
use crate::{CryptoError, PrivateKey, PublicKey, KEY_SIZE};

/// Opaque fixed-size key encoding. On the custom curve the leading byte is a
/// tag (0x00 private scalar, 0x02/0x03 compressed public point); the edwards
/// flavor stores the raw 32-byte scalar or compressed point.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub [u8; KEY_SIZE]);

impl Key {
    pub fn zero() -> Self {
        Self([0u8; KEY_SIZE])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_SIZE]
    }

    pub fn as_private(&self) -> Result<PrivateKey, CryptoError> {
        PrivateKey::from_key(self)
    }

    pub fn as_public(&self) -> Result<PublicKey, CryptoError> {
        PublicKey::from_key(self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "invalid key length {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; KEY_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for Key {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            s.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Key(deserialize_fixed::<D, KEY_SIZE>(d, "a key")?))
    }
}

/// 64-byte signature (R || s on edwards, r || s on the custom curve).
#[derive(Clone, Copy)]
pub struct Signature(pub [u8; 64]);

impl Signature {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidKey(format!(
                "invalid signature length {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 64];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for Signature {}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}…)", &self.to_hex()[..16])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_hex())
        } else {
            s.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Signature(deserialize_fixed::<D, 64>(d, "a 64-byte signature")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrips_through_private() {
        let mut seed = [0u8; 64];
        seed[5] = 9;
        let p = PrivateKey::from_seed(&seed).unwrap();
        let k = p.key();
        let p2 = k.as_private().unwrap();
        assert_eq!(p2.public().key(), p.public().key());
    }

    #[test]
    fn public_key_roundtrips_through_bytes() {
        let mut seed = [0u8; 64];
        seed[0] = 1;
        let p = PrivateKey::from_seed(&seed).unwrap().public();
        let k = p.key();
        assert_eq!(k.as_public().unwrap().key(), k);
    }

    #[test]
    fn private_key_rejected_as_public() {
        let mut seed = [0u8; 64];
        seed[1] = 2;
        let p = PrivateKey::from_seed(&seed).unwrap();
        // A scalar encoding is not a valid curve point encoding in either
        // flavor (the custom curve tags it 0x00, the edwards flavor fails to
        // decompress for almost all scalars).
        if let Ok(pubk) = p.key().as_public() {
            assert_ne!(pubk.key(), p.public().key());
        }
    }
}

use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use xin_crypto::{new_hash, Hash, PrivateKey, PublicKey, KEY_SIZE};

use crate::error::Error;

const ADDRESS_PREFIX: &str = "XIN";

/// A ledger address: a public spend key plus a public view key. The private
/// halves are present only for locally-owned addresses; the private view key
/// is always derivable from the public spend key.
#[derive(Clone)]
pub struct Address {
    pub private_view: Option<PrivateKey>,
    pub private_spend: Option<PrivateKey>,
    pub public_view: PublicKey,
    pub public_spend: PublicKey,
}

impl Address {
    /// Derive a full keypair address from a 64-byte seed.
    pub fn from_seed(seed: &[u8; 64]) -> Self {
        let private_spend = PrivateKey::from_seed(seed).expect("seed derives a valid scalar");
        let public_spend = private_spend.public();
        let private_view = public_spend.deterministic_hash_derive();
        let public_view = private_view.public();
        Self {
            private_view: Some(private_view),
            private_spend: Some(private_spend),
            public_view,
            public_spend,
        }
    }

    /// Public-only address from a spend key, with the view key derived.
    pub fn from_public_spend(public_spend: PublicKey) -> Self {
        let public_view = public_spend.deterministic_hash_derive().public();
        Self {
            private_view: None,
            private_spend: None,
            public_view,
            public_spend,
        }
    }

    pub fn from_string(s: &str) -> Result<Self, Error> {
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| Error::Syntax(format!("invalid address prefix {}", s)))?;
        let data = bs58::decode(body)
            .into_vec()
            .map_err(|e| Error::Syntax(format!("invalid address encoding {}", e)))?;
        if data.len() != 2 * KEY_SIZE + 4 {
            return Err(Error::Syntax(format!("invalid address length {}", data.len())));
        }

        let mut msg = ADDRESS_PREFIX.as_bytes().to_vec();
        msg.extend_from_slice(&data[..2 * KEY_SIZE]);
        let checksum = new_hash(&msg);
        if checksum.0[..4] != data[2 * KEY_SIZE..] {
            return Err(Error::Syntax(format!("invalid address checksum {}", s)));
        }

        let mut spend = [0u8; KEY_SIZE];
        spend.copy_from_slice(&data[..KEY_SIZE]);
        let mut view = [0u8; KEY_SIZE];
        view.copy_from_slice(&data[KEY_SIZE..2 * KEY_SIZE]);
        Ok(Self {
            private_view: None,
            private_spend: None,
            public_spend: xin_crypto::Key(spend).as_public()?,
            public_view: xin_crypto::Key(view).as_public()?,
        })
    }

    /// Identity of the address: the flavor digest of both public keys.
    pub fn hash(&self) -> Hash {
        let mut data = self.public_spend.key().0.to_vec();
        data.extend_from_slice(&self.public_view.key().0);
        new_hash(&data)
    }

    pub fn id_for_network(&self, network: &Hash) -> Hash {
        self.hash().for_network(network)
    }

    /// The receiver-side view key: held privately, or derived from the
    /// public spend key for addresses whose view key is deterministic.
    pub fn view_key(&self) -> PrivateKey {
        match &self.private_view {
            Some(v) => v.clone(),
            None => self.public_spend.deterministic_hash_derive(),
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.public_spend.key() == other.public_spend.key()
            && self.public_view.key() == other.public_view.key()
    }
}

impl Eq for Address {}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = self.public_spend.key().0.to_vec();
        data.extend_from_slice(&self.public_view.key().0);
        let mut msg = ADDRESS_PREFIX.as_bytes().to_vec();
        msg.extend_from_slice(&data);
        let checksum = new_hash(&msg);
        data.extend_from_slice(&checksum.0[..4]);
        write!(f, "{}{}", ADDRESS_PREFIX, bs58::encode(data).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct AddressVisitor;

        impl<'de> serde::de::Visitor<'de> for AddressVisitor {
            type Value = Address;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "an XIN address string")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Address::from_string(v).map_err(E::custom)
            }
        }

        d.deserialize_str(AddressVisitor)
    }
}

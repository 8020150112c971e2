use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use xin_crypto::{new_hash, Hash};

use crate::error::Error;

/// The kernel's own asset, pledged by consensus nodes and minted as rewards.
pub static XIN_ASSET_ID: Lazy<Hash> =
    Lazy::new(|| new_hash(b"c94ac88f-4671-3976-b60a-09064f1811e8"));

pub static BITCOIN_CHAIN_ID: Lazy<Hash> =
    Lazy::new(|| new_hash(b"c6d0c728-2624-429b-8e0d-d9d19b6592fa"));

pub static ETHEREUM_CHAIN_ID: Lazy<Hash> =
    Lazy::new(|| new_hash(b"43d61dcd-e413-450d-80b8-101d5e903357"));

const BITCOIN_ASSET_KEY: &str = "c6d0c728-2624-429b-8e0d-d9d19b6592fa";
const ETHEREUM_ASSET_KEY: &str = "43d61dcd-e413-450d-80b8-101d5e903357";

/// An external-chain asset reference carried by deposit inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Asset {
    pub chain_id: Hash,
    pub asset_key: String,
}

impl Asset {
    pub fn verify(&self) -> Result<(), Error> {
        if self.chain_id == *BITCOIN_CHAIN_ID {
            verify_bitcoin_asset_key(&self.asset_key)
        } else if self.chain_id == *ETHEREUM_CHAIN_ID {
            verify_ethereum_asset_key(&self.asset_key)
        } else {
            Err(Error::Asset(format!("invalid chain id {}", self.chain_id)))
        }
    }

    /// Network-wide asset identifier: the chain id for the chain's native
    /// asset, `hash(chain_id || asset_key)` otherwise.
    pub fn asset_id(&self) -> Hash {
        if self.chain_id == *BITCOIN_CHAIN_ID {
            if self.asset_key == BITCOIN_ASSET_KEY {
                return *BITCOIN_CHAIN_ID;
            }
        } else if self.chain_id == *ETHEREUM_CHAIN_ID {
            if self.asset_key == ETHEREUM_ASSET_KEY {
                return *ETHEREUM_CHAIN_ID;
            }
        } else {
            return Hash::default();
        }
        let mut data = self.chain_id.0.to_vec();
        data.extend_from_slice(self.asset_key.as_bytes());
        new_hash(&data)
    }

    pub fn fee_asset_id(&self) -> Hash {
        if self.chain_id == *BITCOIN_CHAIN_ID || self.chain_id == *ETHEREUM_CHAIN_ID {
            self.chain_id
        } else {
            Hash::default()
        }
    }
}

fn verify_bitcoin_asset_key(key: &str) -> Result<(), Error> {
    if key == BITCOIN_ASSET_KEY {
        Ok(())
    } else {
        Err(Error::Asset(format!("invalid bitcoin asset key {}", key)))
    }
}

fn verify_ethereum_asset_key(key: &str) -> Result<(), Error> {
    let valid = key.len() == 42
        && key.starts_with("0x")
        && key[2..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if valid {
        Ok(())
    } else {
        Err(Error::Asset(format!("invalid ethereum asset key {}", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_asset_keys_map_to_chain_ids() {
        let btc = Asset {
            chain_id: *BITCOIN_CHAIN_ID,
            asset_key: BITCOIN_ASSET_KEY.into(),
        };
        assert!(btc.verify().is_ok());
        assert_eq!(btc.asset_id(), *BITCOIN_CHAIN_ID);
        assert_eq!(btc.fee_asset_id(), *BITCOIN_CHAIN_ID);
    }

    #[test]
    fn contract_assets_derive_distinct_ids() {
        let usdt = Asset {
            chain_id: *ETHEREUM_CHAIN_ID,
            asset_key: "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
        };
        assert!(usdt.verify().is_ok());
        assert_ne!(usdt.asset_id(), *ETHEREUM_CHAIN_ID);
        assert_ne!(usdt.asset_id(), Hash::default());

        let dai = Asset {
            chain_id: *ETHEREUM_CHAIN_ID,
            asset_key: "0x6b175474e89094c44da98b954eedeac495271d0f".into(),
        };
        assert_ne!(usdt.asset_id(), dai.asset_id());
    }

    #[test]
    fn unknown_chain_rejected() {
        let bogus = Asset {
            chain_id: new_hash(b"nope"),
            asset_key: "anything".into(),
        };
        assert!(bogus.verify().is_err());
        assert_eq!(bogus.asset_id(), Hash::default());
    }

    #[test]
    fn malformed_ethereum_keys_rejected() {
        for key in ["0xDAC17F958D2EE523A2206206994597C13D831EC7", "dac17f", "0x123"] {
            let a = Asset {
                chain_id: *ETHEREUM_CHAIN_ID,
                asset_key: key.into(),
            };
            assert!(a.verify().is_err(), "{} should be rejected", key);
        }
    }
}

//! Curve primitives for the XIN kernel.
//!
//! Two flavors are selectable at compile time:
//!   - the default pure-edwards scheme (curve25519, SHA3-256 payload hash),
//!   - the `sm` feature: SM2 with SM3 hashing and 33-byte tagged keys.
//!
//! Both expose the same surface: seed-derived private scalars, point
//! arithmetic, hash-to-scalar derivation, single signatures and the
//! concatenated-signature CoSi used for snapshot finalization.

use thiserror::Error;

mod cosi;
mod hash;
mod key;

#[cfg(not(feature = "sm"))]
mod edwards;
#[cfg(not(feature = "sm"))]
pub use edwards::{PrivateKey, PublicKey};

#[cfg(feature = "sm")]
mod sm;
#[cfg(feature = "sm")]
pub use sm::{PrivateKey, PublicKey};

pub use cosi::CosiSignature;
pub use hash::{new_hash, Hash};
pub use key::{Key, Signature};

/// Size of a serialized key. 32 raw bytes on the edwards flavor; 33 on the
/// custom curve, where the leading byte tags the key: 0x00 private scalar,
/// 0x02/0x03 compressed public point.
#[cfg(not(feature = "sm"))]
pub const KEY_SIZE: usize = 32;
#[cfg(feature = "sm")]
pub const KEY_SIZE: usize = 33;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid seed")]
    InvalidSeed,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature aggregation: {0}")]
    InvalidCosi(String),
}

/// One-time output key for an output at `index`:
/// `ghost = B_spend + scalar_hash(r·A_view, index)·G`.
pub fn derive_ghost_public_key(
    r: &PrivateKey,
    a_view: &PublicKey,
    b_spend: &PublicKey,
    index: u64,
) -> PublicKey {
    let shared = r.scalar_mult(a_view);
    b_spend.add_public(&shared.scalar_hash(index).public())
}

/// The private counterpart of [`derive_ghost_public_key`], available to the
/// receiver holding both private keys.
pub fn derive_ghost_private_key(
    mask: &PublicKey,
    a_view: &PrivateKey,
    b_spend: &PrivateKey,
    index: u64,
) -> PrivateKey {
    let shared = a_view.scalar_mult(mask);
    shared.scalar_hash(index).add_private(b_spend)
}

/// Strip the one-time component off an output key with the receiver's view
/// key: `ghost − scalar_hash(a·R, index)·G`. The result equals the
/// receiver's public spend key iff the output is addressed to them.
pub fn view_ghost_output_key(
    mask: &PublicKey,
    ghost: &PublicKey,
    a_view: &PrivateKey,
    index: u64,
) -> PublicKey {
    let shared = a_view.scalar_mult(mask);
    ghost.sub_public(&shared.scalar_hash(index).public())
}

/// Go-style unsigned LEB128, used by the hash-to-scalar derivation.
pub(crate) fn put_uvarint(buf: &mut [u8; 10], mut x: u64) -> usize {
    let mut i = 0;
    while x >= 0x80 {
        buf[i] = (x as u8) | 0x80;
        x >>= 7;
        i += 1;
    }
    buf[i] = x as u8;
    i + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(fill: u8) -> [u8; 64] {
        let mut s = [0u8; 64];
        for (i, b) in s.iter_mut().enumerate() {
            *b = fill.wrapping_add(i as u8);
        }
        s
    }

    #[test]
    fn sign_verify_roundtrip() {
        let key = PrivateKey::from_seed(&seed(7)).unwrap();
        let other = PrivateKey::from_seed(&seed(9)).unwrap();
        let msg = b"round one snapshot payload";
        let sig = key.sign(msg);
        assert!(key.public().verify(msg, &sig));
        assert!(!other.public().verify(msg, &sig));
        assert!(!key.public().verify(b"different payload", &sig));
    }

    #[test]
    fn ghost_keys_resolve_to_spend_key() {
        let spend = PrivateKey::from_seed(&seed(1)).unwrap();
        let view = spend.public().deterministic_hash_derive();
        let r = PrivateKey::from_seed(&seed(42)).unwrap();

        for index in [0u64, 1, 2, 107] {
            let ghost = derive_ghost_public_key(&r, &view.public(), &spend.public(), index);
            let recovered = view_ghost_output_key(&r.public(), &ghost, &view, index);
            assert_eq!(recovered.key(), spend.public().key());

            let ghost_priv = derive_ghost_private_key(&r.public(), &view, &spend, index);
            assert_eq!(ghost_priv.public().key(), ghost.key());
        }
    }

    #[test]
    fn ghost_keys_differ_per_index() {
        let spend = PrivateKey::from_seed(&seed(3)).unwrap();
        let view = spend.public().deterministic_hash_derive();
        let r = PrivateKey::from_seed(&seed(4)).unwrap();
        let g0 = derive_ghost_public_key(&r, &view.public(), &spend.public(), 0);
        let g1 = derive_ghost_public_key(&r, &view.public(), &spend.public(), 1);
        assert_ne!(g0.key(), g1.key());
    }

    #[test]
    fn deterministic_hash_derive_is_stable() {
        let key = PrivateKey::from_seed(&seed(11)).unwrap();
        let a = key.public().deterministic_hash_derive();
        let b = key.public().deterministic_hash_derive();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn uvarint_matches_go_encoding() {
        let mut buf = [0u8; 10];
        assert_eq!(put_uvarint(&mut buf, 0), 1);
        assert_eq!(buf[0], 0);
        assert_eq!(put_uvarint(&mut buf, 1), 1);
        assert_eq!(buf[0], 1);
        assert_eq!(put_uvarint(&mut buf, 300), 2);
        assert_eq!(&buf[..2], &[0xac, 0x02]);
    }
}

use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::{new_hash, put_uvarint, CryptoError, Key};
use crate::key::Signature;

/// A curve25519 scalar. The signing scheme hashes the scalar directly (no
/// ed25519 seed expansion), which keeps scalar arithmetic — additions and
/// ghost-key derivations — compatible with the public side.
pub struct PrivateKey {
    scalar: Scalar,
}

impl PrivateKey {
    /// Wide reduction of a 64-byte seed into a scalar.
    pub fn from_seed(seed: &[u8; 64]) -> Result<Self, CryptoError> {
        Ok(Self {
            scalar: Scalar::from_bytes_mod_order_wide(seed),
        })
    }

    pub fn from_key(k: &Key) -> Result<Self, CryptoError> {
        let scalar = Option::<Scalar>::from(Scalar::from_canonical_bytes(k.0))
            .ok_or_else(|| CryptoError::InvalidKey("check scalar failed".into()))?;
        Ok(Self { scalar })
    }

    pub fn key(&self) -> Key {
        Key(self.scalar.to_bytes())
    }

    pub fn public(&self) -> PublicKey {
        PublicKey::from_point(EdwardsPoint::mul_base(&self.scalar))
    }

    pub fn add_private(&self, other: &PrivateKey) -> PrivateKey {
        PrivateKey {
            scalar: self.scalar + other.scalar,
        }
    }

    pub fn scalar_mult(&self, public: &PublicKey) -> PublicKey {
        PublicKey::from_point(self.scalar * public.point)
    }

    /// Schnorr signature over the raw scalar: the nonce is the wide
    /// reduction of SHA-512(scalar || message), the challenge the wide
    /// reduction of SHA-512(R || A || message).
    pub fn sign(&self, message: &[u8]) -> Signature {
        let mut h = Sha512::new();
        h.update(self.scalar.as_bytes());
        h.update(message);
        let digest: [u8; 64] = h.finalize().into();
        let r = Scalar::from_bytes_mod_order_wide(&digest);
        let big_r = EdwardsPoint::mul_base(&r).compress();

        let public = self.public();
        let mut h = Sha512::new();
        h.update(big_r.as_bytes());
        h.update(public.compressed.as_bytes());
        h.update(message);
        let digest: [u8; 64] = h.finalize().into();
        let hram = Scalar::from_bytes_mod_order_wide(&digest);

        let s = hram * self.scalar + r;
        let mut sig = [0u8; 64];
        sig[..32].copy_from_slice(big_r.as_bytes());
        sig[32..].copy_from_slice(&s.to_bytes());
        Signature(sig)
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            scalar: self.scalar,
        }
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(…)")
    }
}

/// A curve25519 point, kept in both decompressed and compressed form.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    point: EdwardsPoint,
    compressed: CompressedEdwardsY,
}

impl PublicKey {
    fn from_point(point: EdwardsPoint) -> Self {
        Self {
            point,
            compressed: point.compress(),
        }
    }

    pub fn from_key(k: &Key) -> Result<Self, CryptoError> {
        let compressed = CompressedEdwardsY(k.0);
        let point = compressed
            .decompress()
            .ok_or_else(|| CryptoError::InvalidKey("check key failed".into()))?;
        Ok(Self { point, compressed })
    }

    pub fn key(&self) -> Key {
        Key(self.compressed.to_bytes())
    }

    pub fn add_public(&self, other: &PublicKey) -> PublicKey {
        Self::from_point(self.point + other.point)
    }

    pub fn sub_public(&self, other: &PublicKey) -> PublicKey {
        Self::from_point(self.point - other.point)
    }

    /// Hash-to-scalar of `point || uvarint(index)`: the digest and its
    /// re-digest are concatenated and wide-reduced.
    pub fn scalar_hash(&self, output_index: u64) -> PrivateKey {
        let mut tmp = [0u8; 10];
        let n = put_uvarint(&mut tmp, output_index);

        let mut buf = Vec::with_capacity(self.compressed.as_bytes().len() + n);
        buf.extend_from_slice(self.compressed.as_bytes());
        buf.extend_from_slice(&tmp[..n]);

        let h1 = new_hash(&buf);
        let h2 = new_hash(&h1.0);
        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(&h1.0);
        wide[32..].copy_from_slice(&h2.0);
        PrivateKey {
            scalar: Scalar::from_bytes_mod_order_wide(&wide),
        }
    }

    /// Deterministic private view key from a public spend key: the flavor
    /// digest of the key, doubled and wide-reduced.
    pub fn deterministic_hash_derive(&self) -> PrivateKey {
        let seed = new_hash(self.compressed.as_bytes());
        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(&seed.0);
        wide[32..].copy_from_slice(&seed.0);
        PrivateKey {
            scalar: Scalar::from_bytes_mod_order_wide(&wide),
        }
    }

    pub fn verify(&self, message: &[u8], sig: &Signature) -> bool {
        let mut r_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&sig.0[..32]);
        let big_r = CompressedEdwardsY(r_bytes);

        let mut s_bytes = [0u8; 32];
        s_bytes.copy_from_slice(&sig.0[32..]);
        let s = match Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) {
            Some(s) => s,
            None => return false,
        };

        let mut h = Sha512::new();
        h.update(big_r.as_bytes());
        h.update(self.compressed.as_bytes());
        h.update(message);
        let digest: [u8; 64] = h.finalize().into();
        let hram = Scalar::from_bytes_mod_order_wide(&digest);

        // s·G == R + hram·A  ⇔  R == s·G − hram·A
        let expected =
            EdwardsPoint::vartime_double_scalar_mul_basepoint(&-hram, &self.point, &s);
        expected.compress() == big_r
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.key())
    }
}

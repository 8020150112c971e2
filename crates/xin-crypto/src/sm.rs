use num_bigint::BigUint;
use sm2::dsa::signature::{Signer, Verifier};
use sm2::dsa::{Signature as DsaSignature, SigningKey, VerifyingKey};
use sm2::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use sm2::elliptic_curve::{Group, PrimeField};
use sm2::{AffinePoint, EncodedPoint, ProjectivePoint, Scalar, SecretKey};

use crate::key::Signature;
use crate::{new_hash, put_uvarint, CryptoError, Key};

/// Distinguishing identifier used by the signature scheme.
const DEFAULT_UID: &str = "1234567812345678";

/// Curve group order n, big-endian.
const ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0x72, 0x03, 0xdf, 0x6b, 0x21, 0xc6, 0x05, 0x2b, 0x53, 0xbb, 0xf4, 0x09, 0x39, 0xd5,
    0x41, 0x23,
];

fn scalar_from_wide(wide: &[u8; 64]) -> Result<Scalar, CryptoError> {
    let n = BigUint::from_bytes_be(&ORDER);
    let d = BigUint::from_bytes_be(wide) % &n;
    if d == BigUint::default() {
        return Err(CryptoError::InvalidSeed);
    }
    let bytes = d.to_bytes_be();
    let mut repr = [0u8; 32];
    repr[32 - bytes.len()..].copy_from_slice(&bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr.into()))
        .ok_or_else(|| CryptoError::InvalidKey("scalar out of range".into()))
}

/// A scalar on the custom curve. Serialized keys carry a 0x00 tag byte
/// followed by the big-endian scalar.
pub struct PrivateKey {
    scalar: Scalar,
}

impl PrivateKey {
    pub fn from_seed(seed: &[u8; 64]) -> Result<Self, CryptoError> {
        let h = new_hash(seed);
        let mut wide = [0u8; 64];
        wide[32..].copy_from_slice(&h.0);
        Ok(Self {
            scalar: scalar_from_wide(&wide)?,
        })
    }

    pub fn from_key(k: &Key) -> Result<Self, CryptoError> {
        if k.0[0] != 0 {
            return Err(CryptoError::InvalidKey(format!(
                "invalid key with prefix: {}",
                k.0[0]
            )));
        }
        let mut repr = [0u8; 32];
        repr.copy_from_slice(&k.0[1..]);
        let scalar = Option::<Scalar>::from(Scalar::from_repr(repr.into()))
            .ok_or_else(|| CryptoError::InvalidKey("scalar out of range".into()))?;
        Ok(Self { scalar })
    }

    pub fn key(&self) -> Key {
        let mut out = [0u8; crate::KEY_SIZE];
        out[1..].copy_from_slice(&self.scalar.to_repr());
        Key(out)
    }

    pub fn public(&self) -> PublicKey {
        PublicKey::from_point(ProjectivePoint::generator() * self.scalar)
    }

    pub fn add_private(&self, other: &PrivateKey) -> PrivateKey {
        PrivateKey {
            scalar: self.scalar + other.scalar,
        }
    }

    pub fn scalar_mult(&self, public: &PublicKey) -> PublicKey {
        PublicKey::from_point(public.point * self.scalar)
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let secret = SecretKey::from_bytes(&self.scalar.to_repr())
            .expect("non-zero scalar is a valid secret key");
        let signing = SigningKey::new(DEFAULT_UID, &secret)
            .expect("default distinguishing id is valid");
        let sig: DsaSignature = signing.sign(message);
        let mut out = [0u8; 64];
        out.copy_from_slice(&sig.to_bytes());
        Signature(out)
    }
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            scalar: self.scalar,
        }
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey(…)")
    }
}

/// A point on the custom curve, kept with its 33-byte compressed encoding.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    point: ProjectivePoint,
    compressed: [u8; crate::KEY_SIZE],
}

impl PublicKey {
    fn from_point(point: ProjectivePoint) -> Self {
        let encoded = point.to_affine().to_encoded_point(true);
        let mut compressed = [0u8; crate::KEY_SIZE];
        compressed.copy_from_slice(encoded.as_bytes());
        Self { point, compressed }
    }

    pub fn from_key(k: &Key) -> Result<Self, CryptoError> {
        if k.0[0] != 2 && k.0[0] != 3 {
            return Err(CryptoError::InvalidKey(format!(
                "invalid key with prefix: {}",
                k.0[0]
            )));
        }
        let encoded = EncodedPoint::from_bytes(k.0)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let affine = Option::<AffinePoint>::from(AffinePoint::from_encoded_point(&encoded))
            .ok_or_else(|| CryptoError::InvalidKey("check key failed".into()))?;
        Ok(Self {
            point: ProjectivePoint::from(affine),
            compressed: k.0,
        })
    }

    pub fn key(&self) -> Key {
        Key(self.compressed)
    }

    pub fn add_public(&self, other: &PublicKey) -> PublicKey {
        Self::from_point(self.point + other.point)
    }

    pub fn sub_public(&self, other: &PublicKey) -> PublicKey {
        Self::from_point(self.point - other.point)
    }

    pub fn scalar_hash(&self, output_index: u64) -> PrivateKey {
        let mut tmp = [0u8; 10];
        let n = put_uvarint(&mut tmp, output_index);

        let mut buf = Vec::with_capacity(self.compressed.len() + n);
        buf.extend_from_slice(&self.compressed);
        buf.extend_from_slice(&tmp[..n]);

        let h1 = new_hash(&buf);
        let h2 = new_hash(&h1.0);
        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(&h1.0);
        wide[32..].copy_from_slice(&h2.0);
        PrivateKey {
            scalar: scalar_from_wide(&wide).expect("doubled digest reduces to a scalar"),
        }
    }

    pub fn deterministic_hash_derive(&self) -> PrivateKey {
        let seed = new_hash(&self.compressed);
        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(&seed.0);
        wide[32..].copy_from_slice(&seed.0);
        PrivateKey {
            scalar: scalar_from_wide(&wide).expect("doubled digest reduces to a scalar"),
        }
    }

    pub fn verify(&self, message: &[u8], sig: &Signature) -> bool {
        let affine = self.point.to_affine();
        let public = match sm2::PublicKey::from_affine(affine) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let verifying = match VerifyingKey::new(DEFAULT_UID, &public) {
            Ok(v) => v,
            Err(_) => return false,
        };
        let parsed = match DsaSignature::from_bytes(&sig.0.into()) {
            Ok(s) => s,
            Err(_) => return false,
        };
        verifying.verify(message, &parsed).is_ok()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.key())
    }
}

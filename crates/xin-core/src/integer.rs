use std::cmp::Ordering;
use std::fmt;

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Number of fractional decimal digits carried by every amount.
pub const PRECISION: u32 = 8;

fn unit() -> BigInt {
    BigInt::from(10u64.pow(PRECISION))
}

/// Signed fixed-point-8 amount, stored as an arbitrary-precision integer in
/// the smallest unit.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Integer(BigInt);

impl Integer {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    /// Whole-unit constructor: `from_value(10000)` is "10000.00000000".
    pub fn from_value(v: u64) -> Self {
        Self(BigInt::from(v) * unit())
    }

    /// Parse a decimal string with up to 8 fractional digits.
    pub fn from_string(s: &str) -> Result<Self, Error> {
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match body.split_once('.') {
            Some((i, f)) => (i, f),
            None => (body, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(Error::Syntax(format!("invalid integer {}", s)));
        }
        if frac_part.len() > PRECISION as usize {
            return Err(Error::Syntax(format!("invalid integer precision {}", s)));
        }
        if !int_part.chars().all(|c| c.is_ascii_digit())
            || !frac_part.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::Syntax(format!("invalid integer {}", s)));
        }
        let mut value = if int_part.is_empty() {
            BigInt::zero()
        } else {
            int_part
                .parse::<BigInt>()
                .map_err(|e| Error::Syntax(e.to_string()))?
                * unit()
        };
        if !frac_part.is_empty() {
            let scale = BigInt::from(10u64.pow(PRECISION - frac_part.len() as u32));
            value += frac_part
                .parse::<BigInt>()
                .map_err(|e| Error::Syntax(e.to_string()))?
                * scale;
        }
        if negative {
            value = -value;
        }
        Ok(Self(value))
    }

    pub fn add(&self, other: &Integer) -> Integer {
        Integer(&self.0 + &other.0)
    }

    pub fn sub(&self, other: &Integer) -> Integer {
        Integer(&self.0 - &other.0)
    }

    pub fn mul(&self, m: u64) -> Integer {
        Integer(&self.0 * BigInt::from(m))
    }

    pub fn div(&self, d: u64) -> Integer {
        assert!(d != 0, "division by zero");
        Integer(&self.0 / BigInt::from(d))
    }

    /// -1, 0 or 1.
    pub fn sign(&self) -> i32 {
        match self.0.sign() {
            Sign::Minus => -1,
            Sign::NoSign => 0,
            Sign::Plus => 1,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Big-endian signed-magnitude byte form used by the wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_signed_bytes_be()
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        Self(BigInt::from_signed_bytes_be(b))
    }
}

impl PartialOrd for Integer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Integer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.0.abs();
        let quot = &abs / unit();
        let rem = &abs % unit();
        let sign = if self.0.is_negative() { "-" } else { "" };
        write!(f, "{}{}.{:08}", sign, quot, rem)
    }
}

impl fmt::Debug for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Integer({})", self)
    }
}

impl Serialize for Integer {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&self.to_string())
        } else {
            s.serialize_bytes(&self.to_bytes())
        }
    }
}

impl<'de> Deserialize<'de> for Integer {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct IntegerVisitor;

        impl<'de> serde::de::Visitor<'de> for IntegerVisitor {
            type Value = Integer;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a fixed-point amount")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(Integer::from_bytes(v))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Integer::from_string(v).map_err(E::custom)
            }
        }

        if d.is_human_readable() {
            d.deserialize_str(IntegerVisitor)
        } else {
            d.deserialize_bytes(IntegerVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting_always_carries_eight_digits() {
        assert_eq!(Integer::from_value(10000).to_string(), "10000.00000000");
        assert_eq!(Integer::zero().to_string(), "0.00000000");
        let x = Integer::from_string("12345.54321").unwrap();
        assert_eq!(x.to_string(), "12345.54321000");
    }

    #[test]
    fn subtraction_matches_ledger_change() {
        let utxo = Integer::from_string("8293").unwrap();
        let amount = Integer::from_string("20").unwrap();
        let charge = utxo.sub(&amount);
        assert_eq!(charge.to_string(), "8273.00000000");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Integer::from_string("").is_err());
        assert!(Integer::from_string("-").is_err());
        assert!(Integer::from_string("1.123456789").is_err());
        assert!(Integer::from_string("12a.3").is_err());
    }

    #[test]
    fn negative_amounts_roundtrip() {
        let x = Integer::from_string("-3.5").unwrap();
        assert_eq!(x.to_string(), "-3.50000000");
        assert_eq!(x.sign(), -1);
        let back = Integer::from_bytes(&x.to_bytes());
        assert_eq!(back, x);
    }

    #[test]
    fn mint_style_arithmetic() {
        // year share of the pool: 500000 / 10, nine tenths minted
        let pool = Integer::from_value(500000);
        let year = pool.div(10);
        assert_eq!(year.to_string(), "50000.00000000");
        let minted = year.div(10).mul(9);
        assert_eq!(minted.to_string(), "45000.00000000");
    }

    #[test]
    fn bytes_roundtrip_preserves_ordering() {
        let a = Integer::from_string("1.00000001").unwrap();
        let b = Integer::from_string("1.00000002").unwrap();
        assert!(a < b);
        assert_eq!(Integer::from_bytes(&a.to_bytes()), a);
    }
}

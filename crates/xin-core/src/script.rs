use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const OPERATOR_CMP: u8 = 0xff;
pub const OPERATOR_SUM: u8 = 0xfe;

/// Threshold constant for the mint rounding-diff output. With a single key
/// the resulting script can never be satisfied, which burns the remainder.
pub const OPERATOR_64: u8 = 64;

/// Threshold signature policy: `cmp sum K` — at least K of the output's
/// keys must sign.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new_threshold(k: u8) -> Self {
        Self(vec![OPERATOR_CMP, OPERATOR_SUM, k])
    }

    pub fn verify_format(&self) -> Result<(), Error> {
        if self.0.len() != 3 {
            return Err(Error::Script(format!("invalid script length {}", self.0.len())));
        }
        if self.0[0] != OPERATOR_CMP || self.0[1] != OPERATOR_SUM {
            return Err(Error::Script(format!("invalid script operators {}", self)));
        }
        if self.0[2] < 1 || self.0[2] > 64 {
            return Err(Error::Script(format!("invalid script threshold {}", self.0[2])));
        }
        Ok(())
    }

    pub fn threshold(&self) -> u8 {
        self.0[2]
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self)
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&hex::encode(&self.0))
        } else {
            s.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        struct ScriptVisitor;

        impl<'de> serde::de::Visitor<'de> for ScriptVisitor {
            type Value = Script;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a threshold script")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(Script(v.to_vec()))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(Script(hex::decode(v).map_err(E::custom)?))
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(Script(Vec::new()))
            }
        }

        if d.is_human_readable() {
            d.deserialize_str(ScriptVisitor)
        } else {
            d.deserialize_any(ScriptVisitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_script_encodes_as_fffe() {
        assert_eq!(Script::new_threshold(1).to_string(), "fffe01");
        assert_eq!(Script::new_threshold(2).to_string(), "fffe02");
        assert_eq!(Script::new_threshold(OPERATOR_64).to_string(), "fffe40");
    }

    #[test]
    fn format_validation() {
        assert!(Script::new_threshold(1).verify_format().is_ok());
        assert!(Script::new_threshold(64).verify_format().is_ok());
        assert!(Script::new_threshold(0).verify_format().is_err());
        assert!(Script::new_threshold(65).verify_format().is_err());
        assert!(Script(vec![0xff, 0xfe]).verify_format().is_err());
        assert!(Script(vec![0xfe, 0xff, 1]).verify_format().is_err());
    }
}

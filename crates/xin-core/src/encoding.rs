use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

/// Envelope marker for compressed payloads. Raw msgpack never starts with
/// four zero bytes, so the decoder can accept both forms.
pub const COMPRESSION_MAGIC: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

const ZSTD_LEVEL: i32 = 3;

/// Canonical wire form: self-describing msgpack with struct field names.
pub fn marshal<T: Serialize>(v: &T) -> Vec<u8> {
    rmp_serde::to_vec_named(v).expect("canonical encoding is infallible")
}

pub fn unmarshal<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    rmp_serde::from_slice(data).map_err(|e| Error::Syntax(e.to_string()))
}

pub fn compress_marshal<T: Serialize>(v: &T) -> Vec<u8> {
    let payload = marshal(v);
    let mut out = COMPRESSION_MAGIC.to_vec();
    let compressed =
        zstd::bulk::compress(&payload, ZSTD_LEVEL).expect("in-memory compression is infallible");
    out.extend_from_slice(&compressed);
    out
}

/// Accepts both the compressed envelope and a raw canonical payload.
pub fn decompress_unmarshal<T: DeserializeOwned>(data: &[u8]) -> Result<T, Error> {
    if data.starts_with(&COMPRESSION_MAGIC) {
        let payload = zstd::decode_all(&data[COMPRESSION_MAGIC.len()..])
            .map_err(|e| Error::Syntax(format!("invalid compression {}", e)))?;
        return unmarshal(&payload);
    }
    unmarshal(data)
}

/// Serde adapters for raw byte fields: msgpack `bin` on the wire, hex
/// strings in human-readable formats.
pub mod bytes_serde {
    use std::fmt;

    use serde::de::{Deserializer, Visitor};
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(v: &impl AsRef<[u8]>, s: S) -> Result<S::Ok, S::Error> {
        if s.is_human_readable() {
            s.serialize_str(&hex::encode(v.as_ref()))
        } else {
            s.serialize_bytes(v.as_ref())
        }
    }

    pub(crate) struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a byte string")
        }

        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
            hex::decode(v).map_err(E::custom)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_seq<A: serde::de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        if d.is_human_readable() {
            d.deserialize_str(BytesVisitor)
        } else {
            d.deserialize_any(BytesVisitor)
        }
    }
}

/// Serde adapters for optional byte fields (e.g. a genesis input payload):
/// absent values stay msgpack nil on the wire.
pub mod option_bytes_serde {
    use serde::de::Deserializer;
    use serde::ser::Serializer;

    use super::bytes_serde::BytesVisitor;

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => super::bytes_serde::serialize(bytes, s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        struct OptVisitor;

        impl<'de> serde::de::Visitor<'de> for OptVisitor {
            type Value = Option<Vec<u8>>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "an optional byte string")
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(None)
            }

            fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
                d.deserialize_any(BytesVisitor).map(Some)
            }
        }

        d.deserialize_option(OptVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    #[serde(rename_all = "PascalCase")]
    struct Sample {
        version: u8,
        #[serde(with = "bytes_serde")]
        extra: Vec<u8>,
        #[serde(with = "option_bytes_serde", default)]
        genesis: Option<Vec<u8>>,
    }

    #[test]
    fn marshal_is_canonical() {
        let s = Sample {
            version: 1,
            extra: vec![1, 2, 3],
            genesis: None,
        };
        let a = marshal(&s);
        let decoded: Sample = unmarshal(&a).unwrap();
        assert_eq!(decoded, s);
        assert_eq!(marshal(&decoded), a);
    }

    #[test]
    fn envelope_roundtrip_and_raw_fallback() {
        let s = Sample {
            version: 1,
            extra: vec![0xab; 100],
            genesis: Some(vec![9; 8]),
        };
        let enveloped = compress_marshal(&s);
        assert_eq!(&enveloped[..4], &COMPRESSION_MAGIC);
        let from_env: Sample = decompress_unmarshal(&enveloped).unwrap();
        assert_eq!(from_env, s);

        let raw = marshal(&s);
        let from_raw: Sample = decompress_unmarshal(&raw).unwrap();
        assert_eq!(from_raw, s);
    }

    #[test]
    fn compression_wins_on_repetitive_payloads() {
        let s = Sample {
            version: 1,
            extra: vec![0x55; 4096],
            genesis: None,
        };
        assert!(compress_marshal(&s).len() < marshal(&s).len());
    }

    #[test]
    fn garbage_after_magic_rejected() {
        let mut data = COMPRESSION_MAGIC.to_vec();
        data.extend_from_slice(b"definitely not zstd");
        assert!(decompress_unmarshal::<Sample>(&data).is_err());
    }
}

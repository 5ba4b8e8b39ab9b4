//! Value codecs
//!
//! Value payloads are opaque byte blocks tagged with a type string. The
//! typed user-facing API is a thin adapter over [`ValueKind`]; the runtime
//! [`CodecRegistry`] keyed by type string handles the dynamic cases
//! (encoding defaults declared in configuration documents, rendering
//! payloads for logs). Additional types plug in by registering a codec.

use std::collections::HashMap;

use crate::errors::{CoreError, CoreResult};

// ----------------------------------------------------------------------------
// Typed Codec Trait
// ----------------------------------------------------------------------------

/// A value type with a canonical type string and byte encoding.
pub trait ValueKind: Sized {
    const TYPE_NAME: &'static str;

    fn encode(&self) -> Vec<u8>;
    fn decode(data: &[u8]) -> CoreResult<Self>;
}

fn decode_with<T: serde::de::DeserializeOwned>(type_name: &str, data: &[u8]) -> CoreResult<T> {
    bincode::deserialize(data).map_err(|e| CoreError::codec(type_name, e.to_string()))
}

macro_rules! bincode_value_kind {
    ($ty:ty, $name:literal) => {
        impl ValueKind for $ty {
            const TYPE_NAME: &'static str = $name;

            fn encode(&self) -> Vec<u8> {
                bincode::serialize(self).expect("primitive serialization cannot fail")
            }

            fn decode(data: &[u8]) -> CoreResult<Self> {
                decode_with(Self::TYPE_NAME, data)
            }
        }
    };
}

bincode_value_kind!(f64, "double");
bincode_value_kind!(i64, "int64");
bincode_value_kind!(bool, "boolean");
bincode_value_kind!(String, "string");
bincode_value_kind!(Vec<f64>, "double_vector");

// ----------------------------------------------------------------------------
// Codec Registry
// ----------------------------------------------------------------------------

/// Encode/describe functions for one type string.
pub struct Codec {
    pub type_name: &'static str,
    encode_json: fn(&serde_json::Value) -> Option<Vec<u8>>,
    describe: fn(&[u8]) -> Option<String>,
}

/// Registry of codecs keyed by type string.
pub struct CodecRegistry {
    codecs: HashMap<&'static str, Codec>,
}

impl CodecRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// A registry pre-populated with the standard scalar and vector types.
    pub fn with_standard_types() -> Self {
        let mut registry = Self::empty();
        registry.register(Codec {
            type_name: f64::TYPE_NAME,
            encode_json: |v| v.as_f64().map(|x| x.encode()),
            describe: |d| f64::decode(d).ok().map(|x| x.to_string()),
        });
        registry.register(Codec {
            type_name: i64::TYPE_NAME,
            encode_json: |v| v.as_i64().map(|x| x.encode()),
            describe: |d| i64::decode(d).ok().map(|x| x.to_string()),
        });
        registry.register(Codec {
            type_name: bool::TYPE_NAME,
            encode_json: |v| v.as_bool().map(|x| x.encode()),
            describe: |d| bool::decode(d).ok().map(|x| x.to_string()),
        });
        registry.register(Codec {
            type_name: String::TYPE_NAME,
            encode_json: |v| v.as_str().map(|x| x.to_string().encode()),
            describe: |d| String::decode(d).ok(),
        });
        registry.register(Codec {
            type_name: <Vec<f64>>::TYPE_NAME,
            encode_json: |v| {
                let values: Option<Vec<f64>> =
                    v.as_array().map(|a| a.iter().filter_map(|x| x.as_f64()).collect());
                values.map(|x| x.encode())
            },
            describe: |d| <Vec<f64>>::decode(d).ok().map(|x| format!("{x:?}")),
        });
        registry
    }

    pub fn register(&mut self, codec: Codec) {
        self.codecs.insert(codec.type_name, codec);
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.codecs.contains_key(type_name)
    }

    /// Encode a configuration-document value for the given type string.
    pub fn encode_json(&self, type_name: &str, value: &serde_json::Value) -> CoreResult<Vec<u8>> {
        let codec = self
            .codecs
            .get(type_name)
            .ok_or_else(|| CoreError::codec(type_name, "no codec registered"))?;
        (codec.encode_json)(value)
            .ok_or_else(|| CoreError::codec(type_name, format!("value {value} has the wrong shape")))
    }

    /// Human-readable rendering of a payload; falls back to the byte length
    /// for unknown types or undecodable payloads.
    pub fn describe(&self, type_name: &str, data: &[u8]) -> String {
        self.codecs
            .get(type_name)
            .and_then(|codec| (codec.describe)(data))
            .unwrap_or_else(|| format!("<{} bytes>", data.len()))
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("types", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

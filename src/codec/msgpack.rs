//! MsgPack codec using `rmp-serde` and `rmpv`.
//!
//! Structs are always written as maps (`to_vec_named`). The stateful codec
//! depends on this: field names are what it factors out into shapes.

use rmpv::Value;

use crate::error::{Result, WireError};

/// MessagePack serializer used underneath the stateful codecs.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode a value into a MsgPack value tree, keeping struct field names.
    pub fn to_tree<T: serde::Serialize + ?Sized>(value: &T) -> Result<Value> {
        let bytes = Self::encode(value)?;
        Self::read_tree(&bytes)
    }

    /// Decode a typed value out of a value tree.
    pub fn from_tree<T: serde::de::DeserializeOwned>(tree: &Value) -> Result<T> {
        let bytes = Self::write_tree(tree)?;
        Self::decode(&bytes)
    }

    /// Parse raw MsgPack bytes into a value tree.
    pub fn read_tree(mut bytes: &[u8]) -> Result<Value> {
        Ok(rmpv::decode::read_value(&mut bytes)?)
    }

    /// Serialize a value tree to raw MsgPack bytes.
    pub fn write_tree(tree: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, tree)
            .map_err(|e| WireError::Protocol(format!("cannot write value tree: {}", e)))?;
        Ok(buf)
    }
}

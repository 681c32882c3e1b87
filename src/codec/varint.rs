//! Compact binary encoding with `bincode` defaults (varint integers, little
//! endian). The default codec for plain Rust types.

use super::CodecError;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode_varint<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::DefaultOptions::new().serialize(value)?)
}

pub fn decode_varint<T: DeserializeOwned>(buf: &[u8]) -> Result<T, CodecError> {
    Ok(bincode::DefaultOptions::new().deserialize(buf)?)
}

//! Fixed-layout binary encoding: `bincode` with fixed-width integers and a
//! configurable byte order.

use super::{CodecError, Endian};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode_binary<T>(value: &T, endian: Endian) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let options = bincode::DefaultOptions::new().with_fixint_encoding();
    let bytes = match endian {
        Endian::Little => options.with_little_endian().serialize(value)?,
        Endian::Big => options.with_big_endian().serialize(value)?,
    };
    Ok(bytes)
}

pub fn decode_binary<T: DeserializeOwned>(buf: &[u8], endian: Endian) -> Result<T, CodecError> {
    let options = bincode::DefaultOptions::new().with_fixint_encoding();
    let value = match endian {
        Endian::Little => options.with_little_endian().deserialize(buf)?,
        Endian::Big => options.with_big_endian().deserialize(buf)?,
    };
    Ok(value)
}

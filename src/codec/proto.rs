//! Protocol-buffer encoding via `prost`.

use super::CodecError;

pub fn encode_proto<T: prost::Message>(value: &T) -> Vec<u8> {
    value.encode_to_vec()
}

pub fn decode_proto<T: prost::Message + Default>(buf: &[u8]) -> Result<T, CodecError> {
    Ok(T::decode(buf)?)
}

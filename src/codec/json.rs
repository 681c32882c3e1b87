use super::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode_json<T: DeserializeOwned>(buf: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(buf)?)
}

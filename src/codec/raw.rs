//! Raw byte buffers are messages too: under `Binary` they pass through
//! untouched, under the serde encodings they serialize as byte sequences.

use super::{decode_serde, encode_serde, Codec, CodecError, EncodeType, Message};
use bytes::Bytes;

impl Message for Vec<u8> {
    fn preferred_encoding(&self) -> Option<EncodeType> {
        Some(EncodeType::Binary)
    }

    fn encode(&self, encoding: EncodeType, codec: &Codec) -> Result<Vec<u8>, CodecError> {
        match encoding {
            EncodeType::Binary => Ok(self.clone()),
            other => encode_serde(self, other, codec),
        }
    }

    fn decode(&mut self, encoding: EncodeType, codec: &Codec, buf: &[u8]) -> Result<(), CodecError> {
        match encoding {
            EncodeType::Binary => {
                self.clear();
                self.extend_from_slice(buf);
            }
            other => *self = decode_serde(buf, other, codec)?,
        }
        Ok(())
    }

    crate::__message_any!();
}

impl Message for Bytes {
    fn preferred_encoding(&self) -> Option<EncodeType> {
        Some(EncodeType::Binary)
    }

    fn encode(&self, encoding: EncodeType, _codec: &Codec) -> Result<Vec<u8>, CodecError> {
        match encoding {
            EncodeType::Binary => Ok(self.to_vec()),
            other => Err(CodecError::unsupported::<Self>(other)),
        }
    }

    fn decode(&mut self, encoding: EncodeType, _codec: &Codec, buf: &[u8]) -> Result<(), CodecError> {
        match encoding {
            EncodeType::Binary => {
                *self = Bytes::copy_from_slice(buf);
                Ok(())
            }
            other => Err(CodecError::unsupported::<Self>(other)),
        }
    }

    crate::__message_any!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_is_identity_for_raw_buffers() {
        let codec = Codec::default();
        let raw = vec![0u8, 1, 2, 250];
        assert_eq!(raw.encode(EncodeType::Binary, &codec).unwrap(), raw);

        let mut out = vec![9u8; 3];
        out.decode(EncodeType::Binary, &codec, &raw).unwrap();
        assert_eq!(out, raw);

        let mut bytes = Bytes::new();
        bytes.decode(EncodeType::Binary, &codec, b"ping").unwrap();
        assert_eq!(&bytes[..], b"ping");
        assert!(bytes.encode(EncodeType::Json, &codec).is_err());
    }
}

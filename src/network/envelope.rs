//! # Message Envelope
//!
//! Inside a frame every payload starts with a 4-byte envelope header:
//!
//! ```text
//! +------------------+--------------+-----------------+
//! | encode type u16  | msg id u16   | encoded message |
//! +------------------+--------------+-----------------+
//! ```
//!
//! Both header fields use the network's byte order. [`Parser::marshal`]
//! also reserves the framer's length prefix at the front of the buffer so
//! the writer can frame it without copying.

use crate::codec::{Codec, EncodeType, Message};
use crate::error::{FrameError, NetworkError};
use crate::network::handler::HandlerRegistry;
use bytes::BytesMut;

pub const ENVELOPE_HEADER_LEN: usize = 4;

/// Id used by [`Parser::marshal_unregistered`].
pub const UNREGISTERED_MSG_ID: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parser {
    codec: Codec,
    reserve: usize,
}

impl Parser {
    /// `reserve` is the number of zero bytes left in front of each
    /// marshalled envelope (the framer's header length).
    pub fn new(codec: Codec, reserve: usize) -> Self {
        Self { codec, reserve }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn reserve(&self) -> usize {
        self.reserve
    }

    /// Encodes `msg` under `msg_id`. The encoding is chosen by
    /// [`Codec::select`].
    pub fn marshal(&self, msg_id: u16, msg: &dyn Message) -> Result<BytesMut, NetworkError> {
        let encoding = self.codec.select(msg);
        let body = msg.encode(encoding, &self.codec)?;
        let mut buf = BytesMut::with_capacity(self.reserve + ENVELOPE_HEADER_LEN + body.len());
        buf.resize(self.reserve, 0);
        self.codec.endian.put_u16(&mut buf, encoding.into());
        self.codec.endian.put_u16(&mut buf, msg_id);
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Marshals a message that has no registered id.
    pub fn marshal_unregistered(&self, msg: &dyn Message) -> Result<BytesMut, NetworkError> {
        self.marshal(UNREGISTERED_MSG_ID, msg)
    }

    /// Reads `(encode type, msg id)` from a payload.
    pub fn header(&self, payload: &[u8]) -> Result<(u16, u16), NetworkError> {
        if payload.len() < ENVELOPE_HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: ENVELOPE_HEADER_LEN,
                available: payload.len(),
            }
            .into());
        }
        let endian = self.codec.endian;
        Ok((endian.read_u16(payload), endian.read_u16(&payload[2..])))
    }

    /// Decodes a payload into a fresh instance of the type registered for
    /// its id. An unregistered id fails before anything is instantiated.
    pub fn unmarshal(
        &self,
        payload: &[u8],
        registry: &HandlerRegistry,
    ) -> Result<(u16, Box<dyn Message>), NetworkError> {
        let (raw_type, msg_id) = self.header(payload)?;
        if !registry.contains(msg_id) {
            return Err(NetworkError::UnregisteredMsgId { msg_id });
        }
        let encoding = Self::encode_type(raw_type, msg_id)?;
        let mut msg = registry
            .create(msg_id)
            .ok_or(NetworkError::UnregisteredMsgId { msg_id })?;
        msg.decode(encoding, &self.codec, &payload[ENVELOPE_HEADER_LEN..])?;
        Ok((msg_id, msg))
    }

    /// Decodes a payload into a caller-provided value, ignoring the
    /// registry. Returns the id found in the envelope.
    pub fn unmarshal_into(&self, payload: &[u8], msg: &mut dyn Message) -> Result<u16, NetworkError> {
        let (raw_type, msg_id) = self.header(payload)?;
        let encoding = Self::encode_type(raw_type, msg_id)?;
        msg.decode(encoding, &self.codec, &payload[ENVELOPE_HEADER_LEN..])?;
        Ok(msg_id)
    }

    fn encode_type(raw: u16, msg_id: u16) -> Result<EncodeType, NetworkError> {
        EncodeType::try_from(raw).map_err(|_| NetworkError::UnknownEncodeType {
            encode_type: raw,
            msg_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Endian;
    use crate::error::ErrorKind;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Hello {
        name: String,
        seq: u32,
    }
    crate::serde_message!(Hello);

    fn registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry
            .register::<Hello, _>(7, |_ctx, _msg| Ok(()))
            .unwrap();
        registry
    }

    #[test]
    fn header_layout_and_reserve() {
        let parser = Parser::new(Codec::new(EncodeType::Json, Endian::Little), 2);
        let buf = parser.marshal(7, &Hello::default()).unwrap();
        assert_eq!(&buf[..2], &[0, 0]);
        assert_eq!(&buf[2..6], &[4, 0, 7, 0]);

        let big = Parser::new(Codec::new(EncodeType::Json, Endian::Big), 0);
        let buf = big.marshal(0x0102, &Hello::default()).unwrap();
        assert_eq!(&buf[..4], &[0, 4, 1, 2]);
    }

    #[test]
    fn round_trip_through_registry() {
        let registry = registry();
        for default_type in [EncodeType::Binary, EncodeType::Bincode, EncodeType::Json] {
            let parser = Parser::new(Codec::new(default_type, Endian::Big), 4);
            let hello = Hello { name: "cube".into(), seq: 42 };
            let buf = parser.marshal(7, &hello).unwrap();

            let (id, msg) = parser.unmarshal(&buf[4..], &registry).unwrap();
            assert_eq!(id, 7);
            assert_eq!(msg.downcast_ref::<Hello>(), Some(&hello));
        }
    }

    #[test]
    fn unregistered_id_is_reported() {
        let parser = Parser::new(Codec::default(), 0);
        let buf = parser.marshal(99, &Hello::default()).unwrap();
        let err = parser.unmarshal(&buf, &registry()).unwrap_err();
        assert!(matches!(err, NetworkError::UnregisteredMsgId { msg_id: 99 }));
        assert_eq!(err.kind(), ErrorKind::Unregistered);
    }

    #[test]
    fn unknown_encode_type_is_reported() {
        let parser = Parser::new(Codec::default(), 0);
        let payload = [9, 0, 7, 0, 1, 2];
        let err = parser.unmarshal(&payload, &registry()).unwrap_err();
        assert!(matches!(
            err,
            NetworkError::UnknownEncodeType { encode_type: 9, msg_id: 7 }
        ));
    }

    #[test]
    fn short_payload_is_a_framing_error() {
        let parser = Parser::new(Codec::default(), 0);
        let err = parser.unmarshal(&[1, 0, 7], &registry()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Framing);
    }

    #[test]
    fn unregistered_marshal_and_unmarshal_into() {
        let parser = Parser::new(Codec::default(), 0);
        let buf = parser.marshal_unregistered(&vec![5u8, 6, 7]).unwrap();
        assert_eq!(&buf[..4], &[2, 0, 0, 0]);

        let mut out: Vec<u8> = Vec::new();
        let id = parser.unmarshal_into(&buf, &mut out).unwrap();
        assert_eq!(id, UNREGISTERED_MSG_ID);
        assert_eq!(out, vec![5, 6, 7]);
    }
}

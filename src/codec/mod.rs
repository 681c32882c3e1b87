//! # Codecs
//!
//! Application messages travel as payloads tagged with an [`EncodeType`].
//! A value implements [`Message`] to say which encodings it supports; the
//! [`Codec`] settings pick the encoding for values that do not insist on
//! one and carry the byte order used by the fixed-layout binary codec.
//!
//! | Encoding | Wire id | Backed by |
//! |----------|---------|-----------|
//! | `Nil` | 0 | always fails |
//! | `Protobuf` | 1 | `prost` |
//! | `Binary` | 2 | raw bytes, or `bincode` fixint with the configured endianness |
//! | `Bincode` | 3 | `bincode` default (varint) options |
//! | `Json` | 4 | `serde_json` |
//!
//! Most types get their impl from a macro:
//!
//! ```rust
//! use cube::codec::{Codec, EncodeType, Message};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
//! struct Login {
//!     name: String,
//!     level: u32,
//! }
//! cube::serde_message!(Login);
//!
//! let codec = Codec::default();
//! let login = Login { name: "ada".into(), level: 7 };
//! let bytes = login.encode(EncodeType::Json, &codec).unwrap();
//!
//! let mut decoded = Login::default();
//! decoded.decode(EncodeType::Json, &codec, &bytes).unwrap();
//! assert_eq!(decoded, login);
//! ```

mod binary;
mod json;
mod proto;
mod raw;
mod varint;

pub use binary::{decode_binary, encode_binary};
pub use json::{decode_json, encode_json};
pub use proto::{decode_proto, encode_proto};
pub use varint::{decode_varint, encode_varint};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::BufMut;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any};
use std::fmt;

/// Payload encoding tag carried in every envelope.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u16)]
#[serde(rename_all = "lowercase")]
pub enum EncodeType {
    Nil = 0,
    Protobuf = 1,
    Binary = 2,
    Bincode = 3,
    Json = 4,
}

/// Byte order for integer headers and the fixed-layout binary codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Self::Little => LittleEndian::read_u16(buf),
            Self::Big => BigEndian::read_u16(buf),
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Self::Little => LittleEndian::read_u32(buf),
            Self::Big => BigEndian::read_u32(buf),
        }
    }

    pub fn write_u16(self, buf: &mut [u8], n: u16) {
        match self {
            Self::Little => LittleEndian::write_u16(buf, n),
            Self::Big => BigEndian::write_u16(buf, n),
        }
    }

    pub fn write_u32(self, buf: &mut [u8], n: u32) {
        match self {
            Self::Little => LittleEndian::write_u32(buf, n),
            Self::Big => BigEndian::write_u32(buf, n),
        }
    }

    pub fn put_u16(self, buf: &mut impl BufMut, n: u16) {
        match self {
            Self::Little => buf.put_u16_le(n),
            Self::Big => buf.put_u16(n),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("{type_name} does not support encode type {encoding:?}")]
    Unsupported {
        encoding: EncodeType,
        type_name: &'static str,
    },
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),
}

impl CodecError {
    pub fn unsupported<T: ?Sized>(encoding: EncodeType) -> Self {
        Self::Unsupported {
            encoding,
            type_name: type_name::<T>(),
        }
    }
}

/// Codec settings shared by a network: the fallback encoding and the byte
/// order of the fixed-layout binary codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    pub default_type: EncodeType,
    pub endian: Endian,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            default_type: EncodeType::Bincode,
            endian: Endian::Little,
        }
    }
}

impl Codec {
    pub fn new(default_type: EncodeType, endian: Endian) -> Self {
        Self {
            default_type,
            endian,
        }
    }

    /// The encoding used to marshal `msg`.
    pub fn select(&self, msg: &dyn Message) -> EncodeType {
        msg.preferred_encoding().unwrap_or(self.default_type)
    }
}

/// A value that can travel as an envelope payload.
pub trait Message: Any + Send + fmt::Debug {
    /// Encoding this type insists on, if any. Protocol-buffer types and raw
    /// byte buffers return `Some`; everything else follows
    /// [`Codec::default_type`].
    fn preferred_encoding(&self) -> Option<EncodeType> {
        None
    }

    fn encode(&self, encoding: EncodeType, codec: &Codec) -> Result<Vec<u8>, CodecError>;

    /// Overwrites `self` with the value decoded from `buf`.
    fn decode(&mut self, encoding: EncodeType, codec: &Codec, buf: &[u8]) -> Result<(), CodecError>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl dyn Message {
    pub fn is<T: Message>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Message>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    pub fn downcast<T: Message>(self: Box<Self>) -> Option<Box<T>> {
        self.into_any().downcast().ok()
    }
}

/// Encodes a serde value with any of the serde-backed encodings.
pub fn encode_serde<T: Serialize + ?Sized>(
    value: &T,
    encoding: EncodeType,
    codec: &Codec,
) -> Result<Vec<u8>, CodecError> {
    match encoding {
        EncodeType::Binary => encode_binary(value, codec.endian),
        EncodeType::Bincode => encode_varint(value),
        EncodeType::Json => encode_json(value),
        EncodeType::Nil | EncodeType::Protobuf => Err(CodecError::unsupported::<T>(encoding)),
    }
}

pub fn decode_serde<T: DeserializeOwned>(
    buf: &[u8],
    encoding: EncodeType,
    codec: &Codec,
) -> Result<T, CodecError> {
    match encoding {
        EncodeType::Binary => decode_binary(buf, codec.endian),
        EncodeType::Bincode => decode_varint(buf),
        EncodeType::Json => decode_json(buf),
        EncodeType::Nil | EncodeType::Protobuf => Err(CodecError::unsupported::<T>(encoding)),
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __message_any {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn into_any(self: ::std::boxed::Box<Self>) -> ::std::boxed::Box<dyn ::std::any::Any> {
            self
        }
    };
}

/// Implements [`Message`](crate::codec::Message) for serde types. They
/// encode with `Binary`, `Bincode` or `Json` and follow the codec default.
#[macro_export]
macro_rules! serde_message {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::codec::Message for $ty {
            fn encode(
                &self,
                encoding: $crate::codec::EncodeType,
                codec: &$crate::codec::Codec,
            ) -> ::std::result::Result<::std::vec::Vec<u8>, $crate::codec::CodecError> {
                $crate::codec::encode_serde(self, encoding, codec)
            }

            fn decode(
                &mut self,
                encoding: $crate::codec::EncodeType,
                codec: &$crate::codec::Codec,
                buf: &[u8],
            ) -> ::std::result::Result<(), $crate::codec::CodecError> {
                *self = $crate::codec::decode_serde(buf, encoding, codec)?;
                ::std::result::Result::Ok(())
            }

            $crate::__message_any!();
        }
    )+};
}

/// Implements [`Message`](crate::codec::Message) for `prost` types. They
/// always travel as `Protobuf`.
#[macro_export]
macro_rules! proto_message {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::codec::Message for $ty {
            fn preferred_encoding(&self) -> ::std::option::Option<$crate::codec::EncodeType> {
                ::std::option::Option::Some($crate::codec::EncodeType::Protobuf)
            }

            fn encode(
                &self,
                encoding: $crate::codec::EncodeType,
                _codec: &$crate::codec::Codec,
            ) -> ::std::result::Result<::std::vec::Vec<u8>, $crate::codec::CodecError> {
                match encoding {
                    $crate::codec::EncodeType::Protobuf => {
                        ::std::result::Result::Ok($crate::codec::encode_proto(self))
                    }
                    other => ::std::result::Result::Err(
                        $crate::codec::CodecError::unsupported::<Self>(other),
                    ),
                }
            }

            fn decode(
                &mut self,
                encoding: $crate::codec::EncodeType,
                _codec: &$crate::codec::Codec,
                buf: &[u8],
            ) -> ::std::result::Result<(), $crate::codec::CodecError> {
                match encoding {
                    $crate::codec::EncodeType::Protobuf => {
                        *self = $crate::codec::decode_proto(buf)?;
                        ::std::result::Result::Ok(())
                    }
                    other => ::std::result::Result::Err(
                        $crate::codec::CodecError::unsupported::<Self>(other),
                    ),
                }
            }

            $crate::__message_any!();
        }
    )+};
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Move {
        x: i32,
        y: i32,
        tag: String,
    }
    crate::serde_message!(Move);

    #[derive(Clone, PartialEq, prost::Message)]
    struct Chat {
        #[prost(string, tag = "1")]
        text: String,
        #[prost(uint32, tag = "2")]
        channel: u32,
    }
    crate::proto_message!(Chat);

    #[test]
    fn encode_type_wire_ids() {
        assert_eq!(u16::from(EncodeType::Nil), 0);
        assert_eq!(u16::from(EncodeType::Protobuf), 1);
        assert_eq!(u16::from(EncodeType::Json), 4);
        assert_eq!(EncodeType::try_from(2u16).unwrap(), EncodeType::Binary);
        assert!(EncodeType::try_from(5u16).is_err());
    }

    #[test]
    fn selection_follows_type_then_default() {
        let codec = Codec::new(EncodeType::Json, Endian::Little);
        assert_eq!(codec.select(&Move::default()), EncodeType::Json);
        assert_eq!(codec.select(&Chat::default()), EncodeType::Protobuf);
        assert_eq!(codec.select(&vec![1u8, 2]), EncodeType::Binary);
        assert_eq!(codec.select(&Bytes::from_static(b"x")), EncodeType::Binary);
    }

    #[test]
    fn serde_encodings_round_trip() {
        let value = Move { x: -3, y: 9, tag: "dash".into() };
        for endian in [Endian::Little, Endian::Big] {
            let codec = Codec::new(EncodeType::Bincode, endian);
            for encoding in [EncodeType::Binary, EncodeType::Bincode, EncodeType::Json] {
                let bytes = value.encode(encoding, &codec).unwrap();
                let mut out = Move::default();
                out.decode(encoding, &codec, &bytes).unwrap();
                assert_eq!(out, value, "{encoding:?} {endian:?}");
            }
        }
    }

    #[test]
    fn binary_codec_honours_endianness() {
        let little = encode_binary(&0x0102u16, Endian::Little).unwrap();
        let big = encode_binary(&0x0102u16, Endian::Big).unwrap();
        assert_eq!(little, vec![0x02, 0x01]);
        assert_eq!(big, vec![0x01, 0x02]);
    }

    #[test]
    fn proto_round_trip_and_rejects_other_encodings() {
        let codec = Codec::default();
        let chat = Chat { text: "hi".into(), channel: 3 };
        let bytes = chat.encode(EncodeType::Protobuf, &codec).unwrap();
        let mut out = Chat::default();
        out.decode(EncodeType::Protobuf, &codec, &bytes).unwrap();
        assert_eq!(out, chat);

        let err = chat.encode(EncodeType::Json, &codec).unwrap_err();
        assert!(matches!(err, CodecError::Unsupported { encoding: EncodeType::Json, .. }));
    }

    #[test]
    fn nil_encoding_always_fails() {
        let codec = Codec::default();
        assert!(Move::default().encode(EncodeType::Nil, &codec).is_err());
        let mut out = Move::default();
        assert!(out.decode(EncodeType::Nil, &codec, &[]).is_err());
    }

    #[test]
    fn downcasting_boxed_messages() {
        let msg: Box<dyn Message> = Box::new(Move { x: 1, ..Default::default() });
        assert!(msg.is::<Move>());
        assert!(msg.downcast_ref::<Chat>().is_none());
        assert_eq!(msg.downcast::<Move>().unwrap().x, 1);
    }
}

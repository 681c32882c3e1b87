//! # Packet Framer
//!
//! Splits a byte stream into packets with a length prefix:
//!
//! ```text
//! +----------------+------------------+
//! | len (1/2/4 B)  | payload (len B)  |
//! +----------------+------------------+
//! ```
//!
//! The prefix counts payload bytes only. Its width and byte order are
//! configurable and every length is checked against `[min, max]` before a
//! single byte is written or the payload is read.
//!
//! Encoding works in place: the envelope parser reserves
//! [`Framer::header_len`] zero bytes at the front of each outgoing buffer
//! and [`Framer::encode`] fills them in, so framing never copies the payload.

use crate::codec::Endian;
use crate::error::FrameError;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenField {
    U8,
    U16,
    U32,
}

impl LenField {
    pub fn from_width(width: u32) -> Option<Self> {
        match width {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            _ => None,
        }
    }

    pub fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Largest length the field can represent.
    pub fn max_len(self) -> u32 {
        match self {
            Self::U8 => u8::MAX as u32,
            Self::U16 => u16::MAX as u32,
            Self::U32 => u32::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framer {
    len_field: LenField,
    min: u32,
    max: u32,
    endian: Endian,
}

impl Default for Framer {
    fn default() -> Self {
        Self {
            len_field: LenField::U16,
            min: 1,
            max: 4096,
            endian: Endian::Little,
        }
    }
}

impl Framer {
    /// Builds a framer from raw settings. An unsupported width keeps the
    /// 2-byte default, a zero bound keeps the default bound, and both bounds
    /// are clamped to what the width can represent.
    pub fn new(len_width: u32, min: u32, max: u32, endian: Endian) -> Self {
        let mut framer = Self {
            endian,
            ..Self::default()
        };
        framer.set_msg_len(len_width, min, max);
        framer
    }

    /// Applies new length settings and returns the effective
    /// `(width, min, max)`.
    pub fn set_msg_len(&mut self, len_width: u32, min: u32, max: u32) -> (u32, u32, u32) {
        if let Some(field) = LenField::from_width(len_width) {
            self.len_field = field;
        }
        if min != 0 {
            self.min = min;
        }
        if max != 0 {
            self.max = max;
        }
        let limit = self.len_field.max_len();
        self.min = self.min.min(limit);
        self.max = self.max.min(limit);
        (self.len_field.width() as u32, self.min, self.max)
    }

    pub fn header_len(&self) -> usize {
        self.len_field.width()
    }

    pub fn min_len(&self) -> u32 {
        self.min
    }

    pub fn max_len(&self) -> u32 {
        self.max
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    fn check(&self, len: usize) -> Result<(), FrameError> {
        if len < self.min as usize || len > self.max as usize {
            return Err(FrameError::LengthOutOfRange {
                len,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Writes the length prefix into the first [`header_len`](Self::header_len)
    /// bytes of `frame`; the rest of `frame` is the payload.
    pub fn encode(&self, frame: &mut [u8]) -> Result<(), FrameError> {
        let header = self.header_len();
        if frame.len() < header {
            return Err(FrameError::Truncated {
                needed: header,
                available: frame.len(),
            });
        }
        let len = frame.len() - header;
        self.check(len)?;
        match self.len_field {
            LenField::U8 => frame[0] = len as u8,
            LenField::U16 => self.endian.write_u16(frame, len as u16),
            LenField::U32 => self.endian.write_u32(frame, len as u32),
        }
        Ok(())
    }

    /// Frames `payload` into a freshly allocated buffer.
    pub fn frame(&self, payload: &[u8]) -> Result<BytesMut, FrameError> {
        self.check(payload.len())?;
        let mut frame = BytesMut::zeroed(self.header_len());
        frame.extend_from_slice(payload);
        self.encode(&mut frame)?;
        Ok(frame)
    }

    fn read_len(&self, header: &[u8]) -> usize {
        match self.len_field {
            LenField::U8 => header[0] as usize,
            LenField::U16 => self.endian.read_u16(header) as usize,
            LenField::U32 => self.endian.read_u32(header) as usize,
        }
    }

    /// Validates a complete frame held in memory (one WebSocket message)
    /// and returns its payload. The message must end where the frame does.
    pub fn decode(&self, frame: Bytes) -> Result<Bytes, FrameError> {
        let header = self.header_len();
        if frame.len() < header {
            return Err(FrameError::Truncated {
                needed: header,
                available: frame.len(),
            });
        }
        let len = self.read_len(&frame);
        self.check(len)?;
        let end = header + len;
        if frame.len() < end {
            return Err(FrameError::Truncated {
                needed: end,
                available: frame.len(),
            });
        }
        if frame.len() > end {
            return Err(FrameError::TrailingBytes {
                len: end,
                extra: frame.len() - end,
            });
        }
        Ok(frame.slice(header..end))
    }

    /// Reads exactly one frame from `reader` and returns its payload. The
    /// payload is not read when the prefix is out of bounds.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Bytes, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; 4];
        let header = &mut header[..self.header_len()];
        reader.read_exact(header).await?;
        let len = self.read_len(header);
        self.check(len)?;
        let mut payload = BytesMut::zeroed(len);
        reader.read_exact(&mut payload).await?;
        Ok(payload.freeze())
    }
}

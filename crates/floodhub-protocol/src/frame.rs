//! Command frames.
//!
//! A [`CommandFrame`] is an immutable, already-checksummed byte sequence that
//! can be handed to the radio as-is. Frames only come out of
//! [`FrameBuilder::build`] or [`CommandFrame::parse`], so every value of the
//! type is well formed and within the length bound.
//!
//! # Wire Format
//!
//! ```text
//! AA 11 04 01 B2 F9
//! ^^ ^^ ^^ ^^ ^^^^^
//! |  |  |  |  CRC-16/MODBUS of the first 4 bytes, little-endian
//! |  |  |  payload
//! |  |  header + payload length
//! |  opcode
//! header
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use floodhub_core::{Error, Result, constants::*};
use std::fmt;

use crate::crc::crc16_modbus;

/// A validated command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    data: Bytes,
}

impl CommandFrame {
    /// Parse and validate a complete frame.
    ///
    /// # Errors
    ///
    /// - `Error::FrameTooLarge` if `bytes` is longer than [`MAX_FRAME_LEN`]
    /// - `Error::InvalidFrame` on a bad header or a length byte that does not
    ///   match the buffer
    /// - `Error::ChecksumMismatch` if the trailing CRC is wrong
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge {
                size: bytes.len(),
                max_size: MAX_FRAME_LEN,
            });
        }
        if bytes.len() < FRAME_OVERHEAD {
            return Err(Error::invalid_frame(format!(
                "{} bytes is shorter than the {FRAME_OVERHEAD}-byte minimum",
                bytes.len()
            )));
        }
        if bytes[0] != FRAME_HEADER {
            return Err(Error::invalid_frame(format!(
                "expected header 0x{FRAME_HEADER:02X}, got 0x{:02X}",
                bytes[0]
            )));
        }

        let declared = usize::from(bytes[2]);
        if declared + FRAME_CRC_LEN != bytes.len() || declared < FRAME_HEADER_LEN {
            return Err(Error::invalid_frame(format!(
                "length byte {declared} does not match a {}-byte frame",
                bytes.len()
            )));
        }

        let frame = Self {
            data: Bytes::copy_from_slice(bytes),
        };
        let expected = crc16_modbus(frame.checked_region());
        let actual = frame.checksum();
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok(frame)
    }

    pub fn opcode(&self) -> u8 {
        self.data[1]
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[FRAME_HEADER_LEN..self.data.len() - FRAME_CRC_LEN]
    }

    /// Checksum carried in the last two bytes.
    pub fn checksum(&self) -> u16 {
        let n = self.data.len();
        u16::from_le_bytes([self.data[n - 2], self.data[n - 1]])
    }

    /// Recompute the checksum and compare it to the trailing bytes.
    pub fn verify_checksum(&self) -> bool {
        crc16_modbus(self.checked_region()) == self.checksum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Cheap clone of the underlying buffer.
    pub fn to_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn checked_region(&self) -> &[u8] {
        &self.data[..self.data.len() - FRAME_CRC_LEN]
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, byte) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Builder for [`CommandFrame`].
///
/// The length bound is checked before anything is written, so a failed build
/// never yields a partial frame.
///
/// # Example
///
/// ```
/// use floodhub_protocol::FrameBuilder;
///
/// let frame = FrameBuilder::new(0x11).payload(&[0x01]).build().unwrap();
/// assert_eq!(frame.as_bytes(), &[0xAA, 0x11, 0x04, 0x01, 0xB2, 0xF9]);
/// ```
#[derive(Debug, Clone)]
pub struct FrameBuilder<'a> {
    opcode: u8,
    payload: &'a [u8],
    max_len: usize,
}

impl<'a> FrameBuilder<'a> {
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            payload: &[],
            max_len: MAX_FRAME_LEN,
        }
    }

    pub fn payload(mut self, payload: &'a [u8]) -> Self {
        self.payload = payload;
        self
    }

    /// Tighten the length bound. Values above [`MAX_FRAME_LEN`] are capped,
    /// since the length byte and fixture buffers can not grow past it.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.min(MAX_FRAME_LEN);
        self
    }

    /// Total length the frame would have.
    pub fn frame_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Build the frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::FrameTooLarge` if the frame would exceed the bound.
    pub fn build(self) -> Result<CommandFrame> {
        let size = self.frame_len();
        if size > self.max_len {
            return Err(Error::FrameTooLarge {
                size,
                max_size: self.max_len,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(FRAME_HEADER);
        buf.put_u8(self.opcode);
        // size <= MAX_FRAME_LEN, so this fits in a byte
        buf.put_u8((FRAME_HEADER_LEN + self.payload.len()) as u8);
        buf.put_slice(self.payload);
        let crc = crc16_modbus(&buf);
        buf.put_u16_le(crc);

        Ok(CommandFrame { data: buf.freeze() })
    }
}

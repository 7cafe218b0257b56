//! Tokio codec for fixture command frames.
//!
//! [`LightCodec`] implements:
//! - [`Encoder<LightCommand>`]: encodes a command straight into a byte buffer
//! - [`Decoder`]: pulls [`CommandFrame`]s out of a byte stream
//!
//! The decoder drops any bytes ahead of the `0xAA` header, so it resyncs after
//! line noise or a partial write. A frame whose length byte is out of range,
//! or whose checksum fails, is consumed and reported as an error; decoding can
//! continue on the same buffer afterwards.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use floodhub_protocol::{LightCodec, LightCommand};
//!
//! let mut codec = LightCodec::new();
//! let mut buf = BytesMut::new();
//! codec.encode(LightCommand::power(true), &mut buf).unwrap();
//!
//! let frame = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(frame.payload(), &[0x01]);
//! ```

use bytes::{Buf, BytesMut};
use floodhub_core::{Error, Result, constants::*};
use tokio_util::codec::{Decoder, Encoder};

use crate::{commands::LightCommand, frame::CommandFrame};

/// Codec for command frames.
#[derive(Debug, Clone)]
pub struct LightCodec {
    max_frame_len: usize,
}

impl LightCodec {
    pub fn new() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Codec with a tighter frame bound. Values above [`MAX_FRAME_LEN`] are
    /// capped.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(MAX_FRAME_LEN),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for LightCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LightCodec {
    type Item = CommandFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // Resync on the header byte
        match src.iter().position(|&b| b == FRAME_HEADER) {
            Some(0) => {}
            Some(skip) => src.advance(skip),
            None => {
                src.clear();
                return Ok(None);
            }
        }

        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let declared = usize::from(src[2]);
        let frame_len = declared + FRAME_CRC_LEN;
        if declared < FRAME_HEADER_LEN {
            src.advance(1);
            return Err(Error::invalid_frame(format!(
                "declared length {declared} is shorter than the {FRAME_HEADER_LEN}-byte header"
            )));
        }
        if frame_len > self.max_frame_len {
            // Drop the header so the next call looks further along.
            src.advance(1);
            return Err(Error::FrameTooLarge {
                size: frame_len,
                max_size: self.max_frame_len,
            });
        }

        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let raw = src.split_to(frame_len);
        CommandFrame::parse(&raw).map(Some)
    }
}

impl Encoder<LightCommand> for LightCodec {
    type Error = Error;

    fn encode(&mut self, item: LightCommand, dst: &mut BytesMut) -> Result<()> {
        let frame = item.to_frame()?;
        if frame.len() > self.max_frame_len {
            return Err(Error::FrameTooLarge {
                size: frame.len(),
                max_size: self.max_frame_len,
            });
        }
        dst.extend_from_slice(frame.as_bytes());
        Ok(())
    }
}

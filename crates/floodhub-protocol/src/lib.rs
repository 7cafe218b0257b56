//! Wire protocol spoken by floodlight fixtures.
//!
//! - [`crc`]: CRC-16/MODBUS checksum
//! - [`frame`]: bounded command frames and their builder
//! - [`commands`]: typed light commands mapped onto frames
//! - [`notification`]: status notification decoding
//! - [`codec`]: `tokio_util` encoder/decoder for frame streams

pub mod codec;
pub mod commands;
pub mod crc;
pub mod frame;
pub mod notification;

pub use codec::LightCodec;
pub use commands::LightCommand;
pub use crc::crc16_modbus;
pub use frame::{CommandFrame, FrameBuilder};
pub use notification::{PowerReport, decode_notification};

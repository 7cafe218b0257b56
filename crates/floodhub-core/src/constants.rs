//! Protocol and engine constants for the floodhub gateway.
//!
//! Fixtures speak a small binary protocol over a vendor GATT service. Every
//! command frame has the same shape:
//!
//! ```text
//! [0xAA][opcode][len][payload...][crc_lo][crc_hi]
//! ```
//!
//! Where:
//! - `0xAA` - frame header ([`FRAME_HEADER`])
//! - `opcode` - command selector (see the `OPCODE_*` constants)
//! - `len` - header plus payload length, i.e. `3 + payload.len()`
//! - `crc` - CRC-16/MODBUS over the first `len` bytes, little-endian
//!
//! # Usage
//!
//! ```
//! use floodhub_core::constants::*;
//!
//! assert_eq!(FRAME_OVERHEAD, 5);
//! assert!(FRAME_HEADER_LEN + 7 + FRAME_CRC_LEN <= MAX_FRAME_LEN);
//! ```

// ============================================================================
// Frame Layout
// ============================================================================

/// First byte of every command frame.
pub const FRAME_HEADER: u8 = 0xAA;

/// Header bytes: start marker, opcode, length.
pub const FRAME_HEADER_LEN: usize = 3;

/// Trailing checksum bytes.
pub const FRAME_CRC_LEN: usize = 2;

/// Fixed bytes added around a payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_LEN + FRAME_CRC_LEN;

/// Largest frame a fixture accepts.
///
/// The colour command (7-byte payload) fills this exactly.
pub const MAX_FRAME_LEN: usize = 12;

/// Largest payload that still fits in [`MAX_FRAME_LEN`].
pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - FRAME_OVERHEAD;

// ============================================================================
// Opcodes
// ============================================================================

/// Power on/off. Payload: `0x00` or `0x01`.
pub const OPCODE_POWER: u8 = 0x11;

/// Brightness. Payload: one raw byte, 0-100.
pub const OPCODE_BRIGHTNESS: u8 = 0x13;

/// Colour. Payload: `r, g, b, r, g, b, 0x64`.
pub const OPCODE_COLOR: u8 = 0x17;

/// Upper bound for the brightness payload.
pub const MAX_BRIGHTNESS: u8 = 100;

/// Trailing byte of the colour payload.
pub const COLOR_TRAILER: u8 = 0x64;

// ============================================================================
// Notifications
// ============================================================================

/// Notifications at or below this length carry no state.
pub const MIN_NOTIFICATION_LEN: usize = 6;

/// Offset of the power flag inside a status notification.
pub const NOTIFY_POWER_OFFSET: usize = 3;

/// Value of the power flag when the fixture is lit.
pub const NOTIFY_POWER_ON: u8 = 0x01;

// ============================================================================
// GATT Identifiers
// ============================================================================

/// Vendor control service.
pub const SERVICE_UUID: u16 = 0xFFA0;

/// Characteristic accepting command frames.
pub const WRITE_CHAR_UUID: u16 = 0xFFA1;

/// Characteristic emitting status notifications.
pub const NOTIFY_CHAR_UUID: u16 = 0xFFA2;

/// Client characteristic configuration descriptor.
pub const CCCD_UUID: u16 = 0x2902;

/// CCCD value enabling notifications (little-endian `0x0001`).
pub const CCCD_ENABLE_NOTIFY: [u8; 2] = [0x01, 0x00];

// ============================================================================
// Registry
// ============================================================================

/// Number of fixtures a hub manages.
pub const MAX_DEVICES: usize = 3;

/// Longest advertised name kept for a fixture, in bytes.
pub const MAX_NAME_LEN: usize = 31;

/// Client registration attempts before a discovered fixture is parked.
pub const MAX_REGISTRATION_ATTEMPTS: u8 = 3;

// ============================================================================
// Configuration Defaults
// ============================================================================

/// Advertised name the hub looks for out of the box.
pub const DEFAULT_DEVICE_NAME: &str = "Flood Light";

/// Radio transmit power in dBm.
pub const DEFAULT_TX_POWER: i8 = 4;

/// Seconds between the end of one scan and the start of the next.
pub const DEFAULT_SCAN_INTERVAL_SECS: u8 = 5;

/// Seconds each scan window lasts.
pub const DEFAULT_SCAN_DURATION_SECS: u8 = 15;

/// Local ATT MTU requested from the stack.
pub const DEFAULT_LOCAL_MTU: u16 = 200;

/// Smallest ATT MTU allowed by Bluetooth.
pub const MIN_MTU: u16 = 23;

/// Largest ATT MTU allowed by Bluetooth.
pub const MAX_MTU: u16 = 517;

/// Delay between service resolution and flushing a queued command.
///
/// Fixtures drop writes that arrive immediately after discovery.
pub const DEFAULT_FLUSH_DELAY_MS: u64 = 1000;

/// Transmit power range accepted by the radio, in dBm.
pub const TX_POWER_RANGE: std::ops::RangeInclusive<i8> = -12..=9;

//! Typed light commands.

use floodhub_core::{Result, constants::*};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::frame::{CommandFrame, FrameBuilder};

/// A control command understood by the fixtures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum LightCommand {
    Power { on: bool },
    /// Raw brightness, capped at [`MAX_BRIGHTNESS`] when encoded.
    Brightness { level: u8 },
    Color { r: u8, g: u8, b: u8 },
}

impl LightCommand {
    pub fn power(on: bool) -> Self {
        Self::Power { on }
    }

    pub fn brightness(level: u8) -> Self {
        Self::Brightness {
            level: level.min(MAX_BRIGHTNESS),
        }
    }

    pub fn color(r: u8, g: u8, b: u8) -> Self {
        Self::Color { r, g, b }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Self::Power { .. } => OPCODE_POWER,
            Self::Brightness { .. } => OPCODE_BRIGHTNESS,
            Self::Color { .. } => OPCODE_COLOR,
        }
    }

    pub fn payload(&self) -> Vec<u8> {
        match *self {
            Self::Power { on } => vec![u8::from(on)],
            Self::Brightness { level } => vec![level.min(MAX_BRIGHTNESS)],
            // The fixture takes the colour twice followed by a fixed trailer.
            Self::Color { r, g, b } => vec![r, g, b, r, g, b, COLOR_TRAILER],
        }
    }

    /// Encode the command as a checksummed frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::FrameTooLarge` if the frame does not fit.
    pub fn to_frame(&self) -> Result<CommandFrame> {
        let payload = self.payload();
        FrameBuilder::new(self.opcode()).payload(&payload).build()
    }
}

impl fmt::Display for LightCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Power { on: true } => write!(f, "power on"),
            Self::Power { on: false } => write!(f, "power off"),
            Self::Brightness { level } => write!(f, "brightness {level}"),
            Self::Color { r, g, b } => write!(f, "color #{r:02X}{g:02X}{b:02X}"),
        }
    }
}

impl TryFrom<&CommandFrame> for LightCommand {
    type Error = floodhub_core::Error;

    fn try_from(frame: &CommandFrame) -> Result<Self> {
        let payload = frame.payload();
        match (frame.opcode(), payload) {
            (OPCODE_POWER, [flag]) => Ok(Self::power(*flag == 0x01)),
            (OPCODE_BRIGHTNESS, [level]) => Ok(Self::Brightness { level: *level }),
            (OPCODE_COLOR, [r, g, b, ..]) if payload.len() == 7 => Ok(Self::color(*r, *g, *b)),
            (opcode, _) => Err(floodhub_core::Error::invalid_frame(format!(
                "unknown command 0x{opcode:02X} with {}-byte payload",
                payload.len()
            ))),
        }
    }
}

use crate::{
    Result,
    constants::{DEFAULT_DEVICE_NAME, MAX_DEVICES, MAX_NAME_LEN},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::{fmt, num::NonZeroU16, str::FromStr};

/// Six-byte radio address of a fixture.
///
/// Renders as `AA:BB:CC:DD:EE:FF`. Parses either that form or the compact
/// `AABBCCDDEEFF` form used in bus topics, case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Uppercase hex without separators.
    #[must_use]
    pub fn to_compact(&self) -> String {
        self.0.iter().map(|b| format!("{b:02X}")).collect()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let hex: String = match s.len() {
            17 => {
                let groups: Vec<&str> = s.split(':').collect();
                if groups.len() != 6 || groups.iter().any(|g| g.len() != 2) {
                    return Err(Error::InvalidAddress(s.to_string()));
                }
                groups.concat()
            }
            12 => s.to_string(),
            _ => return Err(Error::InvalidAddress(s.to_string())),
        };

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            let pair = hex
                .get(i * 2..i * 2 + 2)
                .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
            *octet =
                u8::from_str_radix(pair, 16).map_err(|_| Error::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

/// Advertised fixture name, 1 to 31 bytes of UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceName(String);

impl DeviceName {
    /// Create a new device name with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidName` if the name is empty or longer than
    /// [`MAX_NAME_LEN`] bytes.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName(format!(
                "name must be 1-{MAX_NAME_LEN} bytes, got {}",
                name.len()
            )));
        }
        Ok(Self(name))
    }

    /// Build a name from raw advertisement bytes, cutting at a character
    /// boundary so the result fits the bound.
    #[must_use]
    pub fn from_advertised(raw: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(raw);
        let mut end = text.len().min(MAX_NAME_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        Self::new(&text[..end]).ok()
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceName {
    /// The factory name fixtures advertise.
    fn default() -> Self {
        Self(DEFAULT_DEVICE_NAME.to_string())
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for DeviceName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DeviceName> for String {
    fn from(value: DeviceName) -> Self {
        value.0
    }
}

/// 16-bit Bluetooth SIG style UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uuid16(pub u16);

impl fmt::Display for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

impl FromStr for Uuid16 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        u16::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|_| Error::Config(format!("invalid 16-bit UUID: {s}")))
    }
}

/// Index of a registry slot.
///
/// The index doubles as the client registration id handed to the radio, so
/// radio events route back to their slot without a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u8);

impl SlotId {
    /// Create a slot id with validation.
    ///
    /// # Errors
    /// Returns `Error::DeviceNotFound` if the index is outside `0..MAX_DEVICES`.
    pub fn new(index: usize) -> Result<Self> {
        if index >= MAX_DEVICES {
            return Err(Error::DeviceNotFound(format!("slot {index}")));
        }
        // MAX_DEVICES fits in a u8
        Ok(Self(index as u8))
    }

    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection id assigned by the radio when a link opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u16);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// GATT attribute handle.
///
/// Handle zero is the "unresolved" marker on the wire; it can not be
/// represented here, so an `Option<AttrHandle>` is either resolved or absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttrHandle(NonZeroU16);

impl AttrHandle {
    #[must_use]
    pub const fn new(raw: u16) -> Option<Self> {
        match NonZeroU16::new(raw) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }

    #[must_use]
    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for AttrHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:04X}", self.0.get())
    }
}

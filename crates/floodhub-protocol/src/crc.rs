//! CRC-16/MODBUS.
//!
//! Reflected polynomial `0xA001`, initial value `0xFFFF`, no final XOR.
//! Fixtures expect the result appended little-endian.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

/// Compute the CRC-16/MODBUS checksum of `data`.
///
/// # Example
///
/// ```
/// use floodhub_protocol::crc16_modbus;
///
/// assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
/// ```
#[must_use]
pub fn crc16_modbus(data: &[u8]) -> u16 {
    data.iter().fold(INIT, |crc, &byte| {
        let mut crc = crc ^ u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ POLY
            } else {
                crc >> 1
            };
        }
        crc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::check_string(b"123456789".as_slice(), 0x4B37)]
    #[case::power_on(&[0xAA, 0x11, 0x04, 0x01], 0xF9B2)]
    #[case::power_off(&[0xAA, 0x11, 0x04, 0x00], 0x3973)]
    #[case::brightness_50(&[0xAA, 0x13, 0x04, 0x32], 0x2C53)]
    #[case::color(&[0xAA, 0x17, 0x0A, 0xFF, 0x00, 0x80, 0xFF, 0x00, 0x80, 0x64], 0xC463)]
    fn test_known_vectors(#[case] input: &[u8], #[case] expected: u16) {
        assert_eq!(crc16_modbus(input), expected);
    }

    #[test]
    fn test_empty_input_is_init() {
        assert_eq!(crc16_modbus(&[]), 0xFFFF);
    }
}

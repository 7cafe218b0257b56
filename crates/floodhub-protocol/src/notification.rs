//! Status notifications pushed by fixtures.
//!
//! Only the power flag is interpreted. Payloads of
//! [`MIN_NOTIFICATION_LEN`] bytes or fewer carry no state and are skipped.

use floodhub_core::constants::{MIN_NOTIFICATION_LEN, NOTIFY_POWER_OFFSET, NOTIFY_POWER_ON};
use serde::{Deserialize, Serialize};

/// State extracted from a status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerReport {
    pub on: bool,
}

/// Decode a notification payload.
///
/// Returns `None` for payloads too short to be informative; that is not an
/// error.
///
/// # Example
///
/// ```
/// use floodhub_protocol::decode_notification;
///
/// let report = decode_notification(&[0xAA, 0x21, 0x07, 0x01, 0x00, 0x00, 0x00]).unwrap();
/// assert!(report.on);
/// assert!(decode_notification(&[0xAA, 0x21, 0x05, 0x01, 0x00]).is_none());
/// ```
#[must_use]
pub fn decode_notification(data: &[u8]) -> Option<PowerReport> {
    if data.len() <= MIN_NOTIFICATION_LEN {
        return None;
    }
    Some(PowerReport {
        on: data[NOTIFY_POWER_OFFSET] == NOTIFY_POWER_ON,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::on(&[0, 0, 0, 0x01, 0, 0, 0], Some(true))]
    #[case::off(&[0, 0, 0, 0x00, 0, 0, 0], Some(false))]
    #[case::other_value_is_off(&[0, 0, 0, 0x02, 0, 0, 0, 0], Some(false))]
    #[case::exactly_six(&[0, 0, 0, 0x01, 0, 0], None)]
    #[case::five(&[0, 0, 0, 0x01, 0], None)]
    #[case::empty(&[], None)]
    fn test_decode(#[case] data: &[u8], #[case] expected: Option<bool>) {
        assert_eq!(decode_notification(data).map(|r| r.on), expected);
    }
}

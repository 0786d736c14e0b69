//! Utility functions for the temp-beacon-ble crate.

use std::fmt::Write as _;

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use temp_beacon_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

/// Format bytes as space separated lowercase hex, 16 bytes per line.
///
/// Used to log payload contents.
///
/// # Example
///
/// ```
/// use temp_beacon_ble::utils::hex_dump;
///
/// assert_eq!(hex_dump(&[0x01, 0x4e, 0x09]), "01 4e 09");
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(if i % 16 == 0 { '\n' } else { ' ' });
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Format a 6-byte Bluetooth address, most significant byte first.
///
/// # Example
///
/// ```
/// use temp_beacon_ble::utils::format_address;
///
/// let addr = [0x01, 0x02, 0x03, 0x04, 0x05, 0xC6];
/// assert_eq!(format_address(&addr), "C6:05:04:03:02:01");
/// ```
pub fn format_address(addr: &[u8; 6]) -> String {
    addr.iter()
        .rev()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
    }

    #[test]
    fn test_hex_dump_wraps_lines() {
        let data: Vec<u8> = (0u8..19).collect();
        let dump = hex_dump(&data);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "10 11 12");
        assert_eq!(hex_dump(&[]), "");
    }
}

//! Hex/ascii dump of link traffic
//!
//! Off by default. Enabled per session through
//! [`SessionOptions::dump_writes`](crate::link::SessionOptions).

use std::net::SocketAddr;

use tracing::debug;

/// Stand-in for bytes outside printable ASCII.
const NON_PRINTABLE: char = '█';

/// Two renderings of the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteDump {
    /// Lowercase two-digit hex, space separated
    pub hex: String,
    pub ascii: String,
}

pub fn hex_ascii(data: &[u8]) -> ByteDump {
    let hex = data
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(" ");
    let ascii = data
        .iter()
        .map(|&b| {
            if (32..127).contains(&b) {
                b as char
            } else {
                NON_PRINTABLE
            }
        })
        .collect();
    ByteDump { hex, ascii }
}

pub(crate) fn log_write(link: &str, addr: SocketAddr, data: &[u8]) {
    let dump = hex_ascii(data);
    debug!(
        link = %link,
        addr = %addr,
        bytes = data.len(),
        hex = %dump.hex,
        ascii = %dump.ascii,
        "Sent bytes"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable() {
        let dump = hex_ascii(b"Hi!");
        assert_eq!(dump.hex, "48 69 21");
        assert_eq!(dump.ascii, "Hi!");
    }

    #[test]
    fn test_non_printable_substituted() {
        let dump = hex_ascii(&[0x00, b'A', 0x7f, 0xff, b' ']);
        assert_eq!(dump.hex, "00 41 7f ff 20");
        assert_eq!(dump.ascii, "█A██ ");
    }

    #[test]
    fn test_empty() {
        let dump = hex_ascii(&[]);
        assert!(dump.hex.is_empty());
        assert!(dump.ascii.is_empty());
    }
}

//! Short-frame decoding for KICKR BIKE SHIFT button notifications
//!
//! The bike emits 3-byte notifications `[P, Q, R]`: `P`/`Q` form a 4-hex-digit
//! button family prefix, `R` carries press/release in bit 7 and a 7-bit rolling
//! sequence in the low bits. Everything else on the wire is "other" and only
//! interesting for diagnostics.

use std::fmt;

use crate::config::DescriptorTable;

/// Press or release, taken from bit 7 of the last frame byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Press,
    Release,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Press => write!(f, "press"),
            EventKind::Release => write!(f, "release"),
        }
    }
}

/// A decoded button event from a short frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonEvent {
    /// Button family prefix (displayed as 4 uppercase hex digits)
    pub prefix: u16,
    /// Logical button name from the descriptor table
    pub name: String,
    pub kind: EventKind,
    /// Rolling 7-bit sequence (0-127), reused by the matching release
    pub seq: u8,
}

impl fmt::Display for ButtonEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} seq={} ({:04X})", self.name, self.kind, self.seq, self.prefix)
    }
}

/// Result of classifying a raw notification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// A well-formed short frame for a known button family
    Short(ButtonEvent),
    /// Wrong length or unknown prefix - forward for diagnostics, never act on it
    Other,
}

/// Decode a raw notification payload against the descriptor table.
///
/// Pure function: identical bytes always yield the identical result. Inputs
/// that are not exactly 3 bytes, or whose prefix is not in the table, classify
/// as [`DecodedFrame::Other`].
pub fn decode(payload: &[u8], table: &DescriptorTable) -> DecodedFrame {
    let [p, q, r] = payload else {
        return DecodedFrame::Other;
    };

    let prefix = u16::from_be_bytes([*p, *q]);
    let Some(descriptor) = table.by_prefix(prefix) else {
        return DecodedFrame::Other;
    };

    let kind = if *r & 0x80 != 0 {
        EventKind::Press
    } else {
        EventKind::Release
    };

    DecodedFrame::Short(ButtonEvent {
        prefix,
        name: descriptor.name.clone(),
        kind,
        seq: *r & 0x7F,
    })
}

/// Format raw bytes as an uppercase hex string for diagnostics
pub fn format_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;

    fn table() -> DescriptorTable {
        BridgeConfig::default().buttons
    }

    #[test]
    fn test_press_frame() {
        let frame = decode(&[0x00, 0x01, 0x81], &table());

        assert_eq!(
            frame,
            DecodedFrame::Short(ButtonEvent {
                prefix: 0x0001,
                name: "Right Up".to_string(),
                kind: EventKind::Press,
                seq: 1,
            })
        );
    }

    #[test]
    fn test_release_frame_reuses_sequence() {
        let frame = decode(&[0x00, 0x01, 0x01], &table());

        assert_eq!(
            frame,
            DecodedFrame::Short(ButtonEvent {
                prefix: 0x0001,
                name: "Right Up".to_string(),
                kind: EventKind::Release,
                seq: 1,
            })
        );
    }

    #[test]
    fn test_wrong_length_is_other() {
        let table = table();
        assert_eq!(decode(&[], &table), DecodedFrame::Other);
        assert_eq!(decode(&[0x00, 0x01], &table), DecodedFrame::Other);
        assert_eq!(decode(&[0x00, 0x01, 0x81, 0x00], &table), DecodedFrame::Other);
    }

    #[test]
    fn test_unknown_prefix_is_other() {
        // 0xBEEF is not a button family
        assert_eq!(decode(&[0xBE, 0xEF, 0x81], &table()), DecodedFrame::Other);
    }

    #[test]
    fn test_decode_is_pure() {
        let table = table();
        let first = decode(&[0x80, 0x00, 0xFF], &table);
        for _ in 0..3 {
            assert_eq!(decode(&[0x80, 0x00, 0xFF], &table), first);
        }
    }

    #[test]
    fn test_sequence_mask() {
        // Bit 7 only selects press/release; low 7 bits are the sequence
        let DecodedFrame::Short(event) = decode(&[0x40, 0x00, 0xFF], &table()) else {
            panic!("expected short frame");
        };
        assert_eq!(event.kind, EventKind::Press);
        assert_eq!(event.seq, 0x7F);
    }

    #[test]
    fn test_format_hex() {
        assert_eq!(format_hex(&[0x00, 0x01, 0x81]), "000181");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn non_three_byte_input_never_decodes(payload in proptest::collection::vec(any::<u8>(), 0..16)) {
                prop_assume!(payload.len() != 3);
                prop_assert_eq!(decode(&payload, &table()), DecodedFrame::Other);
            }
        }
    }
}

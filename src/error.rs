//! Error types
//!
//! Decoding and envelope validation errors. Everything here is recoverable:
//! a malformed value or packet on a long-lived stream is logged and skipped
//! by callers, never escalated into a panic.

/// Error type for DTMI decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A declared length (or a fixed-width field) extends past the buffer
    Truncated,
    /// Unrecognized type tag byte
    UnknownTag(u8),
    /// Object nesting exceeds the supported depth
    NestingTooDeep,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "Value truncated before its declared end"),
            DecodeError::UnknownTag(tag) => write!(f, "Unknown DTMI type tag: 0x{:02X}", tag),
            DecodeError::NestingTooDeep => write!(f, "Object nesting too deep"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Error type for packet envelope validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer smaller than the 8-byte magic + length prelude
    TooShort(usize),
    /// Magic is not one of DTSC / DTPD / DTP2
    UnknownMagic([u8; 4]),
    /// Declared payload length extends past the supplied buffer
    BadLength { declared: u32, available: usize },
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::TooShort(len) => {
                write!(f, "Packet header needs at least 8 bytes, got {}", len)
            }
            PacketError::UnknownMagic(magic) => {
                write!(f, "Unknown packet magic: {:02X?}", magic)
            }
            PacketError::BadLength {
                declared,
                available,
            } => write!(
                f,
                "Declared length {} + 8 exceeds buffer of {} bytes",
                declared, available
            ),
        }
    }
}

impl std::error::Error for PacketError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            DecodeError::UnknownTag(0x42).to_string(),
            "Unknown DTMI type tag: 0x42"
        );
        assert!(DecodeError::Truncated.to_string().contains("truncated"));
    }

    #[test]
    fn test_packet_error_display() {
        let err = PacketError::BadLength {
            declared: 100,
            available: 50,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));
    }
}

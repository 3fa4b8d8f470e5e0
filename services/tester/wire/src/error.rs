//! Wire protocol error types.

use thiserror::Error;

/// Errors raised while decoding a frame or building a checked message.
///
/// Every variant refers to exactly one frame: the caller drops that frame and
/// keeps the connection open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Frame payload carried no opcode byte
    #[error("empty frame")]
    Empty,

    /// Opcode outside the controller reply set
    #[error("unrecognized opcode {0}")]
    Unrecognized(u8),

    /// Payload ended in the middle of a field
    #[error("truncated {field}: need {needed} bytes, {remaining} left")]
    Truncated {
        /// Field being read
        field: &'static str,
        /// Bytes the field needs
        needed: usize,
        /// Bytes left in the frame
        remaining: usize,
    },

    /// Byte outside the closed set or range of a field
    #[error("invalid {field} value {value:#04x}")]
    InvalidField {
        /// Field being read
        field: &'static str,
        /// Offending byte
        value: u8,
    },

    /// Fixed-size message followed by extra bytes
    #[error("opcode {opcode} has {extra} trailing bytes")]
    Trailing {
        /// Opcode of the message
        opcode: u8,
        /// Number of unread bytes
        extra: usize,
    },
}

impl WireError {
    /// True when the frame carried an opcode this side does not know.
    pub fn is_unrecognized(&self) -> bool {
        matches!(self, WireError::Unrecognized(_))
    }
}

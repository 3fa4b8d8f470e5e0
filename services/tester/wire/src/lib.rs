//! Message codec for the connections tester controller protocol.
//!
//! This crate is pure and performs no I/O. It turns typed host requests into
//! payload bytes and controller payloads back into typed replies. Framing
//! (the length prefix) belongs to the transport.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+-----------------------------------+
//! | u32 LE frame_len     | length of bytes that follow       |
//! +----------------------+-----------------------------------+
//! | u8 opcode            | 100..=116 requests, 50..=55 replies|
//! +----------------------+-----------------------------------+
//! | payload              | opcode specific, variable          |
//! +----------------------+-----------------------------------+
//! ```
//!
//! Only the opcode and payload are produced and consumed here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod device;
pub mod error;
pub mod opcode;
pub mod reply;
pub mod request;
pub mod types;

// Re-export main types
pub use cursor::FrameCursor;
pub use device::{decode_request, encode_reply};
pub use error::WireError;
pub use opcode::{ReplyOpcode, RequestOpcode};
pub use reply::{
    decode, decode_frame, BoardInfo, BoardVoltages, Connection, Connectivity, MessageFromDevice,
    PinVoltage, NOT_MEASURED,
};
pub use request::{encode, MessageToDevice};
pub use types::{
    ControllerResponse, InternalParameters, Millivolts, PinAddress, VoltageLevel,
    MAX_BOARD_ADDRESS, PINS_PER_BOARD,
};

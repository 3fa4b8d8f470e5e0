//! Request encoding and reply dispatch for the controller link.
//!
//! [`Router::send`] encodes a [`tester_wire::MessageToDevice`] and queues it on
//! the link. [`Router::dispatch`] drains the inbound frame stream, decodes each
//! payload and hands the result to a [`MessageHandler`]. Frames that fail to
//! decode are reported to the handler and dropped; the link stays up.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod router;

pub use error::RouterError;
pub use router::{DispatchStats, MessageHandler, Router};

//! Framed TCP transport to the harness controller.
//!
//! The harness listens, the controller dials in, and both sides exchange
//! length-prefixed frames. One [`Link`] serves exactly one controller
//! connection and runs three concurrent loops once it is up:
//!
//! - **Read**: reassembles frames and pushes their payloads onto the inbound queue
//! - **Write**: drains the outbound queue, one `write_all` per frame
//! - **Keepalive**: optionally enqueues a fixed payload at a fixed period
//!
//! ## Example
//!
//! ```rust,no_run
//! use tester_session::{KeepaliveConfig, Link, LinkConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), tester_session::LinkError> {
//! let mut link = Link::new(LinkConfig {
//!     keepalive: Some(KeepaliveConfig::new(vec![114u8], Duration::from_secs(2))),
//!     ..LinkConfig::default()
//! });
//! let mut inbound = link.take_inbound().expect("inbound taken once");
//! let addr = link.start().await?;
//! println!("controller should connect to port {}", addr.port());
//!
//! link.enqueue(vec![107u8, 0])?;
//! while let Some(payload) = inbound.recv().await {
//!     println!("frame with opcode {:?}", payload.first());
//! }
//! link.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod framing;
pub mod keepalive;
pub mod link;
pub mod stats;
pub mod transport;

// Re-export main types
pub use error::LinkError;
pub use framing::{
    encode_frame, read_frame, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE, MAX_WIRE_PAYLOAD,
};
pub use keepalive::KeepaliveConfig;
pub use link::{Link, LinkConfig, LinkSender, LinkState, LinkStatus};
pub use stats::{LinkStats, LinkStatsSnapshot};
pub use transport::{accept_one, connect_tcp, listen_tcp, SocketHints};

//! Link error types.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a link session.
///
/// Per-frame decode problems never show up here; they are absorbed above the
/// read loop. Every variant below is fatal to the session it occurs in.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// Peer closed the stream in the middle of a frame
    #[error("frame truncated: expected {expected} bytes, got {obtained}")]
    Framing {
        /// Bytes the frame section needed
        expected: usize,
        /// Bytes received before end of stream
        obtained: usize,
    },

    /// Frame length above the configured limit, inbound or outbound
    #[error("frame length {len} exceeds limit {max}")]
    Oversized {
        /// Declared length
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Peer closed the stream between two frames
    #[error("peer closed the connection")]
    PeerClosed,

    /// No controller connected within the accept window
    #[error("no peer connected within {0:?}")]
    AcceptTimeout(Duration),

    /// Socket level failure
    #[error("transport i/o: {0}")]
    Io(#[source] Arc<io::Error>),

    /// Link configuration rejected before start
    #[error("invalid link configuration: {0}")]
    Config(&'static str),

    /// `start` called on a link that already left the idle state
    #[error("link already started")]
    AlreadyStarted,

    /// Outbound queue no longer drained
    #[error("link is closed")]
    Closed,

    /// A link task panicked or was aborted
    #[error("link task failed: {0}")]
    Task(String),
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        LinkError::Io(Arc::new(err))
    }
}

impl LinkError {
    /// True when the peer went away, cleanly or mid-frame
    pub fn is_disconnect(&self) -> bool {
        matches!(self, LinkError::PeerClosed | LinkError::Framing { .. })
    }
}

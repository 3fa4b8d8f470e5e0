//! Router error types.

use tester_session::LinkError;
use thiserror::Error;

/// Errors returned when a request cannot be handed to the link
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    /// The link refused the frame
    #[error("link rejected request: {0}")]
    Link(#[from] LinkError),
}

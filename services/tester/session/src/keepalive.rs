//! Periodic keepalive frames.
//!
//! The controller drops a host that stays silent, so the link can enqueue a
//! caller supplied payload at a fixed period. The payload takes its FIFO turn
//! behind whatever is already queued.

use crate::link::LinkSender;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Keepalive payload and cadence
#[derive(Clone, Debug)]
pub struct KeepaliveConfig {
    /// Frame payload enqueued on every tick
    pub payload: Bytes,
    /// Time between two keepalives, must be non-zero
    pub period: Duration,
}

impl KeepaliveConfig {
    /// Keepalive with the given payload and period
    pub fn new(payload: impl Into<Bytes>, period: Duration) -> Self {
        Self {
            payload: payload.into(),
            period,
        }
    }
}

/// Enqueue the payload every period until cancelled or the link closes.
///
/// The first keepalive goes out one period after the loop starts.
pub(crate) async fn run_keepalive(
    config: KeepaliveConfig,
    sender: LinkSender,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + config.period, config.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if sender.enqueue(config.payload.clone()).is_err() {
                    debug!("Outbound queue closed, stopping keepalive");
                    break;
                }
                debug!("Queued keepalive ({} bytes)", config.payload.len());
            }
        }
    }
}

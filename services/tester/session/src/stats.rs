//! Counters and liveness timestamps shared by the link tasks.
//!
//! Every field is an atomic so the read and write loops never contend on a
//! lock. Timestamps are microseconds since the Unix epoch, zero meaning
//! "never". They are not reset when the link stops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Live counters of one link
#[derive(Debug, Default)]
pub struct LinkStats {
    connected_at: AtomicU64,
    last_input: AtomicU64,
    last_output: AtomicU64,
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Point-in-time copy of [`LinkStats`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    /// When the peer was accepted
    pub connected_at: Option<SystemTime>,
    /// Last successful read from the socket
    pub last_input_activity: Option<SystemTime>,
    /// Last successful write to the socket
    pub last_output_activity: Option<SystemTime>,
    /// Complete frames received
    pub frames_received: u64,
    /// Frames written
    pub frames_sent: u64,
    /// Bytes received, length prefixes included
    pub bytes_in: u64,
    /// Bytes written, length prefixes included
    pub bytes_out: u64,
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_micros() as u64)
        .unwrap_or(1)
        .max(1)
}

fn to_time(micros: u64) -> Option<SystemTime> {
    (micros != 0).then(|| UNIX_EPOCH + Duration::from_micros(micros))
}

impl LinkStats {
    pub(crate) fn mark_connected(&self) {
        self.connected_at.store(now_micros(), Ordering::Relaxed);
    }

    /// Record bytes read from the socket
    pub(crate) fn mark_input(&self, bytes: usize) {
        self.last_input.store(now_micros(), Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn mark_frame_in(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one frame written to the socket
    pub(crate) fn mark_frame_out(&self, bytes: usize) {
        self.last_output.store(now_micros(), Ordering::Relaxed);
        self.frames_out.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Last successful read, `None` before the first byte arrived
    pub fn last_input_activity(&self) -> Option<SystemTime> {
        to_time(self.last_input.load(Ordering::Relaxed))
    }

    /// Last successful write, `None` before the first frame went out
    pub fn last_output_activity(&self) -> Option<SystemTime> {
        to_time(self.last_output.load(Ordering::Relaxed))
    }

    /// Time since the last input, or since connect when nothing arrived yet
    pub fn input_idle_for(&self) -> Option<Duration> {
        let reference = self
            .last_input_activity()
            .or_else(|| to_time(self.connected_at.load(Ordering::Relaxed)))?;
        Some(SystemTime::now().duration_since(reference).unwrap_or_default())
    }

    /// Copy every counter
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            connected_at: to_time(self.connected_at.load(Ordering::Relaxed)),
            last_input_activity: self.last_input_activity(),
            last_output_activity: self.last_output_activity(),
            frames_received: self.frames_in.load(Ordering::Relaxed),
            frames_sent: self.frames_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_have_no_activity() {
        let stats = LinkStats::default();
        assert_eq!(stats.snapshot(), LinkStatsSnapshot::default());
        assert!(stats.input_idle_for().is_none());
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = LinkStats::default();
        stats.mark_connected();
        stats.mark_input(4);
        stats.mark_input(10);
        stats.mark_frame_in();
        stats.mark_frame_out(6);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_in, 14);
        assert_eq!(snapshot.frames_received, 1);
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.bytes_out, 6);
        assert!(snapshot.last_input_activity.is_some());
        assert!(snapshot.last_output_activity.is_some());
        assert!(stats.input_idle_for().is_some());
    }
}

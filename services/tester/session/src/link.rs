//! Controller link lifecycle.
//!
//! A [`Link`] owns one listening socket and at most one controller
//! connection. `start` binds and hands the work to a supervisor task that
//! accepts the peer and runs the read, write and keepalive loops until one of
//! them ends or the link is stopped:
//!
//! ```text
//! Idle --start--> Listening --accept--> Connected --error/stop--> Closing --> Closed
//! ```
//!
//! A closed link never listens again; build a new one for the next session.

use crate::error::LinkError;
use crate::framing::{encode_frame, read_frame, DEFAULT_MAX_FRAME_SIZE, MAX_WIRE_PAYLOAD};
use crate::keepalive::{run_keepalive, KeepaliveConfig};
use crate::stats::LinkStats;
use crate::transport::{accept_one, listen_tcp, SocketHints};
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a link, ordered by progression
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkState {
    /// Created, not started
    Idle,
    /// Bound and waiting for the controller
    Listening,
    /// Controller connected, loops running
    Connected,
    /// Loops are shutting down
    Closing,
    /// Terminal state
    Closed,
}

/// Observable status published on every transition
#[derive(Clone, Debug)]
pub struct LinkStatus {
    /// Current state
    pub state: LinkState,
    /// Bound listener address once started
    pub local_addr: Option<SocketAddr>,
    /// Address of the accepted controller
    pub peer: Option<SocketAddr>,
    /// Error that ended the session, if it did not end by `stop`
    pub last_error: Option<LinkError>,
}

impl LinkStatus {
    fn idle() -> Self {
        Self {
            state: LinkState::Idle,
            local_addr: None,
            peer: None,
            last_error: None,
        }
    }
}

/// Configuration for a controller link
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// Listen address; port 0 picks a free port
    pub bind_addr: SocketAddr,
    /// How long to wait for the controller after `start`
    pub accept_timeout: Duration,
    /// Periodic keepalive, disabled when `None`
    pub keepalive: Option<KeepaliveConfig>,
    /// Socket options
    pub hints: SocketHints,
    /// Largest payload accepted in either direction
    pub max_frame_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            accept_timeout: Duration::from_secs(10),
            keepalive: None,
            hints: SocketHints::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl LinkConfig {
    fn validate(&self) -> Result<(), LinkError> {
        if self.max_frame_size == 0 {
            return Err(LinkError::Config("max_frame_size must be non-zero"));
        }
        if self.accept_timeout.is_zero() {
            return Err(LinkError::Config("accept_timeout must be non-zero"));
        }
        if let Some(keepalive) = &self.keepalive {
            if keepalive.period.is_zero() {
                return Err(LinkError::Config("keepalive period must be non-zero"));
            }
            if keepalive.payload.is_empty() {
                return Err(LinkError::Config("keepalive payload must not be empty"));
            }
            if keepalive.payload.len() > self.max_frame_size {
                return Err(LinkError::Config("keepalive payload exceeds max_frame_size"));
            }
        }
        Ok(())
    }
}

/// Cloneable handle onto the outbound queue
#[derive(Clone, Debug)]
pub struct LinkSender {
    tx: mpsc::UnboundedSender<Bytes>,
    max_payload: usize,
}

impl LinkSender {
    pub(crate) fn from_channel(tx: mpsc::UnboundedSender<Bytes>, max_payload: usize) -> Self {
        Self {
            tx,
            max_payload: max_payload.min(MAX_WIRE_PAYLOAD),
        }
    }

    /// Queue one frame payload; never blocks.
    ///
    /// Payloads queued before the controller connects are written in order
    /// once it does. A payload above the frame limit is refused with
    /// [`LinkError::Oversized`] and the link stays up.
    pub fn enqueue(&self, payload: impl Into<Bytes>) -> Result<(), LinkError> {
        let payload = payload.into();
        if payload.len() > self.max_payload {
            return Err(LinkError::Oversized {
                len: payload.len(),
                max: self.max_payload,
            });
        }
        self.tx.send(payload).map_err(|_| LinkError::Closed)
    }

    /// True once the write side is gone for good
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Shared {
    stats: Arc<LinkStats>,
    status: watch::Sender<LinkStatus>,
}

impl Shared {
    fn transition(&self, state: LinkState) {
        self.status.send_if_modified(|status| {
            if status.state >= state {
                return false;
            }
            status.state = state;
            true
        });
    }

    fn close(&self, error: Option<LinkError>) {
        self.status.send_if_modified(|status| {
            if status.state == LinkState::Closed {
                return false;
            }
            status.state = LinkState::Closed;
            if error.is_some() {
                status.last_error = error;
            }
            true
        });
    }
}

/// A framed connection to one controller
pub struct Link {
    config: LinkConfig,
    shared: Arc<Shared>,
    sender: LinkSender,
    outbound_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    inbound_tx: Option<mpsc::UnboundedSender<Bytes>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl Link {
    /// Build an idle link
    pub fn new(config: LinkConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(LinkStatus::idle());
        let sender = LinkSender::from_channel(outbound_tx, config.max_frame_size);

        Self {
            config,
            shared: Arc::new(Shared {
                stats: Arc::new(LinkStats::default()),
                status,
            }),
            sender,
            outbound_rx: Some(outbound_rx),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
            cancel: CancellationToken::new(),
            supervisor: None,
        }
    }

    /// Bind the listener and start waiting for the controller.
    ///
    /// Returns the bound address, which carries the assigned port when the
    /// configured port is 0.
    pub async fn start(&mut self) -> Result<SocketAddr, LinkError> {
        if self.state() != LinkState::Idle {
            return Err(LinkError::AlreadyStarted);
        }
        self.config.validate()?;

        let listener = match listen_tcp(self.config.bind_addr, self.config.hints) {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {}: {}", self.config.bind_addr, e);
                self.release_channels();
                self.shared.close(Some(e.clone()));
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;

        let (Some(outbound), Some(inbound)) = (self.outbound_rx.take(), self.inbound_tx.take())
        else {
            return Err(LinkError::AlreadyStarted);
        };

        self.shared.status.send_modify(|status| {
            status.state = LinkState::Listening;
            status.local_addr = Some(local_addr);
        });
        info!("Link listening on {}", local_addr);

        let supervisor = Supervisor {
            config: self.config.clone(),
            shared: self.shared.clone(),
            sender: self.sender.clone(),
            cancel: self.cancel.clone(),
        };
        self.supervisor = Some(tokio::spawn(supervisor.run(listener, outbound, inbound)));

        Ok(local_addr)
    }

    /// Stop the link from any state; calling it again is a no-op.
    ///
    /// Returns once every loop has finished and the socket is closed.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.release_channels();

        if let Some(handle) = self.supervisor.take() {
            self.shared.transition(LinkState::Closing);
            if let Err(e) = handle.await {
                error!("Link supervisor failed: {}", e);
                self.shared.close(Some(task_error(e)));
            }
        }
        self.shared.close(None);
    }

    /// Queue one frame payload for the controller
    pub fn enqueue(&self, payload: impl Into<Bytes>) -> Result<(), LinkError> {
        self.sender.enqueue(payload)
    }

    /// Cloneable handle onto the outbound queue
    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    /// Take the stream of inbound frame payloads.
    ///
    /// The receiver yields `None` once the session has ended. Only the first
    /// call returns it.
    pub fn take_inbound(&mut self) -> Option<mpsc::UnboundedReceiver<Bytes>> {
        self.inbound_rx.take()
    }

    /// Current lifecycle state
    pub fn state(&self) -> LinkState {
        self.shared.status.borrow().state
    }

    /// Current status snapshot
    pub fn status(&self) -> LinkStatus {
        self.shared.status.borrow().clone()
    }

    /// Watch status transitions
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.shared.status.subscribe()
    }

    /// Error that ended the session, if any
    pub fn last_error(&self) -> Option<LinkError> {
        self.shared.status.borrow().last_error.clone()
    }

    /// Bound listener address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.status.borrow().local_addr
    }

    /// Live counters and activity timestamps
    pub fn stats(&self) -> Arc<LinkStats> {
        self.shared.stats.clone()
    }

    /// Wait until the link reaches `state` or any later one
    pub async fn wait_until(&self, state: LinkState) -> LinkStatus {
        let mut rx = self.subscribe();
        let reached = match rx.wait_for(|status| status.state >= state).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        reached
    }

    fn release_channels(&mut self) {
        self.outbound_rx = None;
        self.inbound_tx = None;
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn task_error(err: JoinError) -> LinkError {
    LinkError::Task(err.to_string())
}

struct Supervisor {
    config: LinkConfig,
    shared: Arc<Shared>,
    sender: LinkSender,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(
        self,
        listener: TcpListener,
        outbound: mpsc::UnboundedReceiver<Bytes>,
        inbound: mpsc::UnboundedSender<Bytes>,
    ) {
        let accepted = tokio::select! {
            _ = self.cancel.cancelled() => None,
            accepted = accept_one(&listener, self.config.accept_timeout, self.config.hints) => {
                Some(accepted)
            }
        };
        drop(listener);

        let (stream, peer) = match accepted {
            None => {
                info!("Link stopped before a controller connected");
                self.shared.close(None);
                return;
            }
            Some(Err(e)) => {
                warn!("Link setup failed: {}", e);
                self.shared.close(Some(e));
                return;
            }
            Some(Ok(accepted)) => accepted,
        };

        self.shared.stats.mark_connected();
        self.shared.status.send_modify(|status| {
            status.state = LinkState::Connected;
            status.peer = Some(peer);
        });
        info!("Controller connected from {}", peer);

        let session = self.cancel.child_token();
        let (reader, writer) = stream.into_split();
        let mut tasks = JoinSet::new();
        tasks.spawn(read_loop(
            reader,
            inbound,
            self.shared.stats.clone(),
            self.config.max_frame_size,
            session.clone(),
        ));
        tasks.spawn(write_loop(
            writer,
            outbound,
            self.shared.stats.clone(),
            session.clone(),
        ));
        if let Some(keepalive) = self.config.keepalive.clone() {
            let sender = self.sender.clone();
            let token = session.clone();
            tasks.spawn(async move {
                run_keepalive(keepalive, sender, token).await;
                Ok(())
            });
        }

        let outcome = tokio::select! {
            _ = session.cancelled() => Ok(()),
            Some(joined) = tasks.join_next() => flatten(joined),
        };

        self.shared.transition(LinkState::Closing);
        session.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = flatten(joined) {
                debug!("Link loop ended after shutdown: {}", e);
            }
        }

        match outcome {
            Ok(()) => {
                info!("Link with {} closed", peer);
                self.shared.close(None);
            }
            Err(e) => {
                if e.is_disconnect() {
                    warn!("Link with {} lost: {}", peer, e);
                } else {
                    error!("Link with {} failed: {}", peer, e);
                }
                self.shared.close(Some(e));
            }
        }
        debug!("Link stats: {:?}", self.shared.stats.snapshot());
    }
}

fn flatten(joined: Result<Result<(), LinkError>, JoinError>) -> Result<(), LinkError> {
    joined.map_err(task_error)?
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    inbound: mpsc::UnboundedSender<Bytes>,
    stats: Arc<LinkStats>,
    max_frame_size: usize,
    cancel: CancellationToken,
) -> Result<(), LinkError> {
    let mut consumer_gone = false;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = read_frame(&mut reader, max_frame_size, &stats) => frame?,
        };
        debug!("Received frame ({} bytes)", frame.len());

        if inbound.send(frame).is_err() && !consumer_gone {
            consumer_gone = true;
            debug!("Inbound receiver dropped, discarding further frames");
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    stats: Arc<LinkStats>,
    cancel: CancellationToken,
) -> Result<(), LinkError> {
    let result = loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            payload = outbound.recv() => match payload {
                Some(payload) => payload,
                None => break Ok(()),
            },
        };
        if payload.is_empty() {
            warn!("Skipping empty outbound payload");
            continue;
        }

        let frame = encode_frame(&payload);
        let written = tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            written = writer.write_all(&frame) => written,
        };
        if let Err(e) = written {
            break Err(LinkError::from(e));
        }
        stats.mark_frame_out(frame.len());
        debug!("Sent frame ({} bytes, opcode {})", payload.len(), payload[0]);
    };

    if let Err(e) = writer.shutdown().await {
        debug!("Write half shutdown: {}", e);
    }
    result
}

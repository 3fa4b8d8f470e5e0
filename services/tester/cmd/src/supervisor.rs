//! Session supervision for the `listen` command.
//!
//! Every session gets a fresh [`Link`]. The supervisor prints the bound port,
//! watches the link status, stops links that went silent and re-establishes
//! sessions with capped exponential backoff.

use crate::config::TesterConfig;
use crate::{component_error, component_info, component_warn};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tester_router::{MessageHandler, Router};
use tester_session::{Link, LinkError, LinkState, LinkStatus};
use tester_wire::{MessageFromDevice, MessageToDevice, WireError};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Behaviour of the `listen` command that is not link configuration
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Run a single session and return
    pub once: bool,
    /// Ask for the online boards as soon as the controller connects
    pub probe: bool,
    /// Request a bus rescan with the probe
    pub rescan: bool,
}

/// How a session ended
#[derive(Debug)]
pub enum SessionOutcome {
    /// Shutdown was requested
    Shutdown,
    /// No input for longer than the stall timeout
    Stalled,
    /// The link closed by itself
    Closed {
        /// Whether a controller had connected
        connected: bool,
        /// Error recorded by the link
        error: Option<LinkError>,
    },
}

/// Logs every controller message and forwards it to the session loop
struct ReportingHandler {
    events: mpsc::UnboundedSender<MessageFromDevice>,
}

#[async_trait]
impl MessageHandler for ReportingHandler {
    async fn on_message(&self, message: MessageFromDevice) {
        component_info!("controller", "{}", describe(&message));
        let _ = self.events.send(message);
    }

    async fn on_decode_error(&self, error: &WireError) {
        component_warn!("controller", "Dropped frame: {}", error);
    }
}

/// One line summary of a controller message
pub fn describe(message: &MessageFromDevice) -> String {
    match message {
        MessageFromDevice::Connectivity(report) => {
            let targets: Vec<String> = report
                .connections
                .iter()
                .map(|connection| match connection.measured {
                    Some(value) => format!("{}@{}", connection.target, value),
                    None => connection.target.to_string(),
                })
                .collect();
            format!("Pin {} connected to [{}]", report.source, targets.join(", "))
        }
        MessageFromDevice::OperationStatus(response) => format!("Operation status {:?}", response),
        MessageFromDevice::BoardsInfo(boards) => {
            let addresses: Vec<String> = boards
                .iter()
                .map(|board| {
                    format!(
                        "{} (fw {}, {}, {})",
                        board.address,
                        board.firmware_version,
                        board.voltage_level,
                        if board.healthy { "healthy" } else { "faulty" }
                    )
                })
                .collect();
            format!("{} board(s) online: {}", boards.len(), addresses.join(", "))
        }
        MessageFromDevice::Voltages(boards) => {
            format!("Voltage readings for {} board(s)", boards.len())
        }
        MessageFromDevice::Dummy => "Dummy reply".to_string(),
        MessageFromDevice::KeepAlive => "Keepalive".to_string(),
    }
}

/// Runs controller sessions until shutdown
pub struct SessionSupervisor {
    config: TesterConfig,
    options: SessionOptions,
    shutdown: CancellationToken,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl SessionSupervisor {
    /// Supervisor with the given configuration and shutdown token
    pub fn new(config: TesterConfig, options: SessionOptions, shutdown: CancellationToken) -> Self {
        Self {
            config,
            options,
            shutdown,
            bound: watch::channel(None).0,
        }
    }

    /// Address the current session listens on
    pub fn subscribe_bound(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.bound.subscribe()
    }

    /// Re-establish sessions until shutdown, or once with `--once`
    pub async fn run(&self) -> Result<()> {
        let mut backoff = self.config.reconnect_initial;
        let mut session = 0u64;

        loop {
            session += 1;
            let outcome = self.run_session(session).await?;
            debug!("Session {} outcome: {:?}", session, outcome);

            let connected = match outcome {
                SessionOutcome::Shutdown => return Ok(()),
                SessionOutcome::Stalled => true,
                SessionOutcome::Closed { connected, error } => {
                    if self.options.once {
                        return match error {
                            Some(e) if !e.is_disconnect() => Err(e).context("session failed"),
                            _ => Ok(()),
                        };
                    }
                    connected
                }
            };
            if self.options.once {
                return Ok(());
            }

            if connected {
                backoff = self.config.reconnect_initial;
            }
            info!("Re-establishing session in {:?}", backoff);
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = sleep(backoff) => {}
            }
            if !connected {
                backoff = (backoff * 2).min(self.config.reconnect_max);
            }
        }
    }

    /// Run one session from bind to close
    pub async fn run_session(&self, session: u64) -> Result<SessionOutcome> {
        let mut link = Link::new(self.config.to_link_config());
        let inbound = link
            .take_inbound()
            .context("inbound stream already taken")?;
        let mut status = link.subscribe();
        let addr = link.start().await.context("failed to start link")?;
        self.bound.send_replace(Some(addr));

        // The pairing side reads the port from stdout
        println!("{}", addr.port());
        component_info!("session", "Session {} waiting for controller on {}", session, addr);

        let router = Router::new(link.sender());
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(ReportingHandler { events: events_tx });
        let dispatcher = tokio::spawn(Router::dispatch(inbound, handler));

        let stats = link.stats();
        let mut stall_check = interval(stall_check_period(self.config.stall_timeout));
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut probe_pending = self.options.probe;
        let mut probe_deadline: Option<Instant> = None;
        let mut connected = false;

        let outcome = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break SessionOutcome::Shutdown,

                changed = status.changed() => {
                    if changed.is_err() {
                        let current = link.status();
                        break SessionOutcome::Closed {
                            connected: reached_controller(connected, &current),
                            error: current.last_error,
                        };
                    }
                    let current = status.borrow_and_update().clone();
                    match current.state {
                        LinkState::Connected if !connected => {
                            connected = true;
                            if let Some(peer) = current.peer {
                                component_info!("session", "Controller connected from {}", peer);
                            }
                            if probe_pending {
                                probe_pending = false;
                                probe_deadline = self.send_probe(&router);
                            }
                        }
                        LinkState::Closed => {
                            break SessionOutcome::Closed {
                                connected: reached_controller(connected, &current),
                                error: current.last_error,
                            };
                        }
                        _ => {}
                    }
                }

                Some(message) = events_rx.recv() => {
                    let boards_reported = matches!(message, MessageFromDevice::BoardsInfo(_));
                    if boards_reported && probe_deadline.take().is_some() {
                        component_info!("probe", "Probe answered");
                    }
                }

                _ = async {
                    match probe_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    probe_deadline = None;
                    component_warn!("probe", "No boards reported within the response deadline");
                }

                _ = stall_check.tick(), if connected && self.config.stall_timeout.is_some() => {
                    let limit = self.config.stall_timeout;
                    if let (Some(limit), Some(idle)) = (limit, stats.input_idle_for()) {
                        if idle > limit {
                            warn!(
                                "No input from controller for {:?}, stopping session {}",
                                idle, session
                            );
                            break SessionOutcome::Stalled;
                        }
                    }
                }
            }
        };

        link.stop().await;
        match dispatcher.await {
            Ok(dispatched) => info!(
                "Session {} closed: {} message(s) decoded, {} dropped",
                session, dispatched.decoded, dispatched.dropped
            ),
            Err(e) => {
                component_error!("session", "Dispatcher for session {} failed: {}", session, e)
            }
        }
        if let Some(e) = link.last_error() {
            warn!("Session {} ended with: {}", session, e);
        }

        Ok(outcome)
    }

    fn send_probe(&self, router: &Router) -> Option<Instant> {
        let request = MessageToDevice::GetBoardsOnline {
            rescan: self.options.rescan,
        };
        if let Err(e) = router.send(&request) {
            component_warn!("probe", "Failed to send probe: {}", e);
            return None;
        }
        component_info!("probe", "Requested online boards (rescan: {})", self.options.rescan);
        request.response_timeout().map(|wait| Instant::now() + wait)
    }
}

/// The watch may coalesce Connected into Closed; an accepted peer still counts
fn reached_controller(seen_connected: bool, status: &LinkStatus) -> bool {
    seen_connected || status.peer.is_some()
}

fn stall_check_period(stall_timeout: Option<Duration>) -> Duration {
    stall_timeout
        .map(|limit| (limit / 4).max(Duration::from_millis(50)))
        .unwrap_or(Duration::from_secs(1))
}

//! Configuration handling for the tester service.
//!
//! Values come from the shared YAML config file, then environment variables,
//! then command line flags (applied by the caller).

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tester_session::{KeepaliveConfig, LinkConfig, SocketHints, DEFAULT_MAX_FRAME_SIZE};
use tester_wire::MessageToDevice;
use tracing::{info, warn};

/// Tester service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct TesterConfig {
    /// Listen address for the controller link
    pub bind_addr: SocketAddr,
    /// How long each session waits for the controller
    pub accept_timeout: Duration,
    /// Keepalive period, `None` disables keepalives
    pub keepalive_period: Option<Duration>,
    /// Stop a session when nothing was received for this long, `None` disables
    pub stall_timeout: Option<Duration>,
    /// TCP_NODELAY on the accepted stream
    pub nodelay: bool,
    /// SO_KEEPALIVE on the listener
    pub socket_keepalive: bool,
    /// Largest inbound frame payload
    pub max_frame_size: usize,
    /// First delay before re-establishing a session
    pub reconnect_initial: Duration,
    /// Cap on the reconnect delay
    pub reconnect_max: Duration,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            accept_timeout: Duration::from_secs(10),
            keepalive_period: Some(Duration::from_secs(2)),
            stall_timeout: Some(Duration::from_secs(10)),
            nodelay: true,
            socket_keepalive: true,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    tester: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize)]
struct ServiceConfig {
    args: Option<Vec<String>>,
    config: Option<HashMap<String, String>>,
}

/// Parse a duration value; `0`, `off`, `none` and any zero duration disable the setting
fn parse_optional_duration(value: &str) -> Option<Option<Duration>> {
    match value.trim() {
        "0" | "off" | "none" => Some(None),
        other => humantime::parse_duration(other)
            .ok()
            .map(|wait| Some(wait).filter(|wait| !wait.is_zero())),
    }
}

fn parse_millis(value: &str) -> Option<Option<Duration>> {
    let millis = value.trim().parse::<u64>().ok()?;
    Some((millis > 0).then(|| Duration::from_millis(millis)))
}

impl TesterConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(content) = std::fs::read_to_string(&config_path) {
            match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}, using defaults: {}",
                        config_path.as_ref(),
                        e
                    );
                }
            }
        } else {
            warn!("Config file {:?} not found, using defaults", config_path.as_ref());
        }

        config.apply_environment_overrides();
        config.validate()?;

        info!(
            "Tester configuration: bind={}, accept={:?}, keepalive={:?}, stall={:?}",
            config.bind_addr, config.accept_timeout, config.keepalive_period, config.stall_timeout
        );

        Ok(config)
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(tester) = root_config.services.and_then(|services| services.tester) {
            self.apply_service_config(tester);
        }
    }

    fn apply_service_config(&mut self, service_config: ServiceConfig) {
        if let Some(args) = service_config.args {
            for arg in args {
                if let Some(value) = arg.strip_prefix("--bind=") {
                    match value.parse::<SocketAddr>() {
                        Ok(addr) => self.bind_addr = addr,
                        Err(_) => warn!("Ignoring invalid bind argument {:?}", value),
                    }
                }
            }
        }

        if let Some(config_map) = service_config.config {
            for (key, value) in config_map {
                self.apply_key(&key, &value);
            }
        }
    }

    fn apply_key(&mut self, key: &str, value: &str) {
        let applied = match key {
            "services.tester.bind_addr" => value
                .parse::<SocketAddr>()
                .map(|addr| self.bind_addr = addr)
                .is_ok(),
            "services.tester.accept_timeout" => humantime::parse_duration(value)
                .map(|wait| self.accept_timeout = wait)
                .is_ok(),
            "services.tester.keepalive_period" => parse_optional_duration(value)
                .map(|period| self.keepalive_period = period)
                .is_some(),
            "services.tester.stall_timeout" => parse_optional_duration(value)
                .map(|wait| self.stall_timeout = wait)
                .is_some(),
            "services.tester.nodelay" => {
                self.nodelay = value.to_lowercase() == "true";
                true
            }
            "services.tester.socket_keepalive" => {
                self.socket_keepalive = value.to_lowercase() == "true";
                true
            }
            "services.tester.max_frame_size" => value
                .parse::<usize>()
                .map(|size| self.max_frame_size = size)
                .is_ok(),
            "services.tester.reconnect_initial" => humantime::parse_duration(value)
                .map(|wait| self.reconnect_initial = wait)
                .is_ok(),
            "services.tester.reconnect_max" => humantime::parse_duration(value)
                .map(|wait| self.reconnect_max = wait)
                .is_ok(),
            // Ignore unknown configuration keys
            _ => true,
        };
        if !applied {
            warn!("Ignoring invalid value {:?} for {}", value, key);
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("TESTER_BIND_ADDR") {
            if let Ok(addr) = bind.parse::<SocketAddr>() {
                self.bind_addr = addr;
                info!("Bind address overridden by environment: {}", addr);
            }
        }

        if let Some(value) = lookup("TESTER_ACCEPT_TIMEOUT_MS") {
            if let Some(Some(wait)) = parse_millis(&value) {
                self.accept_timeout = wait;
                info!("Accept timeout overridden by environment: {:?}", wait);
            }
        }

        if let Some(value) = lookup("TESTER_KEEPALIVE_PERIOD_MS") {
            if let Some(period) = parse_millis(&value) {
                self.keepalive_period = period;
                info!("Keepalive period overridden by environment: {:?}", period);
            }
        }

        if let Some(value) = lookup("TESTER_STALL_TIMEOUT_MS") {
            if let Some(wait) = parse_millis(&value) {
                self.stall_timeout = wait;
                info!("Stall timeout overridden by environment: {:?}", wait);
            }
        }
    }

    /// Reject values the link would refuse later
    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            anyhow::bail!("max_frame_size must be non-zero");
        }
        if self.accept_timeout.is_zero() {
            anyhow::bail!("accept_timeout must be non-zero");
        }
        if self.keepalive_period.is_some_and(|period| period.is_zero()) {
            anyhow::bail!("keepalive_period must be non-zero, use none to disable");
        }
        if self.reconnect_initial > self.reconnect_max {
            anyhow::bail!(
                "reconnect_initial {:?} exceeds reconnect_max {:?}",
                self.reconnect_initial,
                self.reconnect_max
            );
        }
        Ok(())
    }

    /// Link settings for one session
    pub fn to_link_config(&self) -> LinkConfig {
        LinkConfig {
            bind_addr: self.bind_addr,
            accept_timeout: self.accept_timeout,
            keepalive: self
                .keepalive_period
                .map(|period| KeepaliveConfig::new(MessageToDevice::KeepAlive.encode(), period)),
            hints: SocketHints {
                nodelay: self.nodelay,
                keepalive: self.socket_keepalive,
            },
            max_frame_size: self.max_frame_size,
        }
    }
}

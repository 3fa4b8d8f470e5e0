//! Connections tester host binary.
//!
//! `listen` waits for the controller board on a TCP port and supervises the
//! session; `emulate` plays the controller against a listening harness.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod emulator;
mod logging;
mod supervisor;

use config::TesterConfig;
use emulator::Emulator;
use logging::TesterLogFormatter;
use supervisor::{SessionOptions, SessionSupervisor};

// Component logging macros are defined in logging.rs and available via #[macro_export]

/// Host side of the connections tester
#[derive(Parser, Debug)]
#[command(name = "connections-tester", version, about = "Controller board diagnostic harness")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for the controller and supervise its sessions
    Listen(ListenArgs),
    /// Emulate a controller against a listening harness
    Emulate(EmulateArgs),
}

#[derive(ClapArgs, Debug)]
struct ListenArgs {
    /// Listen address, e.g. 0.0.0.0:0 for a free port
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// How long to wait for the controller, e.g. 10s
    #[arg(long)]
    accept_timeout: Option<humantime::Duration>,

    /// Keepalive period, e.g. 2s
    #[arg(long, conflicts_with = "no_keepalive")]
    keepalive: Option<humantime::Duration>,

    /// Do not send keepalives
    #[arg(long)]
    no_keepalive: bool,

    /// Stop a session after this long without input, e.g. 10s
    #[arg(long)]
    stall_timeout: Option<humantime::Duration>,

    /// Run one session and exit
    #[arg(long)]
    once: bool,

    /// Ask for the online boards once the controller connects
    #[arg(long)]
    probe: bool,

    /// Rescan the bus with the probe
    #[arg(long, requires = "probe")]
    rescan: bool,
}

#[derive(ClapArgs, Debug)]
struct EmulateArgs {
    /// Harness address, e.g. 127.0.0.1:40123
    #[arg(long)]
    connect: SocketAddr,

    /// Board addresses on the emulated bus
    #[arg(long, value_delimiter = ',', default_value = "1")]
    boards: Vec<u8>,
}

impl ListenArgs {
    fn apply(&self, config: &mut TesterConfig) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(wait) = self.accept_timeout {
            config.accept_timeout = wait.into();
        }
        if let Some(period) = self.keepalive {
            config.keepalive_period = non_zero(period.into());
        }
        if self.no_keepalive {
            config.keepalive_period = None;
        }
        if let Some(wait) = self.stall_timeout {
            config.stall_timeout = non_zero(wait.into());
        }
    }

    fn options(&self) -> SessionOptions {
        SessionOptions {
            once: self.once,
            probe: self.probe,
            rescan: self.rescan,
        }
    }
}

/// A zero duration on the command line disables the setting
fn non_zero(wait: Duration) -> Option<Duration> {
    Some(wait).filter(|wait| !wait.is_zero())
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT signal"),
                    _ = sigterm.recv() => info!("Received SIGTERM signal"),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received interrupt signal");
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("warn")
        .add_directive(format!("connections_tester={}", args.log_level).parse()?)
        .add_directive(format!("tester_wire={}", args.log_level).parse()?)
        .add_directive(format!("tester_session={}", args.log_level).parse()?)
        .add_directive(format!("tester_router={}", args.log_level).parse()?);

    let color_enabled = logging::is_terminal();
    let formatter = TesterLogFormatter::new("tester", color_enabled);

    // stdout carries the bound port for the pairing side, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(color_enabled)
        .event_format(formatter)
        .init();

    info!("Starting connections tester v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    match args.command {
        Command::Listen(listen) => {
            let mut config = TesterConfig::load_from_file(&args.config)?;
            listen.apply(&mut config);
            config.validate()?;

            let supervisor = SessionSupervisor::new(config, listen.options(), shutdown);
            supervisor.run().await?;
        }
        Command::Emulate(emulate) => {
            component_info!("emulator", "Emulating boards {:?}", emulate.boards);
            emulator::run(emulate.connect, Emulator::new(&emulate.boards), shutdown).await?;
        }
    }

    info!("Connections tester shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_listen_flags_override_config() {
        let args = Args::try_parse_from([
            "connections-tester",
            "listen",
            "--bind",
            "127.0.0.1:5000",
            "--no-keepalive",
            "--stall-timeout",
            "0s",
            "--probe",
            "--rescan",
        ])
        .unwrap();
        let Command::Listen(listen) = args.command else {
            panic!("expected listen");
        };

        let mut config = TesterConfig::default();
        listen.apply(&mut config);
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.keepalive_period, None);
        assert_eq!(config.stall_timeout, None);

        let options = listen.options();
        assert!(options.probe && options.rescan && !options.once);
    }

    #[test]
    fn test_emulate_board_list() {
        let args = Args::try_parse_from([
            "connections-tester",
            "emulate",
            "--connect",
            "127.0.0.1:4000",
            "--boards",
            "1,2,9",
        ])
        .unwrap();
        let Command::Emulate(emulate) = args.command else {
            panic!("expected emulate");
        };
        assert_eq!(emulate.boards, vec![1, 2, 9]);
    }

    #[test]
    fn test_rescan_requires_probe() {
        assert!(Args::try_parse_from(["connections-tester", "listen", "--rescan"]).is_err());
        let args =
            Args::try_parse_from(["connections-tester", "listen", "--keepalive", "500ms"]).unwrap();
        let Command::Listen(listen) = args.command else {
            panic!("expected listen");
        };
        let mut config = TesterConfig::default();
        listen.apply(&mut config);
        assert_eq!(config.keepalive_period, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_zero_keepalive_flag_disables_keepalive() {
        let args =
            Args::try_parse_from(["connections-tester", "listen", "--keepalive", "0s"]).unwrap();
        let Command::Listen(listen) = args.command else {
            panic!("expected listen");
        };
        let mut config = TesterConfig::default();
        listen.apply(&mut config);
        assert_eq!(config.keepalive_period, None);
        assert!(config.validate().is_ok());
        assert!(config.to_link_config().keepalive.is_none());
    }
}

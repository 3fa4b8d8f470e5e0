//! Minimal controller emulator for bench runs without hardware.
//!
//! Dials the harness, parses requests with the device-side codec and answers
//! like the firmware does: an acknowledge for every accepted command followed
//! by its result. Pins are wired in pairs on each board (0-1, 2-3, ...).

use crate::component_debug;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use tester_session::{
    connect_tcp, encode_frame, read_frame, LinkError, LinkStats, DEFAULT_MAX_FRAME_SIZE,
};
use tester_wire::{
    decode_request, encode_reply, BoardInfo, BoardVoltages, Connection, Connectivity,
    ControllerResponse, InternalParameters, MessageFromDevice, MessageToDevice, Millivolts,
    PinAddress, PinVoltage, VoltageLevel, WireError, PINS_PER_BOARD,
};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Firmware version reported by emulated boards
const EMULATED_FIRMWARE_VERSION: u8 = 1;

/// Voltage read at a pin connected to the driven pin
const CONNECTED_READING: Millivolts = Millivolts(3250);

/// Simulated bus of I/O boards
#[derive(Debug, Clone)]
pub struct Emulator {
    boards: Vec<BoardInfo>,
    level: VoltageLevel,
    output: Option<PinAddress>,
}

fn default_parameters() -> InternalParameters {
    InternalParameters {
        out_r1: 220,
        in_r1: 220,
        out_r2: 10_000,
        in_r2: 10_000,
        shunt_r: 10,
        out_v_low: Millivolts(700),
        out_v_high: Millivolts(3300),
    }
}

impl Emulator {
    /// Emulator with one healthy board per address
    pub fn new(addresses: &[u8]) -> Self {
        let boards = addresses
            .iter()
            .map(|&address| BoardInfo {
                internals: default_parameters(),
                address,
                firmware_version: EMULATED_FIRMWARE_VERSION,
                voltage_level: VoltageLevel::High,
                healthy: true,
            })
            .collect();
        Self {
            boards,
            level: VoltageLevel::High,
            output: None,
        }
    }

    fn board_mut(&mut self, address: u8) -> Option<&mut BoardInfo> {
        self.boards.iter_mut().find(|board| board.address == address)
    }

    fn has_pin(&self, pin: PinAddress) -> bool {
        pin.is_valid() && self.boards.iter().any(|board| board.address == pin.board)
    }

    fn all_pins(&self) -> Vec<PinAddress> {
        self.boards
            .iter()
            .flat_map(|board| {
                (0..PINS_PER_BOARD as u8).map(move |pin| PinAddress::from_raw(board.address, pin))
            })
            .collect()
    }

    fn output_level(&self) -> Millivolts {
        let params = self
            .boards
            .first()
            .map(|board| board.internals)
            .unwrap_or_else(default_parameters);
        match self.level {
            VoltageLevel::Low => params.out_v_low,
            VoltageLevel::High => params.out_v_high,
        }
    }

    fn connectivity(&self, source: PinAddress, measured: Millivolts) -> MessageFromDevice {
        MessageFromDevice::Connectivity(Connectivity {
            source,
            connections: vec![Connection::new(
                PinAddress::from_raw(source.board, source.pin ^ 1),
                Some(measured),
            )],
        })
    }

    fn scan(&self, pin: Option<PinAddress>, measured: Millivolts) -> Vec<MessageFromDevice> {
        match pin {
            Some(pin) if !self.has_pin(pin) => {
                vec![status(ControllerResponse::CommandInvalidArgument)]
            }
            Some(pin) => vec![ack(), self.connectivity(pin, measured)],
            None => {
                let mut replies = vec![ack()];
                replies.extend(
                    self.all_pins()
                        .into_iter()
                        .map(|source| self.connectivity(source, measured)),
                );
                replies
            }
        }
    }

    fn voltages(&self) -> MessageFromDevice {
        let driven = self.output;
        let level = self.output_level();
        MessageFromDevice::Voltages(
            self.boards
                .iter()
                .map(|board| BoardVoltages {
                    board: board.address,
                    pins: (0..PINS_PER_BOARD as u8)
                        .map(|pin| {
                            let here = PinAddress::from_raw(board.address, pin);
                            let lit = driven.is_some_and(|out| {
                                out == here || (out.board == here.board && out.pin ^ 1 == pin)
                            });
                            PinVoltage {
                                pin,
                                raw: if lit { level.0 } else { 0 },
                            }
                        })
                        .collect(),
                })
                .collect(),
        )
    }

    /// Replies for one request, in the order they go on the wire
    pub fn respond(&mut self, request: MessageToDevice) -> Vec<MessageFromDevice> {
        match request {
            MessageToDevice::MeasureAllVoltages => vec![ack(), self.voltages()],
            MessageToDevice::EnableOutputAtPin { pin } => {
                if !self.has_pin(pin) {
                    return vec![status(ControllerResponse::CommandInvalidArgument)];
                }
                self.output = Some(pin);
                vec![ack(), status(ControllerResponse::CommandPerformanceSuccess)]
            }
            MessageToDevice::SetOutputVoltageLevel { level } => {
                self.level = level;
                for board in &mut self.boards {
                    board.voltage_level = level;
                }
                vec![ack(), status(ControllerResponse::CommandPerformanceSuccess)]
            }
            MessageToDevice::CheckConnections { pin } => self.scan(pin, CONNECTED_READING),
            MessageToDevice::CheckResistances { pin } => {
                let shunt = self.boards.first().map_or(0, |board| board.internals.shunt_r);
                self.scan(pin, Millivolts(shunt))
            }
            MessageToDevice::CheckVoltages { pin } => {
                let level = self.output_level();
                self.scan(pin, level)
            }
            MessageToDevice::GetBoardsOnline { .. } => {
                vec![MessageFromDevice::BoardsInfo(self.boards.clone())]
            }
            MessageToDevice::SetInternalParameters { board, params } => {
                match self.board_mut(board) {
                    Some(found) => {
                        found.internals = params;
                        vec![ack(), status(ControllerResponse::CommandPerformanceSuccess)]
                    }
                    None => vec![status(ControllerResponse::CommandInvalidArgument)],
                }
            }
            MessageToDevice::GetInternalParameters { board } => {
                match self.boards.iter().find(|info| info.address == board) {
                    Some(found) => vec![MessageFromDevice::BoardsInfo(vec![*found])],
                    None => vec![status(ControllerResponse::CommandInvalidArgument)],
                }
            }
            MessageToDevice::DisableOutput => {
                self.output = None;
                vec![ack(), status(ControllerResponse::CommandPerformanceSuccess)]
            }
            MessageToDevice::KeepAlive => vec![MessageFromDevice::KeepAlive],
            MessageToDevice::Dummy => vec![MessageFromDevice::Dummy],
            MessageToDevice::CheckRaw { .. }
            | MessageToDevice::GetInternalCounter { .. }
            | MessageToDevice::GetTaskStackWatermark { .. }
            | MessageToDevice::SetNewAddressForBoard { .. }
            | MessageToDevice::Test { .. } => {
                vec![status(ControllerResponse::CommandNotImplemented)]
            }
        }
    }

    /// Status reply for a request that failed to parse
    pub fn reject(error: &WireError) -> MessageFromDevice {
        if error.is_unrecognized() {
            status(ControllerResponse::CommandNoSuchCommand)
        } else {
            status(ControllerResponse::CommandInvalidArgument)
        }
    }
}

fn ack() -> MessageFromDevice {
    status(ControllerResponse::CommandAcknowledge)
}

fn status(response: ControllerResponse) -> MessageFromDevice {
    MessageFromDevice::OperationStatus(response)
}

/// Connect to the harness and answer requests until either side stops
pub async fn run(
    addr: SocketAddr,
    mut emulator: Emulator,
    shutdown: CancellationToken,
) -> Result<()> {
    let stream = connect_tcp(addr)
        .await
        .with_context(|| format!("failed to connect to harness at {}", addr))?;
    info!("Emulating {} board(s) against {}", emulator.boards.len(), addr);

    let (mut reader, mut writer) = stream.into_split();
    let stats = LinkStats::default();

    loop {
        let payload = tokio::select! {
            _ = shutdown.cancelled() => break,
            payload = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE, &stats) => payload,
        };
        let payload = match payload {
            Ok(payload) => payload,
            Err(LinkError::PeerClosed) => {
                info!("Harness closed the connection");
                break;
            }
            Err(e) => return Err(e).context("harness link failed"),
        };

        let replies = match decode_request(payload) {
            Ok(request) => {
                component_debug!("emulator", "Request {:?}", request);
                emulator.respond(request)
            }
            Err(e) => {
                warn!("Rejecting request: {}", e);
                vec![Emulator::reject(&e)]
            }
        };

        for reply in &replies {
            writer
                .write_all(&encode_frame(&encode_reply(reply)))
                .await
                .context("failed to write reply")?;
        }
    }

    let snapshot = stats.snapshot();
    info!("Emulator finished after {} request(s)", snapshot.frames_received);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::time::Duration;
    use tester_router::{MessageHandler, Router};
    use tester_session::{Link, LinkConfig};
    use tokio::sync::mpsc;

    #[test]
    fn test_scan_of_all_pins_covers_every_board() {
        let mut emulator = Emulator::new(&[1, 2]);
        let replies = emulator.respond(MessageToDevice::CheckConnections { pin: None });
        assert_eq!(replies[0], ack());
        assert_eq!(replies.len(), 1 + 2 * PINS_PER_BOARD);
        match &replies[1] {
            MessageFromDevice::Connectivity(report) => {
                assert_eq!(report.source, PinAddress::from_raw(1, 0));
                assert_eq!(report.connections[0].target, PinAddress::from_raw(1, 1));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn test_unknown_board_rejected() {
        let mut emulator = Emulator::new(&[1]);
        let replies = emulator.respond(MessageToDevice::EnableOutputAtPin {
            pin: PinAddress::from_raw(9, 0),
        });
        assert_eq!(replies, vec![status(ControllerResponse::CommandInvalidArgument)]);
        let replies = emulator.respond(MessageToDevice::GetInternalParameters { board: 9 });
        assert_eq!(replies, vec![status(ControllerResponse::CommandInvalidArgument)]);
    }

    #[test]
    fn test_voltages_follow_enabled_output() {
        let mut emulator = Emulator::new(&[3]);
        emulator.respond(MessageToDevice::SetOutputVoltageLevel {
            level: VoltageLevel::Low,
        });
        emulator.respond(MessageToDevice::EnableOutputAtPin {
            pin: PinAddress::from_raw(3, 4),
        });

        let replies = emulator.respond(MessageToDevice::MeasureAllVoltages);
        let MessageFromDevice::Voltages(boards) = &replies[1] else {
            panic!("expected voltages, got {:?}", replies[1]);
        };
        let lit: Vec<u8> = boards[0]
            .pins
            .iter()
            .filter(|reading| reading.raw > 0)
            .map(|reading| reading.pin)
            .collect();
        assert_eq!(lit, vec![4, 5]);
        assert_eq!(boards[0].pins[4].raw, 700);
    }

    #[test]
    fn test_reserved_commands_not_implemented() {
        let mut emulator = Emulator::new(&[1]);
        let replies = emulator.respond(MessageToDevice::Test {
            args: bytes::Bytes::from_static(&[1]),
        });
        assert_eq!(replies, vec![status(ControllerResponse::CommandNotImplemented)]);
        assert_eq!(
            Emulator::reject(&WireError::Unrecognized(42)),
            status(ControllerResponse::CommandNoSuchCommand)
        );
    }

    struct Forward(mpsc::UnboundedSender<MessageFromDevice>);

    #[async_trait::async_trait]
    impl MessageHandler for Forward {
        async fn on_message(&self, message: MessageFromDevice) {
            let _ = self.0.send(message);
        }
    }

    #[tokio::test]
    async fn test_emulator_answers_over_link() {
        let mut link = Link::new(LinkConfig {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            ..LinkConfig::default()
        });
        let inbound = link.take_inbound().unwrap();
        let addr = link.start().await.unwrap();

        let shutdown = CancellationToken::new();
        let emulator = tokio::spawn(run(addr, Emulator::new(&[7]), shutdown.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(Router::dispatch(inbound, Arc::new(Forward(tx))));
        let router = Router::new(link.sender());
        router.send(&MessageToDevice::GetBoardsOnline { rescan: true }).unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let MessageFromDevice::BoardsInfo(boards) = reply else {
            panic!("expected boards, got {:?}", reply);
        };
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].address, 7);

        link.stop().await;
        tokio::time::timeout(Duration::from_secs(2), emulator)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

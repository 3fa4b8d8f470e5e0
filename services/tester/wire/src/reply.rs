//! Controller-to-host messages and their decoding.
//!
//! `decode` takes an opcode and a cursor scoped to the rest of one frame.
//! Connectivity, board and voltage lists carry no count: records are read
//! until the cursor is exhausted, so a record cut short by the end of the
//! frame is a decode error rather than a silent truncation.

use crate::cursor::FrameCursor;
use crate::error::WireError;
use crate::opcode::ReplyOpcode;
use crate::types::{
    ControllerResponse, InternalParameters, Millivolts, PinAddress, VoltageLevel, PINS_PER_BOARD,
};
use bytes::Bytes;
use tracing::trace;

/// Raw measured value meaning "no measurement for this target"
pub const NOT_MEASURED: u16 = u16::MAX;

/// Encoded size of one connectivity entry
pub const CONNECTION_SIZE_BYTES: usize = 4;

/// Encoded size of one board record
pub const BOARD_INFO_SIZE_BYTES: usize = InternalParameters::SIZE_BYTES + 4;

/// Encoded size of one per-board voltage record
pub const BOARD_VOLTAGES_SIZE_BYTES: usize = 1 + PINS_PER_BOARD * 3;

/// One target pin found connected to the source pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    /// Connected pin
    pub target: PinAddress,
    /// Voltage seen at the target, if the controller measured it.
    ///
    /// `Millivolts(NOT_MEASURED)` has no encoding of its own; build entries
    /// with [`Connection::new`] to fold it into `None`.
    pub measured: Option<Millivolts>,
}

impl Connection {
    /// Entry for `target`, a reading of [`NOT_MEASURED`] becomes `None`
    pub fn new(target: PinAddress, measured: Option<Millivolts>) -> Self {
        Self {
            target,
            measured: measured.filter(|mv| mv.0 != NOT_MEASURED),
        }
    }
}

/// Connections reported for one source pin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connectivity {
    /// Pin the scan was driven from
    pub source: PinAddress,
    /// Pins found connected, in wire order
    pub connections: Vec<Connection>,
}

/// Description of one board answering on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardInfo {
    /// Calibration parameters stored on the board
    pub internals: InternalParameters,
    /// Bus address
    pub address: u8,
    /// Firmware version byte
    pub firmware_version: u8,
    /// Currently selected output level
    pub voltage_level: VoltageLevel,
    /// Board passed its self check
    pub healthy: bool,
}

/// Raw ADC reading at one pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinVoltage {
    /// Pin index on the board
    pub pin: u8,
    /// Raw ADC value
    pub raw: u16,
}

/// Readings for every pin of one board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardVoltages {
    /// Board address
    pub board: u8,
    /// One reading per pin, always [`PINS_PER_BOARD`] long
    pub pins: Vec<PinVoltage>,
}

/// Message sent from the controller to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFromDevice {
    /// Connections found for one source pin
    Connectivity(Connectivity),
    /// Status of the last command
    OperationStatus(ControllerResponse),
    /// Boards present on the bus
    BoardsInfo(Vec<BoardInfo>),
    /// Readings for every board
    Voltages(Vec<BoardVoltages>),
    /// Echo of a dummy request
    Dummy,
    /// Link keepalive
    KeepAlive,
}

impl MessageFromDevice {
    /// Opcode of this message
    pub fn opcode(&self) -> ReplyOpcode {
        match self {
            MessageFromDevice::Connectivity(_) => ReplyOpcode::Connectivity,
            MessageFromDevice::OperationStatus(_) => ReplyOpcode::OperationStatus,
            MessageFromDevice::BoardsInfo(_) => ReplyOpcode::BoardsInfo,
            MessageFromDevice::Voltages(_) => ReplyOpcode::Voltages,
            MessageFromDevice::Dummy => ReplyOpcode::Dummy,
            MessageFromDevice::KeepAlive => ReplyOpcode::KeepAlive,
        }
    }
}

/// Decode the message selected by `opcode` from the rest of one frame
pub fn decode(opcode: u8, cursor: &mut FrameCursor) -> Result<MessageFromDevice, WireError> {
    let kind = ReplyOpcode::try_from(opcode)?;
    trace!(?kind, remaining = cursor.remaining(), "decoding reply");

    let message = match kind {
        ReplyOpcode::Connectivity => MessageFromDevice::Connectivity(decode_connectivity(cursor)?),
        ReplyOpcode::OperationStatus => {
            let response = cursor.enumerated::<ControllerResponse>("operation_status")?;
            cursor.finish(opcode)?;
            MessageFromDevice::OperationStatus(response)
        }
        ReplyOpcode::BoardsInfo => {
            let mut boards = Vec::with_capacity(cursor.remaining() / BOARD_INFO_SIZE_BYTES);
            while !cursor.is_exhausted() {
                boards.push(decode_board_info(cursor)?);
            }
            MessageFromDevice::BoardsInfo(boards)
        }
        ReplyOpcode::Voltages => {
            let mut boards = Vec::with_capacity(cursor.remaining() / BOARD_VOLTAGES_SIZE_BYTES);
            while !cursor.is_exhausted() {
                boards.push(decode_board_voltages(cursor)?);
            }
            MessageFromDevice::Voltages(boards)
        }
        ReplyOpcode::Dummy => {
            cursor.finish(opcode)?;
            MessageFromDevice::Dummy
        }
        ReplyOpcode::KeepAlive => {
            cursor.finish(opcode)?;
            MessageFromDevice::KeepAlive
        }
    };

    Ok(message)
}

/// Decode one whole frame payload: opcode byte, then the message body
pub fn decode_frame(payload: Bytes) -> Result<MessageFromDevice, WireError> {
    let mut cursor = FrameCursor::new(payload);
    if cursor.is_exhausted() {
        return Err(WireError::Empty);
    }
    let opcode = cursor.u8("opcode")?;
    decode(opcode, &mut cursor)
}

fn decode_connectivity(cursor: &mut FrameCursor) -> Result<Connectivity, WireError> {
    let source = cursor.pin("source_pin")?;
    let mut connections = Vec::with_capacity(cursor.remaining() / CONNECTION_SIZE_BYTES);

    while !cursor.is_exhausted() {
        let target = cursor.pin("target_pin")?;
        let raw = cursor.u16_le("measured_value")?;
        connections.push(Connection::new(target, Some(Millivolts(raw))));
    }

    Ok(Connectivity {
        source,
        connections,
    })
}

pub(crate) fn decode_internal_parameters(
    cursor: &mut FrameCursor,
) -> Result<InternalParameters, WireError> {
    Ok(InternalParameters {
        out_r1: cursor.u16_le("out_r1")?,
        in_r1: cursor.u16_le("in_r1")?,
        out_r2: cursor.u16_le("out_r2")?,
        in_r2: cursor.u16_le("in_r2")?,
        shunt_r: cursor.u16_le("shunt_r")?,
        out_v_low: Millivolts(cursor.u16_le("out_v_low")?),
        out_v_high: Millivolts(cursor.u16_le("out_v_high")?),
    })
}

fn decode_board_info(cursor: &mut FrameCursor) -> Result<BoardInfo, WireError> {
    let internals = decode_internal_parameters(cursor)?;
    let address = cursor.u8("board_address")?;
    let firmware_version = cursor.u8("firmware_version")?;
    let voltage_level = cursor.enumerated::<VoltageLevel>("voltage_level")?;
    let healthy = cursor.flag("healthy")?;

    Ok(BoardInfo {
        internals,
        address,
        firmware_version,
        voltage_level,
        healthy,
    })
}

fn decode_board_voltages(cursor: &mut FrameCursor) -> Result<BoardVoltages, WireError> {
    let board = cursor.u8("board_address")?;
    let mut pins = Vec::with_capacity(PINS_PER_BOARD);
    for _ in 0..PINS_PER_BOARD {
        let pin = cursor.u8("pin_index")?;
        let raw = cursor.u16_le("pin_voltage")?;
        pins.push(PinVoltage { pin, raw });
    }
    Ok(BoardVoltages { board, pins })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(bytes: &'static [u8]) -> FrameCursor {
        FrameCursor::new(Bytes::from_static(bytes))
    }

    #[test]
    fn test_operation_status_maps_response() {
        let message = decode_frame(Bytes::from_static(&[51, 0x02])).unwrap();
        assert_eq!(
            message,
            MessageFromDevice::OperationStatus(ControllerResponse::CommandPerformanceFailure)
        );
    }

    #[test]
    fn test_operation_status_unmapped_byte_is_error() {
        let err = decode_frame(Bytes::from_static(&[51, 0x99])).unwrap_err();
        assert_eq!(
            err,
            WireError::InvalidField {
                field: "operation_status",
                value: 0x99
            }
        );
    }

    #[test]
    fn test_connectivity_single_target() {
        let raw = 1234u16.to_le_bytes();
        let payload = Bytes::from(vec![3, 5, 3, 6, raw[0], raw[1]]);
        let message = decode(50, &mut FrameCursor::new(payload)).unwrap();

        let MessageFromDevice::Connectivity(report) = message else {
            panic!("expected connectivity");
        };
        assert_eq!(report.source, PinAddress::from_raw(3, 5));
        assert_eq!(
            report.connections,
            vec![Connection {
                target: PinAddress::from_raw(3, 6),
                measured: Some(Millivolts(1234)),
            }]
        );
        assert!((report.connections[0].measured.unwrap().volts() - 1.234).abs() < 1e-6);
    }

    #[test]
    fn test_connectivity_without_targets() {
        let message = decode(50, &mut cursor(&[3, 5])).unwrap();
        assert_eq!(
            message,
            MessageFromDevice::Connectivity(Connectivity {
                source: PinAddress::from_raw(3, 5),
                connections: vec![],
            })
        );
    }

    #[test]
    fn test_connectivity_not_measured_and_filler_echo() {
        let message = decode(50, &mut cursor(&[255, 255, 1, 2, 0xFF, 0xFF])).unwrap();
        let MessageFromDevice::Connectivity(report) = message else {
            panic!("expected connectivity");
        };
        assert_eq!(report.source, PinAddress::ALL);
        assert_eq!(report.connections[0].measured, None);
    }

    #[test]
    fn test_connection_folds_sentinel_reading() {
        let target = PinAddress::from_raw(1, 2);
        assert_eq!(Connection::new(target, Some(Millivolts(NOT_MEASURED))).measured, None);
        assert_eq!(
            Connection::new(target, Some(Millivolts(NOT_MEASURED - 1))).measured,
            Some(Millivolts(0xFFFE))
        );
    }

    #[test]
    fn test_connectivity_partial_entry_is_error() {
        let err = decode(50, &mut cursor(&[3, 5, 3, 6, 0x10])).unwrap_err();
        assert!(matches!(err, WireError::Truncated { field: "measured_value", .. }));
    }

    #[test]
    fn test_boards_info_reads_until_exhausted() {
        let mut payload = Vec::new();
        for address in [1u8, 2] {
            for value in [10u16, 11, 12, 13, 14, 700, 3300] {
                payload.extend_from_slice(&value.to_le_bytes());
            }
            payload.extend_from_slice(&[address, 7, 1, 1]);
        }
        let message = decode(52, &mut FrameCursor::new(Bytes::from(payload))).unwrap();

        let MessageFromDevice::BoardsInfo(boards) = message else {
            panic!("expected boards info");
        };
        assert_eq!(boards.len(), 2);
        assert_eq!(boards[1].address, 2);
        assert_eq!(boards[0].firmware_version, 7);
        assert_eq!(boards[0].voltage_level, VoltageLevel::High);
        assert!(boards[0].healthy);
        assert_eq!(boards[0].internals.shunt_r, 14);
        assert!((boards[0].internals.out_v_high.volts() - 3.3).abs() < 1e-6);
    }

    #[test]
    fn test_boards_info_bad_voltage_level() {
        let mut payload = vec![0u8; InternalParameters::SIZE_BYTES];
        payload.extend_from_slice(&[1, 7, 9, 1]);
        let err = decode(52, &mut FrameCursor::new(Bytes::from(payload))).unwrap_err();
        assert_eq!(
            err,
            WireError::InvalidField {
                field: "voltage_level",
                value: 9
            }
        );
    }

    #[test]
    fn test_voltages_full_board() {
        let mut payload = vec![4u8];
        for pin in 0..PINS_PER_BOARD as u8 {
            payload.push(pin);
            payload.extend_from_slice(&(pin as u16 * 100).to_le_bytes());
        }
        let message = decode(53, &mut FrameCursor::new(Bytes::from(payload))).unwrap();

        let MessageFromDevice::Voltages(boards) = message else {
            panic!("expected voltages");
        };
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].board, 4);
        assert_eq!(boards[0].pins.len(), PINS_PER_BOARD);
        assert_eq!(boards[0].pins[31], PinVoltage { pin: 31, raw: 3100 });
    }

    #[test]
    fn test_voltages_short_board_is_error() {
        let err = decode(53, &mut cursor(&[4, 0, 1, 0])).unwrap_err();
        assert!(matches!(err, WireError::Truncated { .. }));
    }

    #[test]
    fn test_unknown_opcodes_are_unrecognized() {
        for opcode in [0u8, 1, 49, 56, 100, 116, 200] {
            let err = decode(opcode, &mut cursor(&[])).unwrap_err();
            assert_eq!(err, WireError::Unrecognized(opcode));
        }
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(decode_frame(Bytes::new()), Err(WireError::Empty));
    }

    #[test]
    fn test_keepalive_and_dummy_reject_trailing_bytes() {
        assert_eq!(decode_frame(Bytes::from_static(&[55])), Ok(MessageFromDevice::KeepAlive));
        assert_eq!(decode_frame(Bytes::from_static(&[54])), Ok(MessageFromDevice::Dummy));
        assert_eq!(
            decode_frame(Bytes::from_static(&[55, 0])),
            Err(WireError::Trailing { opcode: 55, extra: 1 })
        );
    }
}

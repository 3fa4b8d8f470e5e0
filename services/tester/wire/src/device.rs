//! Controller side of the codec.
//!
//! Parses host requests and serializes controller replies, mirroring the
//! firmware. The emulator binary and the round-trip tests use it; the host
//! path never does.

use crate::cursor::FrameCursor;
use crate::error::WireError;
use crate::opcode::RequestOpcode;
use crate::reply::{decode_internal_parameters, MessageFromDevice, NOT_MEASURED};
use crate::request::{put_internal_parameters, MessageToDevice};
use crate::types::{PinAddress, VoltageLevel};
use bytes::{BufMut, Bytes, BytesMut};

/// Parse one host request payload (opcode byte included)
pub fn decode_request(payload: Bytes) -> Result<MessageToDevice, WireError> {
    let mut cursor = FrameCursor::new(payload);
    if cursor.is_exhausted() {
        return Err(WireError::Empty);
    }
    let opcode = cursor.u8("opcode")?;
    let kind = RequestOpcode::try_from(opcode)?;

    let message = match kind {
        RequestOpcode::MeasureAllVoltages => MessageToDevice::MeasureAllVoltages,
        RequestOpcode::EnableOutputAtPin => MessageToDevice::EnableOutputAtPin {
            pin: cursor.pin("pin")?,
        },
        RequestOpcode::SetOutputVoltageLevel => MessageToDevice::SetOutputVoltageLevel {
            level: cursor.enumerated::<VoltageLevel>("voltage_level")?,
        },
        RequestOpcode::CheckConnections => MessageToDevice::CheckConnections {
            pin: scan_target(&mut cursor)?,
        },
        RequestOpcode::CheckResistances => MessageToDevice::CheckResistances {
            pin: scan_target(&mut cursor)?,
        },
        RequestOpcode::CheckVoltages => MessageToDevice::CheckVoltages {
            pin: scan_target(&mut cursor)?,
        },
        RequestOpcode::GetBoardsOnline => MessageToDevice::GetBoardsOnline {
            rescan: cursor.flag("rescan")?,
        },
        RequestOpcode::SetInternalParameters => MessageToDevice::SetInternalParameters {
            board: cursor.u8("board_address")?,
            params: decode_internal_parameters(&mut cursor)?,
        },
        RequestOpcode::GetInternalParameters => MessageToDevice::GetInternalParameters {
            board: cursor.u8("board_address")?,
        },
        RequestOpcode::CheckRaw => MessageToDevice::CheckRaw { args: cursor.rest() },
        RequestOpcode::GetInternalCounter => {
            MessageToDevice::GetInternalCounter { args: cursor.rest() }
        }
        RequestOpcode::GetTaskStackWatermark => {
            MessageToDevice::GetTaskStackWatermark { args: cursor.rest() }
        }
        RequestOpcode::SetNewAddressForBoard => {
            MessageToDevice::SetNewAddressForBoard { args: cursor.rest() }
        }
        RequestOpcode::Test => MessageToDevice::Test { args: cursor.rest() },
        RequestOpcode::KeepAlive => MessageToDevice::KeepAlive,
        RequestOpcode::DisableOutput => MessageToDevice::DisableOutput,
        RequestOpcode::Dummy => MessageToDevice::Dummy,
    };

    cursor.finish(opcode)?;
    Ok(message)
}

fn scan_target(cursor: &mut FrameCursor) -> Result<Option<PinAddress>, WireError> {
    let pin = cursor.pin("pin")?;
    Ok((pin != PinAddress::ALL).then_some(pin))
}

/// Serialize a controller reply (opcode byte included)
pub fn encode_reply(message: &MessageFromDevice) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(message.opcode() as u8);

    match message {
        MessageFromDevice::Connectivity(report) => {
            buf.put_u8(report.source.board);
            buf.put_u8(report.source.pin);
            for connection in &report.connections {
                buf.put_u8(connection.target.board);
                buf.put_u8(connection.target.pin);
                buf.put_u16_le(connection.measured.map_or(NOT_MEASURED, |mv| mv.0));
            }
        }
        MessageFromDevice::OperationStatus(response) => buf.put_u8(*response as u8),
        MessageFromDevice::BoardsInfo(boards) => {
            for board in boards {
                put_internal_parameters(&mut buf, &board.internals);
                buf.put_u8(board.address);
                buf.put_u8(board.firmware_version);
                buf.put_u8(board.voltage_level.byte_value());
                buf.put_u8(u8::from(board.healthy));
            }
        }
        MessageFromDevice::Voltages(boards) => {
            for board in boards {
                buf.put_u8(board.board);
                for reading in &board.pins {
                    buf.put_u8(reading.pin);
                    buf.put_u16_le(reading.raw);
                }
            }
        }
        MessageFromDevice::Dummy | MessageFromDevice::KeepAlive => {}
    }

    buf.freeze()
}

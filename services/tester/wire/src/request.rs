//! Host-to-controller messages and their encoding.
//!
//! Encoding writes the opcode followed by the fields in declared order.
//! Multi-byte integers are little-endian, booleans and small enums take one
//! byte. The length prefix is added by the transport, not here.

use crate::error::WireError;
use crate::opcode::RequestOpcode;
use crate::types::{InternalParameters, PinAddress, VoltageLevel, MAX_BOARD_ADDRESS};
use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

/// Reply deadline for single-pin scans and voltage sweeps
pub const SINGLE_PIN_RESULT_TIMEOUT: Duration = Duration::from_millis(2000);
/// Reply deadline for the output level switch
pub const SET_OUTPUT_LEVEL_TIMEOUT: Duration = Duration::from_millis(400);
/// Reply deadline for board enumeration
pub const BOARDS_ONLINE_TIMEOUT: Duration = Duration::from_millis(4000);
/// Reply deadline for board enumeration with a bus rescan
pub const BOARDS_ONLINE_RESCAN_TIMEOUT: Duration = Duration::from_millis(10_000);
/// Reply deadline for commands answered by an operation status
pub const OPERATION_STATUS_TIMEOUT: Duration = Duration::from_millis(1000);

/// Message sent from the host to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageToDevice {
    /// Sample every pin on every board
    MeasureAllVoltages,
    /// Drive the output stage at one pin
    EnableOutputAtPin {
        /// Pin to drive
        pin: PinAddress,
    },
    /// Select the output voltage level
    SetOutputVoltageLevel {
        /// Level to select
        level: VoltageLevel,
    },
    /// Connectivity scan of one pin, or of every pin when `None`
    CheckConnections {
        /// Pin to scan, a physical address when `Some`
        pin: Option<PinAddress>,
    },
    /// Resistance scan of one pin, or of every pin when `None`
    CheckResistances {
        /// Pin to scan, a physical address when `Some`
        pin: Option<PinAddress>,
    },
    /// Voltage scan of one pin, or of every pin when `None`
    CheckVoltages {
        /// Pin to scan, a physical address when `Some`
        pin: Option<PinAddress>,
    },
    /// Raw ADC scan; arguments are passed through untouched
    CheckRaw {
        /// Opaque argument bytes
        args: Bytes,
    },
    /// Enumerate boards on the bus
    GetBoardsOnline {
        /// Ask the controller to rescan the bus first
        rescan: bool,
    },
    /// Read a controller counter; arguments are passed through untouched
    GetInternalCounter {
        /// Opaque argument bytes
        args: Bytes,
    },
    /// Read task stack watermarks; arguments are passed through untouched
    GetTaskStackWatermark {
        /// Opaque argument bytes
        args: Bytes,
    },
    /// Re-address a board; arguments are passed through untouched
    SetNewAddressForBoard {
        /// Opaque argument bytes
        args: Bytes,
    },
    /// Write calibration parameters of one board
    SetInternalParameters {
        /// Board address
        board: u8,
        /// Parameters to store
        params: InternalParameters,
    },
    /// Read calibration parameters of one board
    GetInternalParameters {
        /// Board address
        board: u8,
    },
    /// Firmware self test; arguments are passed through untouched
    Test {
        /// Opaque argument bytes
        args: Bytes,
    },
    /// Link keepalive
    KeepAlive,
    /// Release the output stage
    DisableOutput,
    /// No-op echo
    Dummy,
}

impl MessageToDevice {
    /// Connectivity scan request with a checked target.
    ///
    /// A `Some` pin outside the physical range is refused: the all-pins
    /// filler would otherwise go out as an all-pins scan.
    pub fn check_connections(pin: Option<PinAddress>) -> Result<Self, WireError> {
        scan_target(pin).map(|pin| MessageToDevice::CheckConnections { pin })
    }

    /// Resistance scan request with a checked target
    pub fn check_resistances(pin: Option<PinAddress>) -> Result<Self, WireError> {
        scan_target(pin).map(|pin| MessageToDevice::CheckResistances { pin })
    }

    /// Voltage scan request with a checked target
    pub fn check_voltages(pin: Option<PinAddress>) -> Result<Self, WireError> {
        scan_target(pin).map(|pin| MessageToDevice::CheckVoltages { pin })
    }

    /// Opcode written as the first payload byte
    pub fn opcode(&self) -> RequestOpcode {
        match self {
            MessageToDevice::MeasureAllVoltages => RequestOpcode::MeasureAllVoltages,
            MessageToDevice::EnableOutputAtPin { .. } => RequestOpcode::EnableOutputAtPin,
            MessageToDevice::SetOutputVoltageLevel { .. } => RequestOpcode::SetOutputVoltageLevel,
            MessageToDevice::CheckConnections { .. } => RequestOpcode::CheckConnections,
            MessageToDevice::CheckResistances { .. } => RequestOpcode::CheckResistances,
            MessageToDevice::CheckVoltages { .. } => RequestOpcode::CheckVoltages,
            MessageToDevice::CheckRaw { .. } => RequestOpcode::CheckRaw,
            MessageToDevice::GetBoardsOnline { .. } => RequestOpcode::GetBoardsOnline,
            MessageToDevice::GetInternalCounter { .. } => RequestOpcode::GetInternalCounter,
            MessageToDevice::GetTaskStackWatermark { .. } => RequestOpcode::GetTaskStackWatermark,
            MessageToDevice::SetNewAddressForBoard { .. } => RequestOpcode::SetNewAddressForBoard,
            MessageToDevice::SetInternalParameters { .. } => RequestOpcode::SetInternalParameters,
            MessageToDevice::GetInternalParameters { .. } => RequestOpcode::GetInternalParameters,
            MessageToDevice::Test { .. } => RequestOpcode::Test,
            MessageToDevice::KeepAlive => RequestOpcode::KeepAlive,
            MessageToDevice::DisableOutput => RequestOpcode::DisableOutput,
            MessageToDevice::Dummy => RequestOpcode::Dummy,
        }
    }

    /// Encoded size in bytes, opcode included
    pub fn encoded_size(&self) -> usize {
        let fields = match self {
            MessageToDevice::EnableOutputAtPin { .. }
            | MessageToDevice::CheckConnections { .. }
            | MessageToDevice::CheckResistances { .. }
            | MessageToDevice::CheckVoltages { .. } => 2,
            MessageToDevice::SetOutputVoltageLevel { .. }
            | MessageToDevice::GetBoardsOnline { .. }
            | MessageToDevice::GetInternalParameters { .. } => 1,
            MessageToDevice::SetInternalParameters { .. } => 1 + InternalParameters::SIZE_BYTES,
            MessageToDevice::CheckRaw { args }
            | MessageToDevice::GetInternalCounter { args }
            | MessageToDevice::GetTaskStackWatermark { args }
            | MessageToDevice::SetNewAddressForBoard { args }
            | MessageToDevice::Test { args } => args.len(),
            MessageToDevice::MeasureAllVoltages
            | MessageToDevice::KeepAlive
            | MessageToDevice::DisableOutput
            | MessageToDevice::Dummy => 0,
        };
        1 + fields
    }

    /// Serialize the message: opcode, then fields in declared order
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_size());
        buf.put_u8(self.opcode() as u8);

        match self {
            MessageToDevice::EnableOutputAtPin { pin } => put_pin(&mut buf, *pin),
            MessageToDevice::SetOutputVoltageLevel { level } => buf.put_u8(level.byte_value()),
            MessageToDevice::CheckConnections { pin }
            | MessageToDevice::CheckResistances { pin }
            | MessageToDevice::CheckVoltages { pin } => {
                put_pin(&mut buf, pin.unwrap_or(PinAddress::ALL))
            }
            MessageToDevice::GetBoardsOnline { rescan } => buf.put_u8(u8::from(*rescan)),
            MessageToDevice::SetInternalParameters { board, params } => {
                buf.put_u8(*board);
                put_internal_parameters(&mut buf, params);
            }
            MessageToDevice::GetInternalParameters { board } => buf.put_u8(*board),
            MessageToDevice::CheckRaw { args }
            | MessageToDevice::GetInternalCounter { args }
            | MessageToDevice::GetTaskStackWatermark { args }
            | MessageToDevice::SetNewAddressForBoard { args }
            | MessageToDevice::Test { args } => buf.put_slice(args),
            MessageToDevice::MeasureAllVoltages
            | MessageToDevice::KeepAlive
            | MessageToDevice::DisableOutput
            | MessageToDevice::Dummy => {}
        }

        buf.freeze()
    }

    /// How long a caller should wait for the controller to answer.
    ///
    /// `None` means the reply has no fixed deadline: keepalives, full sweeps
    /// whose duration depends on the number of boards, and reserved commands.
    pub fn response_timeout(&self) -> Option<Duration> {
        match self {
            MessageToDevice::MeasureAllVoltages => Some(SINGLE_PIN_RESULT_TIMEOUT),
            MessageToDevice::SetOutputVoltageLevel { .. } => Some(SET_OUTPUT_LEVEL_TIMEOUT),
            MessageToDevice::CheckConnections { pin }
            | MessageToDevice::CheckResistances { pin }
            | MessageToDevice::CheckVoltages { pin } => pin.map(|_| SINGLE_PIN_RESULT_TIMEOUT),
            MessageToDevice::GetBoardsOnline { rescan: false } => Some(BOARDS_ONLINE_TIMEOUT),
            MessageToDevice::GetBoardsOnline { rescan: true } => Some(BOARDS_ONLINE_RESCAN_TIMEOUT),
            MessageToDevice::EnableOutputAtPin { .. }
            | MessageToDevice::SetInternalParameters { .. }
            | MessageToDevice::GetInternalParameters { .. }
            | MessageToDevice::DisableOutput
            | MessageToDevice::Dummy => Some(OPERATION_STATUS_TIMEOUT),
            MessageToDevice::CheckRaw { .. }
            | MessageToDevice::GetInternalCounter { .. }
            | MessageToDevice::GetTaskStackWatermark { .. }
            | MessageToDevice::SetNewAddressForBoard { .. }
            | MessageToDevice::Test { .. }
            | MessageToDevice::KeepAlive => None,
        }
    }
}

fn scan_target(pin: Option<PinAddress>) -> Result<Option<PinAddress>, WireError> {
    match pin {
        Some(address) if address.board > MAX_BOARD_ADDRESS => Err(WireError::InvalidField {
            field: "board_address",
            value: address.board,
        }),
        Some(address) if !address.is_valid() => Err(WireError::InvalidField {
            field: "pin_index",
            value: address.pin,
        }),
        other => Ok(other),
    }
}

fn put_pin(buf: &mut BytesMut, pin: PinAddress) {
    buf.put_u8(pin.board);
    buf.put_u8(pin.pin);
}

pub(crate) fn put_internal_parameters(buf: &mut BytesMut, params: &InternalParameters) {
    buf.put_u16_le(params.out_r1);
    buf.put_u16_le(params.in_r1);
    buf.put_u16_le(params.out_r2);
    buf.put_u16_le(params.in_r2);
    buf.put_u16_le(params.shunt_r);
    buf.put_u16_le(params.out_v_low.0);
    buf.put_u16_le(params.out_v_high.0);
}

/// Encode a request; free-function form of [`MessageToDevice::encode`]
pub fn encode(message: &MessageToDevice) -> Bytes {
    message.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Millivolts;

    #[test]
    fn test_measure_all_voltages_is_single_byte() {
        assert_eq!(&encode(&MessageToDevice::MeasureAllVoltages)[..], &[100]);
    }

    #[test]
    fn test_set_output_voltage_level() {
        let bytes = encode(&MessageToDevice::SetOutputVoltageLevel {
            level: VoltageLevel::High,
        });
        assert_eq!(&bytes[..], &[102, VoltageLevel::High.byte_value()]);
    }

    #[test]
    fn test_check_connections_all_pins_uses_filler() {
        let bytes = encode(&MessageToDevice::CheckConnections { pin: None });
        assert_eq!(&bytes[..], &[103, 255, 255]);

        let bytes = encode(&MessageToDevice::CheckConnections {
            pin: PinAddress::new(3, 5),
        });
        assert_eq!(&bytes[..], &[103, 3, 5]);
    }

    #[test]
    fn test_scan_constructors_refuse_out_of_range_pins() {
        assert_eq!(
            MessageToDevice::check_connections(Some(PinAddress::ALL)),
            Err(WireError::InvalidField {
                field: "board_address",
                value: 255
            })
        );
        assert_eq!(
            MessageToDevice::check_voltages(Some(PinAddress::from_raw(4, 32))),
            Err(WireError::InvalidField {
                field: "pin_index",
                value: 32
            })
        );

        let all = MessageToDevice::check_resistances(None).unwrap();
        assert_eq!(all, MessageToDevice::CheckResistances { pin: None });
        let one = MessageToDevice::check_connections(PinAddress::new(127, 31)).unwrap();
        assert_eq!(&one.encode()[..], &[103, 127, 31]);
    }

    #[test]
    fn test_set_internal_parameters_little_endian() {
        let params = InternalParameters {
            out_r1: 0x0102,
            in_r1: 2,
            out_r2: 3,
            in_r2: 4,
            shunt_r: 5,
            out_v_low: Millivolts(700),
            out_v_high: Millivolts(3300),
        };
        let bytes = encode(&MessageToDevice::SetInternalParameters { board: 9, params });
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &[111, 9, 0x02, 0x01]);
        assert_eq!(&bytes[12..14], &700u16.to_le_bytes());
        assert_eq!(&bytes[14..], &3300u16.to_le_bytes());
    }

    #[test]
    fn test_reserved_commands_pass_arguments_through() {
        let bytes = encode(&MessageToDevice::Test {
            args: Bytes::from_static(&[0xAA, 0xBB]),
        });
        assert_eq!(&bytes[..], &[113, 0xAA, 0xBB]);

        let bytes = encode(&MessageToDevice::GetInternalCounter { args: Bytes::new() });
        assert_eq!(&bytes[..], &[108]);
    }

    #[test]
    fn test_first_byte_matches_opcode_and_size() {
        let messages = [
            MessageToDevice::MeasureAllVoltages,
            MessageToDevice::EnableOutputAtPin {
                pin: PinAddress::from_raw(1, 2),
            },
            MessageToDevice::GetBoardsOnline { rescan: true },
            MessageToDevice::GetInternalParameters { board: 4 },
            MessageToDevice::SetNewAddressForBoard {
                args: Bytes::from_static(&[4, 5]),
            },
            MessageToDevice::KeepAlive,
            MessageToDevice::DisableOutput,
            MessageToDevice::Dummy,
        ];
        for message in &messages {
            let bytes = message.encode();
            assert_eq!(bytes[0], message.opcode() as u8);
            assert_eq!(bytes.len(), message.encoded_size());
        }
    }

    #[test]
    fn test_response_timeouts() {
        assert_eq!(
            MessageToDevice::GetBoardsOnline { rescan: true }.response_timeout(),
            Some(BOARDS_ONLINE_RESCAN_TIMEOUT)
        );
        assert_eq!(
            MessageToDevice::CheckConnections { pin: None }.response_timeout(),
            None
        );
        assert_eq!(
            MessageToDevice::CheckVoltages {
                pin: PinAddress::new(0, 0)
            }
            .response_timeout(),
            Some(SINGLE_PIN_RESULT_TIMEOUT)
        );
        assert_eq!(MessageToDevice::KeepAlive.response_timeout(), None);
    }
}

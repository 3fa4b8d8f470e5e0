//! Opcode tables for both directions of the controller protocol.
//!
//! The opcode is the first byte of every frame payload. Host requests use
//! 100..=116, controller replies use 50..=55; the two ranges never overlap.

/// Opcodes of messages sent from the host to the controller
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOpcode {
    /// Sample every pin on every board
    MeasureAllVoltages = 100,
    /// Drive the output stage at one pin
    EnableOutputAtPin = 101,
    /// Select the output voltage level
    SetOutputVoltageLevel = 102,
    /// Connectivity scan
    CheckConnections = 103,
    /// Resistance scan
    CheckResistances = 104,
    /// Voltage scan
    CheckVoltages = 105,
    /// Raw ADC scan (reserved)
    CheckRaw = 106,
    /// Enumerate boards on the bus
    GetBoardsOnline = 107,
    /// Controller counter (reserved)
    GetInternalCounter = 108,
    /// Task stack high-water mark (reserved)
    GetTaskStackWatermark = 109,
    /// Re-address a board (reserved)
    SetNewAddressForBoard = 110,
    /// Write board calibration parameters
    SetInternalParameters = 111,
    /// Read board calibration parameters
    GetInternalParameters = 112,
    /// Firmware self test (reserved)
    Test = 113,
    /// Link keepalive
    KeepAlive = 114,
    /// Release the output stage
    DisableOutput = 115,
    /// No-op echo
    Dummy = 116,
}

impl TryFrom<u8> for RequestOpcode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(RequestOpcode::MeasureAllVoltages),
            101 => Ok(RequestOpcode::EnableOutputAtPin),
            102 => Ok(RequestOpcode::SetOutputVoltageLevel),
            103 => Ok(RequestOpcode::CheckConnections),
            104 => Ok(RequestOpcode::CheckResistances),
            105 => Ok(RequestOpcode::CheckVoltages),
            106 => Ok(RequestOpcode::CheckRaw),
            107 => Ok(RequestOpcode::GetBoardsOnline),
            108 => Ok(RequestOpcode::GetInternalCounter),
            109 => Ok(RequestOpcode::GetTaskStackWatermark),
            110 => Ok(RequestOpcode::SetNewAddressForBoard),
            111 => Ok(RequestOpcode::SetInternalParameters),
            112 => Ok(RequestOpcode::GetInternalParameters),
            113 => Ok(RequestOpcode::Test),
            114 => Ok(RequestOpcode::KeepAlive),
            115 => Ok(RequestOpcode::DisableOutput),
            116 => Ok(RequestOpcode::Dummy),
            _ => Err(crate::WireError::Unrecognized(value)),
        }
    }
}

/// Opcodes of messages sent from the controller to the host
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyOpcode {
    /// Connections found for one source pin
    Connectivity = 50,
    /// Status of the last command
    OperationStatus = 51,
    /// Boards present on the bus
    BoardsInfo = 52,
    /// Per-pin voltages for every board
    Voltages = 53,
    /// Echo of a dummy request
    Dummy = 54,
    /// Link keepalive
    KeepAlive = 55,
}

impl TryFrom<u8> for ReplyOpcode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            50 => Ok(ReplyOpcode::Connectivity),
            51 => Ok(ReplyOpcode::OperationStatus),
            52 => Ok(ReplyOpcode::BoardsInfo),
            53 => Ok(ReplyOpcode::Voltages),
            54 => Ok(ReplyOpcode::Dummy),
            55 => Ok(ReplyOpcode::KeepAlive),
            _ => Err(crate::WireError::Unrecognized(value)),
        }
    }
}

//! Field types shared by requests and replies.

use std::fmt;

/// Highest address a board can answer on
pub const MAX_BOARD_ADDRESS: u8 = 127;

/// Number of pins on one I/O board
pub const PINS_PER_BOARD: usize = 32;

/// Raw value the controller uses for "every board, every pin"
pub const ALL_PINS_FILLER: u8 = u8::MAX;

/// Scale from raw millivolt fields to volts
pub const RAW_VOLTAGE_TO_VOLTS: f32 = 1.0 / 1000.0;

/// Physical connector identified by board address and pin index.
///
/// Decoded addresses are kept as received, so an out-of-range pair (such as
/// the all-pins filler echoed back by the controller) survives unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinAddress {
    /// Board address (0..=127)
    pub board: u8,
    /// Pin index on the board (0..=31)
    pub pin: u8,
}

impl PinAddress {
    /// The filler pair sent when a scan targets every pin
    pub const ALL: PinAddress = PinAddress {
        board: ALL_PINS_FILLER,
        pin: ALL_PINS_FILLER,
    };

    /// Build a checked address, `None` when either part is out of range
    pub fn new(board: u8, pin: u8) -> Option<Self> {
        let address = Self { board, pin };
        address.is_valid().then_some(address)
    }

    /// Build an address from raw wire bytes without checks
    pub const fn from_raw(board: u8, pin: u8) -> Self {
        Self { board, pin }
    }

    /// True when both parts are inside the physical ranges
    pub fn is_valid(&self) -> bool {
        self.board <= MAX_BOARD_ADDRESS && (self.pin as usize) < PINS_PER_BOARD
    }
}

impl fmt::Display for PinAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.board, self.pin)
    }
}

/// Output voltage level of the board drivers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoltageLevel {
    /// Low output level
    Low = 0,
    /// High output level
    High = 1,
}

impl VoltageLevel {
    /// Byte written on the wire
    pub fn byte_value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for VoltageLevel {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(VoltageLevel::Low),
            1 => Ok(VoltageLevel::High),
            other => Err(other),
        }
    }
}

impl fmt::Display for VoltageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoltageLevel::Low => write!(f, "low"),
            VoltageLevel::High => write!(f, "high"),
        }
    }
}

/// Controller answer carried by an operation status reply
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerResponse {
    /// Command accepted, result will follow
    CommandAcknowledge = 0,
    /// Command completed
    CommandPerformanceSuccess = 1,
    /// Command ran and failed
    CommandPerformanceFailure = 2,
    /// Opcode not known by the firmware
    CommandNoSuchCommand = 3,
    /// Command arguments rejected
    CommandInvalidArgument = 4,
    /// Another command is still running
    DeviceIsBusy = 5,
    /// Opcode known but not implemented by the firmware
    CommandNotImplemented = 6,
}

impl TryFrom<u8> for ControllerResponse {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ControllerResponse::CommandAcknowledge),
            1 => Ok(ControllerResponse::CommandPerformanceSuccess),
            2 => Ok(ControllerResponse::CommandPerformanceFailure),
            3 => Ok(ControllerResponse::CommandNoSuchCommand),
            4 => Ok(ControllerResponse::CommandInvalidArgument),
            5 => Ok(ControllerResponse::DeviceIsBusy),
            6 => Ok(ControllerResponse::CommandNotImplemented),
            other => Err(other),
        }
    }
}

/// Fixed-point voltage, one unit per millivolt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Millivolts(pub u16);

impl Millivolts {
    /// Value in volts
    pub fn volts(self) -> f32 {
        self.0 as f32 * RAW_VOLTAGE_TO_VOLTS
    }
}

impl fmt::Display for Millivolts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}V", self.volts())
    }
}

/// Calibration parameters stored on a board, all little-endian u16 on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InternalParameters {
    /// Output stage resistor 1 (ohm)
    pub out_r1: u16,
    /// Input stage resistor 1 (ohm)
    pub in_r1: u16,
    /// Output stage resistor 2 (ohm)
    pub out_r2: u16,
    /// Input stage resistor 2 (ohm)
    pub in_r2: u16,
    /// Shunt resistor (ohm)
    pub shunt_r: u16,
    /// Low output level
    pub out_v_low: Millivolts,
    /// High output level
    pub out_v_high: Millivolts,
}

impl InternalParameters {
    /// Encoded size in bytes
    pub const SIZE_BYTES: usize = 14;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_address_ranges() {
        assert!(PinAddress::new(127, 31).is_some());
        assert!(PinAddress::new(128, 0).is_none());
        assert!(PinAddress::new(0, 32).is_none());
        assert!(!PinAddress::ALL.is_valid());
        assert_eq!(PinAddress::from_raw(3, 5), PinAddress::new(3, 5).unwrap());
        assert_eq!(PinAddress::from_raw(37, 1).to_string(), "37:1");
    }

    #[test]
    fn test_millivolts_scaling() {
        assert!((Millivolts(3300).volts() - 3.3).abs() < 1e-6);
        assert_eq!(Millivolts(1500).to_string(), "1.500V");
    }

    #[test]
    fn test_closed_enums_reject_unmapped_bytes() {
        assert_eq!(VoltageLevel::try_from(1), Ok(VoltageLevel::High));
        assert_eq!(VoltageLevel::try_from(7), Err(7));
        assert_eq!(
            ControllerResponse::try_from(2),
            Ok(ControllerResponse::CommandPerformanceFailure)
        );
        assert_eq!(ControllerResponse::try_from(0x99), Err(0x99));
    }
}

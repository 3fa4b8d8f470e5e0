//! Bounded reader over a single frame payload.
//!
//! Variable-count sections (connectivity targets, board records, voltage
//! records) are read until the cursor is exhausted. That is only sound because
//! the cursor never sees more than one frame, so the only way to build one is
//! from the payload bytes the transport already cut out of the stream.

use crate::error::WireError;
use crate::types::PinAddress;
use bytes::{Buf, Bytes};

/// Sequential reader over exactly one frame payload.
#[derive(Debug, Clone)]
pub struct FrameCursor {
    buf: Bytes,
}

impl FrameCursor {
    /// Scope a cursor to one frame payload.
    pub fn new(payload: Bytes) -> Self {
        Self { buf: payload }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// True once every byte of the frame was consumed
    pub fn is_exhausted(&self) -> bool {
        !self.buf.has_remaining()
    }

    fn ensure(&self, field: &'static str, needed: usize) -> Result<(), WireError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(WireError::Truncated {
                field,
                needed,
                remaining,
            });
        }
        Ok(())
    }

    /// Read one raw byte
    pub fn u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a little-endian u16
    pub fn u16_le(&mut self, field: &'static str) -> Result<u16, WireError> {
        self.ensure(field, 2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a boolean byte, `1` meaning true
    pub fn flag(&mut self, field: &'static str) -> Result<bool, WireError> {
        Ok(self.u8(field)? == 1)
    }

    /// Read a (board, pin) pair without range checks
    pub fn pin(&mut self, field: &'static str) -> Result<PinAddress, WireError> {
        self.ensure(field, 2)?;
        let board = self.buf.get_u8();
        let pin = self.buf.get_u8();
        Ok(PinAddress::from_raw(board, pin))
    }

    /// Read one byte and map it through `TryFrom<u8>`, naming the field on failure
    pub fn enumerated<T>(&mut self, field: &'static str) -> Result<T, WireError>
    where
        T: TryFrom<u8>,
    {
        let value = self.u8(field)?;
        T::try_from(value).map_err(|_| WireError::InvalidField { field, value })
    }

    /// Take every byte left in the frame
    pub fn rest(&mut self) -> Bytes {
        std::mem::take(&mut self.buf)
    }

    /// Fail if any byte is left after a fixed-size message
    pub fn finish(&self, opcode: u8) -> Result<(), WireError> {
        match self.buf.remaining() {
            0 => Ok(()),
            extra => Err(WireError::Trailing { opcode, extra }),
        }
    }
}

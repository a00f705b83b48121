//! Protocol data units and the function code handlers working on them.

pub mod handler;

use byteorder::{BigEndian, ByteOrder};
use std::fmt::Display;

/// Function codes served by [`handler::dispatch`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl TryFrom<u8> for FunctionCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x01 => FunctionCode::ReadCoils,
            0x02 => FunctionCode::ReadDiscreteInputs,
            0x03 => FunctionCode::ReadHoldingRegisters,
            0x04 => FunctionCode::ReadInputRegisters,
            0x05 => FunctionCode::WriteSingleCoil,
            0x06 => FunctionCode::WriteSingleRegister,
            0x0F => FunctionCode::WriteMultipleCoils,
            0x10 => FunctionCode::WriteMultipleRegisters,
            _ => return Err(value),
        })
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({:#04X})", self, *self as u8)
    }
}

/// Function code and raw payload of one request, without transport framing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pdu {
    pub function: u8,
    pub payload: Vec<u8>,
}

impl Pdu {
    pub fn new(function: u8, payload: Vec<u8>) -> Self {
        Self { function, payload }
    }

    /// Big-endian word at byte `offset` of the payload
    pub fn word(&self, offset: usize) -> Option<u16> {
        self.payload
            .get(offset..offset + 2)
            .map(BigEndian::read_u16)
    }

    /// Payload bytes from `offset` on
    pub fn data(&self, offset: usize) -> &[u8] {
        self.payload.get(offset..).unwrap_or_default()
    }
}

//! The register bank shared by the protocol handlers and the pollers.

pub mod codec;
pub mod table;

use crate::mem::codec::{encode_words, pack_bits};
use crate::mem::table::Table;

use std::sync::{Arc, Mutex};

pub use crate::mem::table::ADDRESS_SPACE;

const SLICE_SIZE: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bits {
    Coils,
    DiscreteInputs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Words {
    HoldingRegisters,
    InputRegisters,
}

/// The four register classes of the Modbus data model
///
/// The bank does not check ranges: every `addr + count` handed in must stay within
/// [`ADDRESS_SPACE`]. Callers share the bank as [`SharedBank`] and keep the lock for the whole of
/// a validate, read/modify, write sequence.
#[derive(Debug, Default)]
pub struct RegisterBank {
    coils: Table<SLICE_SIZE, bool>,
    discrete_inputs: Table<SLICE_SIZE, bool>,
    holding_registers: Table<SLICE_SIZE, u16>,
    input_registers: Table<SLICE_SIZE, u16>,
}

pub type SharedBank = Arc<Mutex<RegisterBank>>;

impl RegisterBank {
    /// Move the bank behind the lock shared by handlers and pollers
    pub fn share(self) -> SharedBank {
        Arc::new(Mutex::new(self))
    }

    fn bits(&self, table: Bits) -> &Table<SLICE_SIZE, bool> {
        match table {
            Bits::Coils => &self.coils,
            Bits::DiscreteInputs => &self.discrete_inputs,
        }
    }

    fn bits_mut(&mut self, table: Bits) -> &mut Table<SLICE_SIZE, bool> {
        match table {
            Bits::Coils => &mut self.coils,
            Bits::DiscreteInputs => &mut self.discrete_inputs,
        }
    }

    fn words(&self, table: Words) -> &Table<SLICE_SIZE, u16> {
        match table {
            Words::HoldingRegisters => &self.holding_registers,
            Words::InputRegisters => &self.input_registers,
        }
    }

    fn words_mut(&mut self, table: Words) -> &mut Table<SLICE_SIZE, u16> {
        match table {
            Words::HoldingRegisters => &mut self.holding_registers,
            Words::InputRegisters => &mut self.input_registers,
        }
    }

    #[cfg(test)]
    pub fn bit(&self, table: Bits, addr: u16) -> bool {
        self.bits(table).get(addr as usize)
    }

    pub fn set_bit(&mut self, table: Bits, addr: u16, value: bool) {
        self.bits_mut(table).set(addr as usize, value)
    }

    #[cfg(test)]
    pub fn word(&self, table: Words, addr: u16) -> u16 {
        self.words(table).get(addr as usize)
    }

    pub fn set_word(&mut self, table: Words, addr: u16, value: u16) {
        self.words_mut(table).set(addr as usize, value)
    }

    /// Packed bits prefixed with `ceil(count / 8)`
    pub fn read_bits(&self, table: Bits, addr: u16, count: u16) -> Vec<u8> {
        pack_bits(&self.bits(table).read(addr as usize, count as usize))
    }

    /// Store the first `count` bits of `packed` starting at `addr`
    #[cfg(test)]
    pub fn write_bits(&mut self, table: Bits, addr: u16, count: u16, packed: &[u8]) {
        let bits = crate::mem::codec::unpack_bits(packed, count as usize);
        self.bits_mut(table).write(addr as usize, &bits)
    }

    /// Big-endian words prefixed with `count * 2`
    pub fn read_words(&self, table: Words, addr: u16, count: u16) -> Vec<u8> {
        encode_words(&self.words(table).read(addr as usize, count as usize))
    }

    pub fn write_words(&mut self, table: Words, addr: u16, words: &[u16]) {
        self.words_mut(table).write(addr as usize, words)
    }
}

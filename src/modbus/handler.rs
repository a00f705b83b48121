//! One handler per supported function code.
//!
//! Handlers validate the request, apply its effect to the bound pins and mirror the result into
//! the register bank. A handler either returns the response payload or an exception code and
//! never panics on malformed input. Mutating handlers keep the bank locked from validation until
//! the mirrored register is written.

use crate::binding::BindingTable;
use crate::gpio::Gpio;
use crate::mem::codec::{decode_words, unpack_bits};
use crate::mem::{Bits, RegisterBank, SharedBank, Words, ADDRESS_SPACE};
use crate::modbus::{FunctionCode, Pdu};
use crate::util::to_str;

use std::sync::{Arc, MutexGuard};
use tokio_modbus::prelude::ExceptionCode;
use tracing::{debug, error, trace};

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_WORDS: u16 = 125;
pub const MAX_WRITE_BITS: u16 = 1968;
pub const MAX_WRITE_WORDS: u16 = 123;

pub type HandlerResult = Result<Vec<u8>, ExceptionCode>;

/// State every handler operates on
#[derive(Clone)]
pub struct Context {
    pub bank: SharedBank,
    pub table: Arc<BindingTable>,
    pub gpio: Arc<dyn Gpio>,
}

impl Context {
    pub fn new(bank: SharedBank, table: Arc<BindingTable>, gpio: Arc<dyn Gpio>) -> Self {
        Self { bank, table, gpio }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegisterBank>, ExceptionCode> {
        self.bank.lock().map_err(|e| {
            error!("register bank unavailable: {e}");
            ExceptionCode::ServerDeviceFailure
        })
    }
}

/// Route the request to the handler of its function code
pub fn dispatch(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let Ok(function) = FunctionCode::try_from(pdu.function) else {
        debug!(function = pdu.function, "unsupported function code");
        return Err(ExceptionCode::IllegalFunction);
    };
    trace!(%function, payload = ?pdu.payload, "handling request");
    let result = match function {
        FunctionCode::ReadCoils => read_coils(ctx, pdu),
        FunctionCode::ReadDiscreteInputs => read_discrete_inputs(ctx, pdu),
        FunctionCode::ReadHoldingRegisters => read_holding_registers(ctx, pdu),
        FunctionCode::ReadInputRegisters => read_input_registers(ctx, pdu),
        FunctionCode::WriteSingleCoil => write_single_coil(ctx, pdu),
        FunctionCode::WriteSingleRegister => write_single_register(ctx, pdu),
        FunctionCode::WriteMultipleCoils => write_multiple_coils(ctx, pdu),
        FunctionCode::WriteMultipleRegisters => write_multiple_registers(ctx, pdu),
    };
    if let Err(e) = &result {
        debug!(%function, "request rejected with {e:?}");
    }
    result
}

/// Leading `(address, count or value)` pair of every supported request
fn header(pdu: &Pdu) -> Result<(u16, u16), ExceptionCode> {
    match (pdu.word(0), pdu.word(2)) {
        (Some(addr), Some(value)) => Ok((addr, value)),
        _ => Err(ExceptionCode::IllegalDataValue),
    }
}

fn check_range(addr: u16, count: u16) -> Result<(), ExceptionCode> {
    if addr as usize + count as usize > ADDRESS_SPACE {
        Err(ExceptionCode::IllegalDataAddress)
    } else {
        Ok(())
    }
}

fn check_quantity(count: u16, max: u16) -> Result<(), ExceptionCode> {
    if count == 0 || count > max {
        Err(ExceptionCode::IllegalDataValue)
    } else {
        Ok(())
    }
}

/// Address and count of a read request, checked in protocol order
fn read_range(pdu: &Pdu, max: u16) -> Result<(u16, u16), ExceptionCode> {
    let (addr, count) = header(pdu)?;
    check_range(addr, count)?;
    check_quantity(count, max)?;
    Ok((addr, count))
}

/// Address, count and data of a multiple write request
fn write_range(pdu: &Pdu, max: u16, bytes: fn(u16) -> usize) -> Result<(u16, u16, &[u8]), ExceptionCode> {
    let (addr, count) = header(pdu)?;
    check_range(addr, count)?;
    check_quantity(count, max)?;
    let expected = bytes(count);
    let data = pdu.data(5);
    match pdu.payload.get(4) {
        Some(size) if *size as usize == expected && data.len() == expected => {
            Ok((addr, count, data))
        }
        _ => Err(ExceptionCode::IllegalDataValue),
    }
}

fn echo(pdu: &Pdu) -> Vec<u8> {
    pdu.payload[..4].to_vec()
}

pub fn read_coils(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, count) = read_range(pdu, MAX_READ_BITS)?;
    let bank = ctx.lock()?;
    Ok(bank.read_bits(Bits::Coils, addr, count))
}

/// Unpolled digital inputs in the requested range are refreshed from their pins first
pub fn read_discrete_inputs(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, count) = read_range(pdu, MAX_READ_BITS)?;
    let mut bank = ctx.lock()?;
    for target in ctx.table.digital_inputs(addr, count) {
        let level = ctx.gpio.read(target.pin);
        bank.set_bit(Bits::DiscreteInputs, target.addr, level.is_high());
    }
    Ok(bank.read_bits(Bits::DiscreteInputs, addr, count))
}

pub fn read_holding_registers(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, count) = read_range(pdu, MAX_READ_WORDS)?;
    let bank = ctx.lock()?;
    Ok(bank.read_words(Words::HoldingRegisters, addr, count))
}

pub fn read_input_registers(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, count) = read_range(pdu, MAX_READ_WORDS)?;
    let bank = ctx.lock()?;
    Ok(bank.read_words(Words::InputRegisters, addr, count))
}

pub fn write_single_coil(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, raw) = header(pdu)?;
    let value = raw != 0;
    let mut bank = ctx.lock()?;
    match ctx.table.output(addr) {
        Some(binding) if binding.apply_coil(ctx.gpio.as_ref(), value) => {
            bank.set_bit(Bits::Coils, addr, value);
            debug!(addr, value, "coil written");
            Ok(echo(pdu))
        }
        _ => Err(ExceptionCode::IllegalDataAddress),
    }
}

pub fn write_single_register(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, value) = header(pdu)?;
    let mut bank = ctx.lock()?;
    let duty = ctx
        .table
        .output(addr)
        .and_then(|binding| binding.apply_duty(ctx.gpio.as_ref(), value))
        .ok_or(ExceptionCode::IllegalDataAddress)?;
    bank.set_word(Words::HoldingRegisters, addr, duty);
    debug!(addr, value, duty, "holding register written");
    Ok(echo(pdu))
}

/// Addresses without an output binding are skipped and the request still succeeds
pub fn write_multiple_coils(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, count, data) = write_range(pdu, MAX_WRITE_BITS, |count| count.div_ceil(8) as usize)?;
    let bits = unpack_bits(data, count as usize);
    let mut bank = ctx.lock()?;
    for (target, value) in (0..count).map(|i| addr + i).zip(bits) {
        match ctx.table.output(target) {
            Some(binding) if binding.apply_coil(ctx.gpio.as_ref(), value) => {
                bank.set_bit(Bits::Coils, target, value)
            }
            _ => trace!(addr = target, "skipping unbound coil"),
        }
    }
    debug!(addr, count, "coils written");
    Ok(echo(pdu))
}

/// Either every register is written or none is
///
/// All addresses must be bound to PWM outputs, otherwise the request fails without touching a
/// pin or register.
pub fn write_multiple_registers(ctx: &Context, pdu: &Pdu) -> HandlerResult {
    let (addr, count, data) = write_range(pdu, MAX_WRITE_WORDS, |count| count as usize * 2)?;
    let values = decode_words(data);
    let mut bank = ctx.lock()?;

    let mut bindings = Vec::with_capacity(values.len());
    for target in (0..count).map(|i| addr + i) {
        match ctx.table.output(target) {
            Some(binding) if binding.is_pwm() => bindings.push(binding),
            _ => {
                debug!(addr = target, "holding register is not bound to a pwm output");
                return Err(ExceptionCode::IllegalDataAddress);
            }
        }
    }

    let mut duties = Vec::with_capacity(values.len());
    for (binding, value) in bindings.into_iter().zip(&values) {
        if let Some(duty) = binding.apply_duty(ctx.gpio.as_ref(), *value) {
            duties.push(duty);
        }
    }
    bank.write_words(Words::HoldingRegisters, addr, &duties);
    debug!(addr, values = to_str(&duties), "holding registers written");
    Ok(echo(pdu))
}

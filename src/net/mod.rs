//! Glue between the tokio-modbus servers and the function code handlers.
//!
//! Decoded requests are encoded back into a raw [`Pdu`] so the handlers see exactly what the
//! client sent, and handler payloads are decoded into the [`Response`] the server writes back.

pub mod rtu;
pub mod tcp;

use crate::mem::codec::{decode_words, encode_words, pack_bits, unpack_bits};
use crate::modbus::handler::{dispatch, Context};
use crate::modbus::{FunctionCode, Pdu};

use std::future;
use tokio_modbus::prelude::{ExceptionCode, Request, Response, SlaveRequest};
use tracing::{debug, trace};

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

pub struct Service {
    ctx: Context,
}

impl Service {
    pub fn new(ctx: Context) -> Self {
        Self { ctx }
    }

    fn handle(&self, slave: u8, request: Request<'_>) -> Result<Response, ExceptionCode> {
        trace!(slave, ?request, "request received");
        let Some(pdu) = encode(&request) else {
            debug!(slave, ?request, "unsupported request");
            return Err(ExceptionCode::IllegalFunction);
        };
        let payload = dispatch(&self.ctx, &pdu)?;
        decode(&pdu, &payload)
    }
}

impl tokio_modbus::server::Service for Service {
    type Request = SlaveRequest<'static>;
    type Exception = ExceptionCode;
    type Response = Response;
    type Future = future::Ready<Result<Response, ExceptionCode>>;

    fn call(&self, request: Self::Request) -> Self::Future {
        let SlaveRequest { slave, request } = request;
        future::ready(self.handle(slave, request))
    }
}

fn header(function: FunctionCode, addr: u16, value: u16) -> Pdu {
    let mut payload = Vec::with_capacity(4);
    payload.extend_from_slice(&addr.to_be_bytes());
    payload.extend_from_slice(&value.to_be_bytes());
    Pdu::new(function as u8, payload)
}

/// Raw PDU of a decoded request, `None` for requests without a handler
pub fn encode(request: &Request<'_>) -> Option<Pdu> {
    let pdu = match request {
        Request::ReadCoils(addr, cnt) => header(FunctionCode::ReadCoils, *addr, *cnt),
        Request::ReadDiscreteInputs(addr, cnt) => {
            header(FunctionCode::ReadDiscreteInputs, *addr, *cnt)
        }
        Request::ReadHoldingRegisters(addr, cnt) => {
            header(FunctionCode::ReadHoldingRegisters, *addr, *cnt)
        }
        Request::ReadInputRegisters(addr, cnt) => {
            header(FunctionCode::ReadInputRegisters, *addr, *cnt)
        }
        Request::WriteSingleCoil(addr, value) => header(
            FunctionCode::WriteSingleCoil,
            *addr,
            if *value { COIL_ON } else { COIL_OFF },
        ),
        Request::WriteSingleRegister(addr, value) => {
            header(FunctionCode::WriteSingleRegister, *addr, *value)
        }
        Request::WriteMultipleCoils(addr, values) => {
            let mut pdu = header(FunctionCode::WriteMultipleCoils, *addr, values.len() as u16);
            pdu.payload.extend(pack_bits(values));
            pdu
        }
        Request::WriteMultipleRegisters(addr, values) => {
            let mut pdu = header(
                FunctionCode::WriteMultipleRegisters,
                *addr,
                values.len() as u16,
            );
            pdu.payload.extend(encode_words(values));
            pdu
        }
        _ => return None,
    };
    Some(pdu)
}

/// Response to `request` built from the handler payload
pub fn decode(request: &Pdu, payload: &[u8]) -> Result<Response, ExceptionCode> {
    let function =
        FunctionCode::try_from(request.function).map_err(|_| ExceptionCode::IllegalFunction)?;
    let count = request.word(2).unwrap_or_default() as usize;
    let data = payload.get(1..).unwrap_or_default();
    let echo = Pdu::new(request.function, payload.to_vec());
    let echoed = || match (echo.word(0), echo.word(2)) {
        (Some(addr), Some(value)) => Ok((addr, value)),
        _ => Err(ExceptionCode::ServerDeviceFailure),
    };

    Ok(match function {
        FunctionCode::ReadCoils => Response::ReadCoils(unpack_bits(data, count)),
        FunctionCode::ReadDiscreteInputs => Response::ReadDiscreteInputs(unpack_bits(data, count)),
        FunctionCode::ReadHoldingRegisters => Response::ReadHoldingRegisters(decode_words(data)),
        FunctionCode::ReadInputRegisters => Response::ReadInputRegisters(decode_words(data)),
        FunctionCode::WriteSingleCoil => {
            let (addr, value) = echoed()?;
            Response::WriteSingleCoil(addr, value != 0)
        }
        FunctionCode::WriteSingleRegister => {
            let (addr, value) = echoed()?;
            Response::WriteSingleRegister(addr, value)
        }
        FunctionCode::WriteMultipleCoils => {
            let (addr, count) = echoed()?;
            Response::WriteMultipleCoils(addr, count)
        }
        FunctionCode::WriteMultipleRegisters => {
            let (addr, count) = echoed()?;
            Response::WriteMultipleRegisters(addr, count)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, Service};
    use crate::binding::tests::output;
    use crate::binding::BindingTable;
    use crate::config::AppConfig;
    use crate::gpio::simulated::Simulated;
    use crate::mem::RegisterBank;
    use crate::modbus::handler::Context;
    use crate::modbus::Pdu;
    use std::borrow::Cow;
    use std::sync::Arc;
    use tokio_modbus::prelude::{ExceptionCode, Request, Response, SlaveRequest};
    use tokio_modbus::server::Service as _;

    #[test]
    fn ut_encode() {
        assert_eq!(
            encode(&Request::ReadHoldingRegisters(0x0102, 3)),
            Some(Pdu::new(3, vec![0x01, 0x02, 0x00, 0x03]))
        );
        assert_eq!(
            encode(&Request::WriteSingleCoil(7, true)),
            Some(Pdu::new(5, vec![0x00, 0x07, 0xFF, 0x00]))
        );
        assert_eq!(
            encode(&Request::WriteMultipleCoils(
                1,
                Cow::Owned(vec![true, false, true, true, false, false, false, false, true])
            )),
            Some(Pdu::new(15, vec![0x00, 0x01, 0x00, 0x09, 0x02, 0x0D, 0x01]))
        );
        assert_eq!(
            encode(&Request::WriteMultipleRegisters(5, Cow::Owned(vec![0x0102, 0x0304]))),
            Some(Pdu::new(16, vec![0x00, 0x05, 0x00, 0x02, 0x04, 0x01, 0x02, 0x03, 0x04]))
        );
        assert_eq!(encode(&Request::ReportServerId), None);
    }

    #[test]
    fn ut_decode() {
        assert_eq!(
            decode(&Pdu::new(1, vec![0, 0, 0, 10]), &[2, 0xB3, 0x02]),
            Ok(Response::ReadCoils(vec![
                true, true, false, false, true, true, false, true, false, true
            ]))
        );
        assert_eq!(
            decode(&Pdu::new(4, vec![0, 0, 0, 2]), &[4, 0x12, 0x34, 0xFF, 0x9B]),
            Ok(Response::ReadInputRegisters(vec![0x1234, 0xFF9B]))
        );
        assert_eq!(
            decode(&Pdu::new(5, vec![0, 3, 0xFF, 0]), &[0, 3, 0xFF, 0]),
            Ok(Response::WriteSingleCoil(3, true))
        );
        assert_eq!(
            decode(&Pdu::new(16, vec![0, 5, 0, 3]), &[0, 5, 0, 3]),
            Ok(Response::WriteMultipleRegisters(5, 3))
        );
        assert_eq!(
            decode(&Pdu::new(6, vec![0, 5, 0, 3]), &[0, 5]),
            Err(ExceptionCode::ServerDeviceFailure)
        );
    }

    #[tokio::test]
    async fn ut_service() {
        let gpio = Arc::new(Simulated::new());
        let mut config = AppConfig::default();
        config.outputs = vec![output(2, 18, Some(100))];
        let mut bank = RegisterBank::default();
        let table = BindingTable::build(&config, gpio.as_ref(), &mut bank).unwrap();
        let service = Service::new(Context::new(
            bank.share(),
            Arc::new(table),
            gpio.clone(),
        ));

        let call = |request| {
            service.call(SlaveRequest {
                slave: 1,
                request,
            })
        };
        assert_eq!(
            call(Request::WriteSingleRegister(2, 150)).await,
            Ok(Response::WriteSingleRegister(2, 150))
        );
        assert_eq!(gpio.state(18).duty, 100);
        assert_eq!(
            call(Request::ReadHoldingRegisters(1, 2)).await,
            Ok(Response::ReadHoldingRegisters(vec![0, 100]))
        );
        assert_eq!(
            call(Request::WriteSingleCoil(3, true)).await,
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            call(Request::ReportServerId).await,
            Err(ExceptionCode::IllegalFunction)
        );
    }
}

use crate::modbus::handler::Context;
use crate::net::Service;

use anyhow::{anyhow, Context as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_modbus::server::rtu::Server as RtuServer;
use tokio_serial::{DataBits, Parity, SerialPortBuilder, SerialStream, StopBits};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Serve requests on the serial line as well
    pub enabled: bool,

    /// The device path to use for communication.
    pub path: String,

    /// The baud rate to use for the serial connection.
    pub baud_rate: u32,

    /// The data bits [values: 5, 6, 7, 8]
    pub data_bits: u8,

    /// The stop bits [values: 1, 2]
    pub stop_bits: u8,

    /// The parity [values: E, O, N, even, odd, none]
    pub parity: String,

    /// Read timeout of the serial port in milliseconds, 0 keeps the driver default
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            path: crate::util::str!("/dev/ttyS0"),
            baud_rate: 19200,
            data_bits: 8,
            stop_bits: 1,
            parity: crate::util::str!("E"),
            timeout_ms: 0,
        }
    }
}

impl Config {
    /// Serial port settings described by this configuration
    pub fn builder(&self) -> anyhow::Result<SerialPortBuilder> {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            v => return Err(anyhow!("invalid data bits {v}")),
        };
        let stop_bits = match self.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            v => return Err(anyhow!("invalid stop bits {v}")),
        };
        let parity = match self.parity.to_lowercase().as_str() {
            "e" | "even" => Parity::Even,
            "o" | "odd" => Parity::Odd,
            "n" | "none" => Parity::None,
            v => return Err(anyhow!("invalid parity {v}")),
        };

        let mut builder = tokio_serial::new(&self.path, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity);
        if self.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(self.timeout_ms));
        }
        Ok(builder)
    }
}

/// Open the serial port and serve requests on it until `token` is cancelled
pub fn spawn(
    config: &Config,
    ctx: Context,
    token: CancellationToken,
) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
    let builder = config.builder()?;
    let serial_stream = SerialStream::open(&builder)
        .with_context(|| format!("failed to open serial port {}", config.path))?;
    info!(
        path = %config.path,
        baud_rate = config.baud_rate,
        data_bits = config.data_bits,
        parity = %config.parity,
        stop_bits = config.stop_bits,
        "serving modbus rtu"
    );

    let server = RtuServer::new(serial_stream);
    Ok(tokio::task::spawn(async move {
        tokio::select! {
            result = server.serve_forever(Service::new(ctx)) => {
                result.map(|_| ()).map_err(|e| anyhow!("{e}"))
            }
            _ = token.cancelled() => Ok(()),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn ut_builder() {
        let config = Config::default();
        assert!(config.builder().is_ok());

        let config = Config {
            parity: "odd".to_owned(),
            stop_bits: 2,
            data_bits: 7,
            timeout_ms: 500,
            ..Config::default()
        };
        assert!(config.builder().is_ok());

        for config in [
            Config {
                data_bits: 9,
                ..Config::default()
            },
            Config {
                stop_bits: 3,
                ..Config::default()
            },
            Config {
                parity: "mark".to_owned(),
                ..Config::default()
            },
        ] {
            assert!(config.builder().is_err());
        }
    }
}

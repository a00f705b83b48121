mod binding;
mod config;
mod gpio;
mod mem;
mod modbus;
mod net;
mod poll;
mod server;
mod util;

use crate::config::AppConfig;
use crate::server::Server;
use crate::util::Expect;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML (or JSON) configuration file.
    #[arg(short, long, default_value = "/etc/mbpio.toml")]
    config: PathBuf,

    /// Log level [values: trace, debug, info, warn, error], overridden by RUST_LOG.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log in JSON format.
    #[arg(long, default_value_t = false)]
    json: bool,
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let gpio = gpio::open(config.gpio.backend)?;
    let token = CancellationToken::new();

    let server = match Server::start(&config, gpio.clone(), token.clone()).await {
        Ok(server) => server,
        Err(e) => {
            if let Err(e) = gpio.close() {
                warn!("failed to close gpio session: {e}");
            }
            return Err(e);
        }
    };

    let signal = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for interrupt: {e}");
            return;
        }
        info!("interrupt received");
        signal.cancel();
    });

    server.run().await
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_tracing(&args);

    let config = match AppConfig::read(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        config = %args.config.display(),
        listen_on = %config.listen_on,
        inputs = config.inputs.len(),
        outputs = config.outputs.len(),
        "configuration loaded"
    );

    let runtime = Runtime::new().panic(|e| format!("Failed to create runtime. [{}]", e));
    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

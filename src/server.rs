//! Startup and shutdown of the complete server.

use crate::binding::BindingTable;
use crate::config::AppConfig;
use crate::gpio::Gpio;
use crate::mem::RegisterBank;
use crate::modbus::handler::Context;
use crate::net::{rtu, tcp};
use crate::poll::Scheduler;

use anyhow::anyhow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type ServeHandle = JoinHandle<anyhow::Result<()>>;

pub struct Server {
    gpio: Arc<dyn Gpio>,
    token: CancellationToken,
    scheduler: Scheduler,
    local_addr: SocketAddr,
    tcp: ServeHandle,
    rtu: Option<ServeHandle>,
}

impl Server {
    /// Build the bindings, bind all transports and start the pollers
    ///
    /// Every error returned here happens before a request is served.
    pub async fn start(
        config: &AppConfig,
        gpio: Arc<dyn Gpio>,
        token: CancellationToken,
    ) -> anyhow::Result<Self> {
        let mut bank = RegisterBank::default();
        let table = Arc::new(BindingTable::build(config, gpio.as_ref(), &mut bank)?);
        let bank = bank.share();
        let ctx = Context::new(bank.clone(), table.clone(), gpio.clone());

        let listener = tcp::bind(&config.listen_on).await?;
        let local_addr = listener.local_addr()?;
        let rtu = if config.rtu.enabled {
            Some(rtu::spawn(&config.rtu, ctx.clone(), token.clone())?)
        } else {
            None
        };

        let scheduler = Scheduler::start(&table, &config.pollers, gpio.clone(), bank, token.clone());
        let tcp = tcp::spawn(listener, ctx, token.clone());

        Ok(Self {
            gpio,
            token,
            scheduler,
            local_addr,
            tcp,
            rtu,
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until the token is cancelled or a transport ends, then stop everything
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            gpio,
            token,
            scheduler,
            local_addr,
            mut tcp,
            mut rtu,
        } = self;

        let rtu_ended = async {
            match rtu.as_mut() {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        };
        let ended = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = &mut tcp => Some((Transport::Tcp, joined(result))),
            result = rtu_ended => Some((Transport::Rtu, joined(result))),
        };
        // A transport only ends on its own when it failed
        let ended = ended.map(|(transport, result)| {
            let e = result
                .err()
                .unwrap_or_else(|| anyhow!("{transport} server stopped unexpectedly"));
            error!(%transport, "transport ended: {e:#}");
            (transport, Err::<(), _>(e))
        });

        token.cancel();
        info!(%local_addr, pollers = ?scheduler.states(), "shutting down");
        let pollers = scheduler.shutdown().await;
        debug!(?pollers, "pollers joined");

        let (tcp_result, rtu_result) = match ended {
            Some((Transport::Tcp, result)) => (result, wait(rtu).await),
            Some((Transport::Rtu, result)) => (joined(tcp.await), result),
            None => (joined(tcp.await), wait(rtu).await),
        };
        if let Err(e) = gpio.close() {
            error!("failed to close gpio session: {e}");
        }
        info!("stopped");
        tcp_result.and(rtu_result)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Tcp,
    Rtu,
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Rtu => write!(f, "rtu"),
        }
    }
}

fn joined(result: Result<anyhow::Result<()>, tokio::task::JoinError>) -> anyhow::Result<()> {
    result.map_err(|e| anyhow!("server task failed: {e}"))?
}

async fn wait(handle: Option<ServeHandle>) -> anyhow::Result<()> {
    match handle {
        Some(handle) => joined(handle.await),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::Server;
    use crate::binding::tests::{input, output};
    use crate::config::{AppConfig, ConfigError};
    use crate::gpio::simulated::Simulated;
    use crate::gpio::Level;
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_modbus::client::{tcp, Reader, Writer};
    use tokio_util::sync::CancellationToken;

    fn app_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.listen_on = "127.0.0.1:0".to_owned();
        config.pollers.pb.interval_ms = 20;
        config.inputs = vec![input(0, 5, Some("PB")), input(1, 6, None)];
        config.outputs = vec![output(0, 23, None)];
        config
    }

    #[tokio::test]
    async fn ut_start_invalid() {
        let token = CancellationToken::new();
        let gpio = Arc::new(Simulated::new());

        let mut config = app_config();
        config.inputs.push(input(9, 7, Some("DHT22")));
        config.inputs.push(input(10, 8, Some("LDR")));
        let err = Server::start(&config, gpio.clone(), token.clone())
            .await
            .err()
            .unwrap();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::Dht22Companion(9))
        );

        let mut config = app_config();
        config.listen_on = "not an address".to_owned();
        assert!(Server::start(&config, gpio, token).await.is_err());
    }

    #[tokio::test]
    async fn ut_run() {
        let token = CancellationToken::new();
        let gpio = Arc::new(Simulated::new());
        let server = Server::start(&app_config(), gpio.clone(), token.clone())
            .await
            .unwrap();
        let addr = server.local_addr();
        let handle = tokio::spawn(server.run());

        gpio.drive(5, Level::High);
        gpio.drive(6, Level::High);
        let mut client = tcp::connect(addr).await.unwrap();
        client.write_single_coil(0, true).await.unwrap().unwrap();
        assert_eq!(gpio.state(23).level, Level::High);
        assert_eq!(
            client.read_discrete_inputs(1, 1).await.unwrap().unwrap(),
            vec![true]
        );

        // Input 0 is polled, the read only returns what the poller stored
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            client.read_discrete_inputs(0, 1).await.unwrap().unwrap(),
            vec![true]
        );

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn ut_run_rtu_failure() {
        let token = CancellationToken::new();
        let gpio = Arc::new(Simulated::new());
        let mut server = Server::start(&app_config(), gpio, token.clone())
            .await
            .unwrap();
        server.rtu = Some(tokio::spawn(async { Err(anyhow!("serial port vanished")) }));

        let result = tokio::time::timeout(Duration::from_secs(1), server.run())
            .await
            .unwrap();
        assert!(result.unwrap_err().to_string().contains("serial port vanished"));
        assert!(token.is_cancelled());
    }
}

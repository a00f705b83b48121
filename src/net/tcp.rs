use crate::modbus::handler::Context;
use crate::net::Service;

use anyhow::{anyhow, Context as _};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server as TcpServer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bind the listener, failing before anything is served
pub async fn bind(listen_on: &str) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = listen_on
        .parse()
        .with_context(|| format!("invalid listen address {listen_on}"))?;
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Serve requests of every client connecting to `listener` until `token` is cancelled
pub fn spawn(
    listener: TcpListener,
    ctx: Context,
    token: CancellationToken,
) -> JoinHandle<anyhow::Result<()>> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "serving modbus tcp");
    }
    let server = TcpServer::new(listener);
    tokio::task::spawn(async move {
        let new_service = |socket_addr: SocketAddr| {
            debug!(%socket_addr, "client connected");
            Ok(Some(Service::new(ctx.clone())))
        };
        let on_connected = |stream, socket_addr| async move {
            accept_tcp_connection(stream, socket_addr, new_service)
        };
        let on_process_error = |err| {
            warn!("processing of client request failed: {err}");
        };
        tokio::select! {
            result = server.serve(&on_connected, on_process_error) => {
                result.map(|_| ()).map_err(|e| anyhow!("{e}"))
            }
            _ = token.cancelled() => Ok(()),
        }
    })
}

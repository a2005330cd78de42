//! TCP server: bind and accept loop
//!
//! Each accepted connection gets its own worker tasks; the accept loop itself
//! only registers and spawns. Bind failure is a process-fatal startup error.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::context::ServerContext;
use crate::net::worker::handle_connection;

pub struct GameServer {
    listener: TcpListener,
    server: ServerContext,
}

impl GameServer {
    pub async fn bind(server: ServerContext) -> anyhow::Result<Self> {
        let addr = SocketAddr::new(server.config.listen_address, server.config.listen_port);
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self { listener, server })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.server.shutdown.wait() => {
                    info!("accept loop stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            // Snapshots are latency-sensitive; never batch them
                            stream.set_nodelay(true).ok();
                            tokio::spawn(handle_connection(stream, peer, self.server.clone()));
                        }
                        Err(e) => {
                            warn!("accept failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}

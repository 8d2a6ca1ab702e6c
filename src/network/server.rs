//! TCP Game Server
//!
//! Accepts client connections, handles login over newline-delimited
//! JSON, and hands authenticated players to the matchmaking rendezvous.
//! The connection stays open for the whole match so the final results
//! can be delivered over it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::game::tick::EngineConfig;
use crate::network::protocol::{TcpClientMessage, TcpServerMessage};
use crate::network::rendezvous::{MatchmakingRendezvous, PortAllocator};
use crate::network::session::SessionRegistry;
use crate::store::{AccountStore, SpecSource};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address
    pub bind_addr: SocketAddr,
    /// First UDP port handed to session engines
    pub udp_port_base: u16,
    /// Match parameters passed to every engine
    pub engine: EngineConfig,
    /// Server version string
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            udp_port_base: crate::network::rendezvous::DEFAULT_UDP_PORT_BASE,
            engine: EngineConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    rendezvous: Arc<MatchmakingRendezvous>,
    registry: Arc<SessionRegistry>,
    accounts: Arc<dyn AccountStore>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        specs: Arc<dyn SpecSource>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let registry = Arc::new(SessionRegistry::new());
        let rendezvous = Arc::new(MatchmakingRendezvous::new(
            PortAllocator::new(config.udp_port_base),
            Arc::clone(&registry),
            specs,
            Arc::clone(&accounts),
            config.engine.clone(),
        ));

        Self {
            config,
            rendezvous,
            registry,
            accounts,
            shutdown_tx,
        }
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            version = %self.config.version,
            "game server listening"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!(%addr, "new connection");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "accept failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawn the per-connection task: login, then a single match.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let rendezvous = Arc::clone(&self.rendezvous);
        let accounts = Arc::clone(&self.accounts);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let (msg_tx, mut msg_rx) = mpsc::channel::<TcpServerMessage>(16);

            // Writer task: everything leaving this connection funnels
            // through one channel.
            let writer_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let mut line = match serde_json::to_string(&msg) {
                        Ok(l) => l,
                        Err(e) => {
                            error!(error = %e, "message encode failed");
                            continue;
                        }
                    };
                    line.push('\n');
                    if writer.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                let line = tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(l)) => l,
                        Ok(None) => {
                            debug!(%addr, "client disconnected");
                            break;
                        }
                        Err(e) => {
                            warn!(%addr, error = %e, "read failed");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                };

                let msg: TcpClientMessage = match serde_json::from_str(&line) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(%addr, error = %e, "invalid message");
                        continue;
                    }
                };

                match msg {
                    TcpClientMessage::Login { username, password } => {
                        let account = match accounts.authenticate(&username, &password) {
                            Ok(a) => a,
                            Err(e) => {
                                debug!(%addr, username = %username, error = %e, "login rejected");
                                let _ = msg_tx
                                    .send(TcpServerMessage::LoginResult {
                                        success: false,
                                        message: e.to_string(),
                                        account: None,
                                    })
                                    .await;
                                continue;
                            }
                        };

                        info!(%addr, username = %username, "login accepted");
                        let _ = msg_tx
                            .send(TcpServerMessage::LoginResult {
                                success: true,
                                message: "welcome".to_string(),
                                account: Some(account.clone()),
                            })
                            .await;

                        // A successful login doubles as a match request;
                        // this blocks until the results have been sent.
                        if let Err(e) = rendezvous.request_match(account, msg_tx.clone()).await {
                            warn!(%addr, username = %username, error = %e, "match failed");
                        }
                        break;
                    }
                }
            }

            // Let queued messages drain before tearing down the writer.
            drop(msg_tx);
            let _ = writer_task.await;
            debug!(%addr, "connection closed");
        });
    }

    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Number of running sessions.
    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }
}

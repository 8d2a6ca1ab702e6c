//! Tower Clash Match Server
//!
//! Binary entry point: wires the in-memory stores to the TCP/UDP
//! server and runs until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tower_clash::network::{GameServer, ServerConfig};
use tower_clash::store::{MemoryAccounts, StaticSpecs};
use tower_clash::{MATCH_DURATION_SECS, TICK_INTERVAL_MS, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Tower Clash Server v{}", VERSION);
    info!("Tick Interval: {} ms", TICK_INTERVAL_MS);
    info!("Match Duration: {} s", MATCH_DURATION_SECS);

    // Demo accounts; a deployment replaces MemoryAccounts with a real
    // backend behind the same trait.
    let accounts = Arc::new(MemoryAccounts::new());
    accounts.register("player1", "pass1");
    accounts.register("player2", "pass2");

    let config = ServerConfig::default();
    let server = GameServer::new(config, Arc::new(StaticSpecs), accounts);

    server.run().await.context("game server exited")?;
    Ok(())
}

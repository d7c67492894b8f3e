//! CodeRelay server: hosts shared code rooms over WebSocket.
//!
//! Configuration comes from `CODERELAY_*` environment variables (see
//! [`config`]). Logging goes through `env_logger`; set `RUST_LOG` to change
//! the level, which defaults to `info`.

mod config;

use coderelay_collab::{ServerConfig, SyncServer};
use env_logger::Env;
use log::{error, info, warn};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = match config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("{e}; falling back to defaults");
            ServerConfig::default()
        }
    };

    info!(
        "Starting CodeRelay on {} (heartbeat {}s, timeout {}s)",
        config.bind_addr, config.heartbeat_interval_secs, config.heartbeat_timeout_secs
    );

    let server = SyncServer::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connections served, {} active, {} rooms open",
                stats.total_connections, stats.active_connections, stats.active_rooms
            );
        }
    }
}

//! Process-level serving helper: signal handling and exit codes.

use crate::config::ServerConfig;
use crate::server::McpServer;
use tracing::{error, info};

/// Install the default tracing subscriber: env-filtered, writing to stderr
/// so stdout stays clean for the stdio transport's frames.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Process exit codes.
pub mod exit_codes {
    /// Normal shutdown.
    pub const SUCCESS: i32 = 0;
    /// Fatal startup or serve error.
    pub const FATAL: i32 = 1;
    /// Invalid configuration.
    pub const BAD_CONFIG: i32 = 2;
    /// Interrupted by SIGINT.
    pub const SIGINT: i32 = 130;
}

/// Validate the config, serve on the selected transport, and translate the
/// outcome into a process exit code. SIGINT triggers a graceful shutdown
/// and exits 130.
pub async fn run(server: McpServer, config: &ServerConfig) -> i32 {
    if let Err(e) = config.validate() {
        error!("refusing to start: {e}");
        return exit_codes::BAD_CONFIG;
    }

    tokio::select! {
        result = server.serve() => match result {
            Ok(()) => {
                info!("server exited cleanly");
                exit_codes::SUCCESS
            }
            Err(e) => {
                error!("server failed: {e}");
                exit_codes::FATAL
            }
        },
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("SIGINT received, shutting down"),
                Err(e) => error!("signal handler failed: {e}"),
            }
            server.shutdown().await;
            exit_codes::SIGINT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_mcp_core::protocol::ServerCapabilities;
    use conduit_mcp_core::types::ServerInfo;

    #[tokio::test]
    async fn bad_config_exits_2() {
        let mut config = ServerConfig::default();
        config.async_jobs.workers = 0;
        let server = McpServer::new(ServerInfo::new("t", "0"), ServerCapabilities::full());
        assert_eq!(run(server, &config).await, exit_codes::BAD_CONFIG);
    }

    #[tokio::test]
    async fn shutdown_before_serve_exits_0() {
        let config = ServerConfig::default();
        let server = McpServer::from_config(ServerInfo::new("t", "0"), config.clone());
        // Pre-arm shutdown so the stdio serve loop returns immediately.
        server.shutdown().await;
        assert_eq!(run(server, &config).await, exit_codes::SUCCESS);
    }
}

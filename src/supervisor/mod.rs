//! Process supervision for the webhook server.
//!
//! Mirrors the production launch sequence: verify the port is free, spawn the
//! server as a child process, poll TCP readiness with a bounded retry budget,
//! then probe `GET /health`. Optionally keeps a reverse-tunnel child alive
//! alongside the server.

use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::config::{ServerConfig, SupervisorConfig};
use crate::error::{BotError, Result};

pub struct Supervisor {
    config: SupervisorConfig,
    server: ServerConfig,
}

/// Handles to the children we spawned. Dropping these does not kill the
/// processes; call [`LaunchedServer::shutdown`] for a clean stop.
pub struct LaunchedServer {
    pub server: Child,
    pub tunnel: Option<Child>,
}

impl LaunchedServer {
    pub async fn shutdown(mut self) {
        if let Some(mut tunnel) = self.tunnel.take() {
            let _ = tunnel.kill().await;
        }
        let _ = self.server.kill().await;
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, server: ServerConfig) -> Self {
        Self { config, server }
    }

    /// Full launch sequence. `server_cmd` is the argv used to start the
    /// server child (normally the current executable plus `serve`).
    pub async fn launch(&self, server_cmd: &[String]) -> Result<LaunchedServer> {
        let addr = format!("{}:{}", self.server.host, self.server.port);

        if !self.port_free(&addr).await {
            return Err(BotError::Supervisor(format!(
                "port {} is already in use",
                self.server.port
            )));
        }

        tracing::info!(cmd = ?server_cmd, "spawning server process");
        let mut server = spawn_command(server_cmd)?;

        if let Err(e) = self.wait_for_port(&addr).await {
            let _ = server.kill().await;
            return Err(e);
        }

        let health_url = format!("http://{}/health", addr);
        let health = self.probe_health(&health_url).await?;
        tracing::info!(%health_url, status = %health["status"], "server is up");

        let tunnel = match &self.config.tunnel_command {
            Some(cmd_line) => {
                let argv: Vec<String> =
                    cmd_line.split_whitespace().map(str::to_string).collect();
                if argv.is_empty() {
                    None
                } else {
                    tracing::info!(cmd = %cmd_line, "starting reverse tunnel");
                    Some(spawn_command(&argv)?)
                }
            }
            None => None,
        };

        Ok(LaunchedServer { server, tunnel })
    }

    /// True when nothing is listening on `addr`.
    pub async fn port_free(&self, addr: &str) -> bool {
        TcpStream::connect(addr).await.is_err()
    }

    /// Poll until something accepts TCP connections on `addr`, up to
    /// `port_wait_attempts` tries with `port_wait_interval_ms` between them.
    pub async fn wait_for_port(&self, addr: &str) -> Result<()> {
        let interval = Duration::from_millis(self.config.port_wait_interval_ms);
        for attempt in 1..=self.config.port_wait_attempts {
            match TcpStream::connect(addr).await {
                Ok(_) => {
                    tracing::debug!(%addr, attempt, "port is accepting connections");
                    return Ok(());
                }
                Err(_) => {
                    tracing::debug!(%addr, attempt, "port not ready yet");
                    tokio::time::sleep(interval).await;
                }
            }
        }
        Err(BotError::Supervisor(format!(
            "{} did not open after {} attempts",
            addr, self.config.port_wait_attempts
        )))
    }

    /// GET the health endpoint and require HTTP 200 with a JSON body.
    pub async fn probe_health(&self, url: &str) -> Result<serde_json::Value> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.health_timeout_secs))
            .build()?;
        let resp = client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(BotError::Supervisor(format!(
                "health probe returned {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }
}

fn spawn_command(argv: &[String]) -> Result<Child> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| BotError::Supervisor("empty command line".into()))?;
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .spawn()
        .map_err(|e| BotError::Supervisor(format!("failed to spawn {}: {}", program, e)))
}

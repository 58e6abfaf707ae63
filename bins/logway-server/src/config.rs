use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use logway_api_server::{parse_duration, GatewayOptions};
use logway_engine::StoreConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "logway-server", about = "HTTP gateway over an append-only topic log")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Path to TOML config file. Built-in defaults are used when omitted.
    #[arg(long, env = "LOGWAY_CONFIG")]
    pub config: Option<String>,

    /// Listen address, overrides `listen` from the config file.
    #[arg(long, env = "LOGWAY_LISTEN")]
    pub listen: Option<String>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Upper bound for `pollDuration`, same grammar (`30s`, `1m`).
    #[serde(default = "default_max_poll_duration")]
    pub max_poll_duration: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub storage: StoreConfig,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_max_poll_duration() -> String {
    "30s".to_string()
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_poll_duration: default_max_poll_duration(),
            max_body_bytes: default_max_body_bytes(),
            storage: StoreConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn gateway_options(&self) -> Result<GatewayOptions, ServerError> {
        let max_poll_duration = parse_duration(&self.max_poll_duration).map_err(|e| ServerError::Config {
            context: "max_poll_duration",
            detail: e.to_string(),
        })?;
        if self.max_body_bytes == 0 {
            return Err(ServerError::Config {
                context: "max_body_bytes",
                detail: "must be greater than zero".into(),
            });
        }
        Ok(GatewayOptions {
            max_poll_duration,
            max_body_bytes: self.max_body_bytes,
        })
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    pub wppconnect: WppConnectConfig,
    #[serde(default = "default_backend_config")]
    pub backend: BackendConfig,
    #[serde(default = "default_bot_config")]
    pub bot: BotConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WppConnectConfig {
    pub base_url: String,
    pub session: String,
    #[serde(default)]
    pub token: String,
    /// Where the session should push its events. Derived from [server] when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_image_filename")]
    pub image_filename: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_primary_url")]
    pub primary_url: String,
    #[serde(default = "default_fallback_url")]
    pub fallback_url: String,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 0 means no limit on concurrently running forward pipelines.
    #[serde(default)]
    pub max_concurrent_forwards: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    #[serde(default = "default_aliases")]
    pub aliases: Vec<String>,
    /// Address that receives a notice every time the session connects
    #[serde(default)]
    pub notify_on_connect: Option<String>,
    #[serde(default = "default_connect_message")]
    pub connect_message: String,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_image_filename() -> String {
    "smartphone.jpg".to_string()
}

fn default_primary_url() -> String {
    "http://localhost:5001/webhook".to_string()
}

fn default_fallback_url() -> String {
    "http://127.0.0.1:5000/webhook".to_string()
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_aliases() -> Vec<String> {
    vec!["renato".to_string(), "phones paraguay".to_string()]
}

fn default_connect_message() -> String {
    "Bot online. Sistema restaurado. Pode enviar as perguntas.".to_string()
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind_address: default_bind_address(),
        port: default_port(),
    }
}

fn default_backend_config() -> BackendConfig {
    BackendConfig {
        primary_url: default_primary_url(),
        fallback_url: default_fallback_url(),
        retry_delay_ms: default_retry_delay_ms(),
        connect_timeout_secs: default_connect_timeout_secs(),
        max_concurrent_forwards: 0,
    }
}

fn default_bot_config() -> BotConfig {
    BotConfig {
        aliases: default_aliases(),
        notify_on_connect: None,
        connect_message: default_connect_message(),
    }
}

impl BackendConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Address the HTTP server binds to, e.g. "127.0.0.1:3000"
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    /// Webhook URL handed to the WPPConnect session on start.
    pub fn session_webhook_url(&self) -> String {
        match &self.wppconnect.webhook_url {
            Some(url) => url.clone(),
            None => format!("http://localhost:{}/wpp-events", self.server.port),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;

        if config.wppconnect.base_url.trim().is_empty() {
            anyhow::bail!("[wppconnect] base_url must not be empty");
        }
        if config.wppconnect.session.trim().is_empty() {
            anyhow::bail!("[wppconnect] session must not be empty");
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }
}

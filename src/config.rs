//! Persistent application configuration model and defaults.
//!
//! Both endpoints are resolved once at startup; there is no runtime
//! reconfiguration path.

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    /// Command API endpoint.
    #[serde(default)]
    pub server: EndpointConfig,
    /// Push-channel endpoint.
    #[serde(default)]
    pub channel: EndpointConfig,
}

/// One `{host, port}` endpoint.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

impl Config {
    /// Base URL for command API requests.
    pub fn command_base_url(&self) -> String {
        format!("http://{}:{}", self.server.host, self.server.port)
    }

    /// Websocket URL of the push channel.
    pub fn push_channel_url(&self) -> String {
        format!("ws://{}:{}/ws", self.channel.host, self.channel.port)
    }
}

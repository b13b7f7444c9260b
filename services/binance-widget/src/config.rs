//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client ID may be overridden with the BINANCE_CLIENT_ID env var.

use binance_client::HostConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Local HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Binance hosts and client identity
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BinanceConfig {
    pub client_id: String,
    pub oauth_host: String,
    pub api_host: String,
    /// ISO country code; "US" selects the binance.us site.
    pub country: Option<String>,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            client_id: binance_auth::DEFAULT_CLIENT_ID.to_string(),
            oauth_host: binance_auth::OAUTH_HOST.to_string(),
            api_host: binance_auth::API_HOST.to_string(),
            country: None,
        }
    }
}

/// Where encrypted credentials and their key live
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub prefs_path: PathBuf,
    pub key_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            prefs_path: PathBuf::from("binance-prefs.json"),
            key_file: PathBuf::from("binance.key"),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn validate_host(name: &str, host: &str) -> common::Result<()> {
    if !host.starts_with("http://") && !host.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {host}"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        validate_host("oauth_host", &config.binance.oauth_host)?;
        validate_host("api_host", &config.binance.api_host)?;

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if let Ok(client_id) = std::env::var("BINANCE_CLIENT_ID") {
            let client_id = client_id.trim();
            if !client_id.is_empty() {
                config.binance.client_id = client_id.to_owned();
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("binance-widget.toml")
    }

    /// Host settings for the Binance service.
    pub fn host_config(&self) -> common::Result<HostConfig> {
        let hosts = HostConfig::new(
            &self.binance.oauth_host,
            &self.binance.api_host,
            self.binance.client_id.clone(),
        )?;
        Ok(match &self.binance.country {
            Some(country) => hosts.with_country(country.clone()),
            None => hosts,
        })
    }
}

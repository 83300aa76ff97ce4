/// Configuration parsing for client and server: TOML files deserialized
/// with serde, following the same "nested sections, `#[serde(default)]`
/// on the optional ones, free functions for scalar defaults" shape used
/// throughout this codebase.
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ── TLS material ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TlsPathsConfig {
    #[serde(default = "default_ca_path")]
    pub ca: PathBuf,
    #[serde(default = "default_cert_path")]
    pub cert: PathBuf,
    #[serde(default = "default_key_path")]
    pub key: PathBuf,
}

impl Default for TlsPathsConfig {
    fn default() -> Self {
        Self { ca: default_ca_path(), cert: default_cert_path(), key: default_key_path() }
    }
}

fn certs_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join("certs")
}

fn default_ca_path() -> PathBuf {
    certs_dir().join("myCA.pem")
}

fn default_cert_path() -> PathBuf {
    certs_dir().join("server.crt")
}

fn default_key_path() -> PathBuf {
    certs_dir().join("server.key")
}

// ── Server config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerListenConfig,
    #[serde(default)]
    pub tls: TlsPathsConfig,
    #[serde(default)]
    pub proxy: ProxyPoolConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerListenConfig {
    #[serde(default = "default_listen_addr")]
    pub listen: String,
    #[serde(default = "default_control_port")]
    pub control_port: u16,
}

impl Default for ServerListenConfig {
    fn default() -> Self {
        Self { listen: default_listen_addr(), control_port: default_control_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyPoolConfig {
    #[serde(default = "default_proxy_base")]
    pub base: u16,
    #[serde(default = "default_proxy_amount")]
    pub amount: u16,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self { base: default_proxy_base(), amount: default_proxy_amount() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_proxy_accept_timeout_sec")]
    pub proxy_accept_timeout_sec: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { proxy_accept_timeout_sec: default_proxy_accept_timeout_sec() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub console: bool,
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), console: false, dir: default_log_dir() }
    }
}

// ── Client config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub tls: ClientTlsPathsConfig,
    #[serde(default)]
    pub client: ClientSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientTlsPathsConfig {
    #[serde(default = "default_ca_path")]
    pub ca: PathBuf,
    #[serde(default = "default_client_cert_path")]
    pub cert: PathBuf,
    #[serde(default = "default_client_key_path")]
    pub key: PathBuf,
    /// Deployment setting, not a protocol one (spec §6): accept the
    /// server's self-signed certificate without verifying its chain.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl Default for ClientTlsPathsConfig {
    fn default() -> Self {
        Self {
            ca: default_ca_path(),
            cert: default_client_cert_path(),
            key: default_client_key_path(),
            insecure_skip_verify: false,
        }
    }
}

fn default_client_cert_path() -> PathBuf {
    certs_dir().join("client.crt")
}

fn default_client_key_path() -> PathBuf {
    certs_dir().join("client.key")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self { control_port: default_control_port(), log_level: default_log_level() }
    }
}

// ── Defaults ─────────────────────────────────────────────────────────

fn default_listen_addr() -> String {
    "0.0.0.0".into()
}
fn default_control_port() -> u16 {
    47921
}
fn default_proxy_base() -> u16 {
    crate::portqueue::TCP_PROXY_BASE
}
fn default_proxy_amount() -> u16 {
    crate::portqueue::TCP_PROXY_AMOUNT
}
fn default_proxy_accept_timeout_sec() -> u64 {
    2
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/goexpose")
}

// ── Loaders ──────────────────────────────────────────────────────────

pub fn load_server_config(path: &Path) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

pub fn load_client_config(path: &Path) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

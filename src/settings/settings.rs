use anyhow::{Result, anyhow};
use config::{Config, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub auth: Auth,
    pub token: Token,
    pub store: Store,
    pub database: Database,
    pub http: Http,
    pub log: Log,
}

#[derive(Debug, Deserialize)]
pub struct Auth {
    pub backend: String, // "fake" or "real"
    /// When true, revocation-store outages let token checks pass instead of
    /// returning 503. Keep false outside of development.
    #[serde(default)]
    pub fail_open: bool,
    #[serde(default = "default_login_rate_limit")]
    pub login_rate_limit: u64,
    #[serde(default = "default_login_rate_window_secs")]
    pub login_rate_window_secs: u64,
}

fn default_login_rate_limit() -> u64 {
    100
}

fn default_login_rate_window_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
pub struct Token {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_minutes: u64,
    pub refresh_ttl_days: u64,
    pub remember_me_refresh_days: u64,
    #[serde(default)]
    pub enforce_nbf: bool,
}

#[derive(Debug, Deserialize)]
pub struct Store {
    pub backend: String, // "memory" or "redis"
    pub url: String,
    pub prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub cert_path: String,
    pub key_path: String,
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct Log {
    pub filter: String,
}

#[cfg(debug_assertions)]
const SETTINGS_PATH: &str = "settings/dev.toml";
#[cfg(not(debug_assertions))]
const SETTINGS_PATH: &str = "settings/release.toml";

pub fn parse_settings(path: Option<&str>) -> Result<Settings> {
    let path = path.unwrap_or(SETTINGS_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::with_name(path))
        .build()
        .map_err(|e| anyhow!(e))?
        .try_deserialize()
        .map_err(|e| anyhow!(e))?;

    Ok(settings)
}

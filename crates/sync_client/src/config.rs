use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "retro.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    pub identity: Option<String>,
    pub display_name: Option<String>,
    pub auth_token: Option<String>,
    pub poll_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            identity: None,
            display_name: None,
            auth_token: None,
            poll_interval_ms: 3000,
            reconnect_delay_ms: 3000,
            request_timeout_ms: 10_000,
        }
    }
}

impl ClientSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    identity: Option<String>,
    display_name: Option<String>,
    auth_token: Option<String>,
    poll_interval_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

/// Defaults, then `retro.toml` in the working directory, then environment variables.
pub fn load_settings() -> anyhow::Result<ClientSettings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE), |key| std::env::var(key).ok())
}

/// A missing file is not an error; a malformed one is.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
            apply_file(&mut settings, file_cfg);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    apply_env(&mut settings, env)?;
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if file_cfg.identity.is_some() {
        settings.identity = file_cfg.identity;
    }
    if file_cfg.display_name.is_some() {
        settings.display_name = file_cfg.display_name;
    }
    if file_cfg.auth_token.is_some() {
        settings.auth_token = file_cfg.auth_token;
    }
    if let Some(v) = file_cfg.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = file_cfg.reconnect_delay_ms {
        settings.reconnect_delay_ms = v;
    }
    if let Some(v) = file_cfg.request_timeout_ms {
        settings.request_timeout_ms = v;
    }
}

fn apply_env(
    settings: &mut ClientSettings,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    if let Some(v) = env("RETRO_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("RETRO_IDENTITY") {
        settings.identity = Some(v);
    }
    if let Some(v) = env("RETRO_DISPLAY_NAME") {
        settings.display_name = Some(v);
    }
    if let Some(v) = env("RETRO_AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }

    for (key, slot) in [
        ("APP__POLL_INTERVAL_MS", &mut settings.poll_interval_ms),
        ("APP__RECONNECT_DELAY_MS", &mut settings.reconnect_delay_ms),
        ("APP__REQUEST_TIMEOUT_MS", &mut settings.request_timeout_ms),
    ] {
        if let Some(v) = env(key) {
            *slot = v
                .trim()
                .parse()
                .with_context(|| format!("{key} must be a whole number of milliseconds"))?;
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

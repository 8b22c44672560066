use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "server.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
    pub expose_internal_errors: bool,
    pub body_limit_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/groups.db".into(),
            max_connections: storage::DEFAULT_MAX_CONNECTIONS,
            log_level: "info".into(),
            expose_internal_errors: true,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

/// Defaults, then `server.toml`, then `APP__*` variables, then the legacy
/// `SERVER_BIND` / `DATABASE_URL` aliases.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = load_settings_from(Path::new(SETTINGS_FILE))?;
    apply_legacy_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn load_settings_from(path: &Path) -> anyhow::Result<Settings> {
    config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|raw| raw.try_deserialize::<Settings>())
        .with_context(|| format!("failed to load settings from '{}'", path.display()))
}

fn apply_legacy_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("DATABASE_URL") {
        settings.database_url = v;
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

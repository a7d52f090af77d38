use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub starting_credits: i64,
    pub referral_bonus: i64,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8787".into(),
            database_url: "sqlite://./data/thumbnails.db".into(),
            gemini_api_key: None,
            gemini_model: gemini_integration::DEFAULT_MODEL.into(),
            gemini_base_url: gemini_integration::DEFAULT_BASE_URL.into(),
            starting_credits: 20,
            referral_bonus: 10,
            max_body_bytes: 24 * 1024 * 1024,
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, &file_cfg),
            Err(error) => warn!(%error, "ignoring unreadable server.toml"),
        }
    }

    apply_env_settings(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file_settings(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("gemini_model") {
        settings.gemini_model = v.clone();
    }
    if let Some(v) = file_cfg.get("gemini_base_url") {
        settings.gemini_base_url = v.clone();
    }
    if let Some(v) = file_cfg.get("starting_credits") {
        set_parsed(&mut settings.starting_credits, "starting_credits", v);
    }
    if let Some(v) = file_cfg.get("referral_bonus") {
        set_parsed(&mut settings.referral_bonus, "referral_bonus", v);
    }
    if let Some(v) = file_cfg.get("max_body_bytes") {
        set_parsed(&mut settings.max_body_bytes, "max_body_bytes", v);
    }
}

/// Later keys in each list win over earlier ones.
fn apply_env_settings(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = env(key) {
            settings.server_bind = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = env(key) {
            settings.database_url = v;
        }
    }
    for key in ["API_KEY", "GEMINI_API_KEY", "APP__GEMINI_API_KEY"] {
        if let Some(v) = env(key).filter(|v| !v.trim().is_empty()) {
            settings.gemini_api_key = Some(v);
        }
    }
    if let Some(v) = env("APP__GEMINI_MODEL") {
        settings.gemini_model = v;
    }
    if let Some(v) = env("APP__GEMINI_BASE_URL") {
        settings.gemini_base_url = v;
    }
    if let Some(v) = env("APP__STARTING_CREDITS") {
        set_parsed(&mut settings.starting_credits, "APP__STARTING_CREDITS", &v);
    }
    if let Some(v) = env("APP__REFERRAL_BONUS") {
        set_parsed(&mut settings.referral_bonus, "APP__REFERRAL_BONUS", &v);
    }
    if let Some(v) = env("APP__MAX_BODY_BYTES") {
        set_parsed(&mut settings.max_body_bytes, "APP__MAX_BODY_BYTES", &v);
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, key: &str, raw: &str) {
    match raw.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(key, value = raw, "ignoring unparseable setting"),
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
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

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use shared::protocol::SessionSnapshot;

use crate::bus::DEFAULT_BUS_CAPACITY;

pub const SETTINGS_FILE: &str = "panel.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PanelSettings {
    pub session_path: Option<PathBuf>,
    pub notification_capacity: usize,
    pub default_method: Option<String>,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            session_path: None,
            notification_capacity: DEFAULT_BUS_CAPACITY,
            default_method: None,
        }
    }
}

pub fn load_settings() -> PanelSettings {
    let raw = fs::read_to_string(SETTINGS_FILE).ok();
    load_settings_from(raw.as_deref(), |key| std::env::var(key).ok())
}

/// Defaults, then the flat `panel.toml` keys, then environment overrides.
pub fn load_settings_from(
    file_contents: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> PanelSettings {
    let mut settings = PanelSettings::default();

    if let Some(raw) = file_contents {
        match toml::from_str::<HashMap<String, String>>(raw) {
            Ok(file_cfg) => {
                if let Some(v) = file_cfg.get("session_path") {
                    settings.session_path = Some(PathBuf::from(v));
                }
                if let Some(v) = file_cfg.get("notification_capacity") {
                    apply_capacity(&mut settings, v);
                }
                if let Some(v) = file_cfg.get("default_method") {
                    settings.default_method = Some(v.clone());
                }
            }
            Err(err) => tracing::warn!("ignoring malformed {SETTINGS_FILE}: {err}"),
        }
    }

    if let Some(v) = env("PANEL_SESSION") {
        settings.session_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env("APP__SESSION_PATH") {
        settings.session_path = Some(PathBuf::from(v));
    }

    if let Some(v) = env("APP__NOTIFICATION_CAPACITY") {
        apply_capacity(&mut settings, &v);
    }

    if let Some(v) = env("APP__DEFAULT_METHOD") {
        settings.default_method = Some(v);
    }

    settings
}

fn apply_capacity(settings: &mut PanelSettings, raw: &str) {
    match raw.trim().parse::<usize>() {
        Ok(parsed) if parsed > 0 => settings.notification_capacity = parsed,
        _ => tracing::warn!("ignoring invalid notification capacity '{raw}'"),
    }
}

pub fn read_session(path: &Path) -> anyhow::Result<SessionSnapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read session file '{}'", path.display()))?;
    SessionSnapshot::from_json(&raw)
        .with_context(|| format!("failed to parse session file '{}'", path.display()))
}

//! Settings loading: defaults, JSON file deep-merge, environment overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::RelaySettings;

/// Default settings file: `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".relay")
        .join("settings.json")
}

/// Load from [`settings_path`] with environment overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides.
///
/// A missing file is not an error: compiled defaults are used.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;
    let merged = match std::fs::read_to_string(path) {
        Ok(contents) => {
            let user: Value = serde_json::from_str(&contents)?;
            tracing::debug!(?path, "loaded settings file");
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key; any
/// other overlay value (including arrays) replaces the base value. `null`
/// in the overlay leaves the base untouched.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Apply `RELAY_*` overrides. Unparseable values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut RelaySettings, env: impl Fn(&str) -> Option<String>) {
    if let Some(host) = env("RELAY_HOST") {
        settings.server.host = host;
    }
    if let Some(port) = env("RELAY_PORT") {
        match port.parse() {
            Ok(p) => settings.server.port = p,
            Err(_) => tracing::warn!(value = %port, "ignoring invalid RELAY_PORT"),
        }
    }
    if let Some(path) = env("RELAY_WS_PATH") {
        settings.server.ws_path = path;
    }
    if let Some(level) = env("RELAY_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(json) = env("RELAY_LOG_JSON") {
        match parse_bool(&json) {
            Some(b) => settings.logging.json = b,
            None => tracing::warn!(value = %json, "ignoring invalid RELAY_LOG_JSON"),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn deep_merge_nested_objects() {
        let base = json!({"server": {"port": 1, "host": "a"}, "x": [1, 2]});
        let overlay = json!({"server": {"port": 2}, "x": [3]});
        let merged = deep_merge(base, overlay);
        assert_eq!(merged, json!({"server": {"port": 2, "host": "a"}, "x": [3]}));
    }

    #[test]
    fn deep_merge_null_keeps_base() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let s = load_with_env(Path::new("/nonexistent/relay.json"), no_env).unwrap();
        assert_eq!(s, RelaySettings::default());
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9999}, "session": {"maxSendDrops": 5}}"#)
            .unwrap();
        let s = load_with_env(&path, no_env).unwrap();
        assert_eq!(s.server.port, 9999);
        assert_eq!(s.server.ws_path, "/ws");
        assert_eq!(s.session.max_send_drops, 5);
        assert_eq!(s.session.send_queue_capacity, 256);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_with_env(&path, no_env).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)), "got: {err}");
    }

    #[test]
    fn wrong_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();
        assert!(load_with_env(&path, no_env).is_err());
    }

    #[test]
    fn env_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9999, "host": "127.0.0.1"}}"#).unwrap();
        let env: HashMap<&str, &str> = [
            ("RELAY_PORT", "7000"),
            ("RELAY_WS_PATH", "/chat"),
            ("RELAY_LOG_LEVEL", "debug"),
            ("RELAY_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();
        let s = load_with_env(&path, |k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(s.server.port, 7000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.ws_path, "/chat");
        assert_eq!(s.logging.level, "debug");
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = RelaySettings::default();
        apply_env_overrides(&mut s, |k| match k {
            "RELAY_PORT" => Some("not-a-port".into()),
            "RELAY_LOG_JSON" => Some("maybe".into()),
            _ => None,
        });
        assert_eq!(s.server.port, 8089);
        assert!(!s.logging.json);
    }

    #[test]
    fn loaded_settings_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"session": {"sendQueueCapacity": 0}}"#).unwrap();
        let s = load_with_env(&path, no_env).unwrap();
        assert_eq!(s.session.send_queue_capacity, 1);
    }

    #[test]
    fn settings_path_ends_with_relay_dir() {
        let p = settings_path();
        assert!(p.ends_with(".relay/settings.json"), "got: {}", p.display());
    }
}

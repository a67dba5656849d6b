//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use duet_core::{SessionConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, MAX_CHUNK_SIZE};

/// Node configuration. File: ~/.config/duet/config.toml or /etc/duet/config.toml.
/// Env overrides: DUET_CHUNK_SIZE, DUET_MAX_FILE_SIZE, DUET_TRANSPORT_PORT,
/// DUET_DISCOVERY_PORT, DUET_DOWNLOAD_DIR.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Largest file chunk in bytes (default 16 KiB).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// Refuse to send files above this many bytes (default 100 MiB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Host TCP listen port; 0 picks a free one (default 45690).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// Rendezvous UDP multicast port (default 45691).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Where received files are written (default: current directory).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// How long a joiner looks for the host before giving up.
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub audio: bool,
    #[serde(default = "default_true")]
    pub video: bool,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}
fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}
fn default_transport_port() -> u16 {
    45690
}
fn default_discovery_port() -> u16 {
    45691
}
fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_resolve_timeout_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_file_size: default_max_file_size(),
            transport_port: default_transport_port(),
            discovery_port: default_discovery_port(),
            download_dir: default_download_dir(),
            resolve_timeout_secs: default_resolve_timeout_secs(),
            audio: true,
            video: true,
        }
    }
}

impl Config {
    /// Session limits. A chunk size too large for one frame is capped with a warning.
    pub fn session_config(&self) -> SessionConfig {
        let session = SessionConfig {
            chunk_size: self.chunk_size,
            max_file_size: self.max_file_size,
        }
        .normalized();
        if self.chunk_size > session.chunk_size {
            tracing::warn!(
                configured = self.chunk_size,
                max = MAX_CHUNK_SIZE,
                "chunk_size too large for one frame, capping"
            );
        }
        session
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file(&config_paths()).unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(n) = var("DUET_CHUNK_SIZE").and_then(|s| s.parse().ok()) {
        c.chunk_size = n;
    }
    if let Some(n) = var("DUET_MAX_FILE_SIZE").and_then(|s| s.parse().ok()) {
        c.max_file_size = n;
    }
    if let Some(p) = var("DUET_TRANSPORT_PORT").and_then(|s| s.parse().ok()) {
        c.transport_port = p;
    }
    if let Some(p) = var("DUET_DISCOVERY_PORT").and_then(|s| s.parse().ok()) {
        c.discovery_port = p;
    }
    if let Some(dir) = var("DUET_DOWNLOAD_DIR").filter(|s| !s.is_empty()) {
        c.download_dir = PathBuf::from(dir);
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/duet/config.toml"));
    }
    out.push(PathBuf::from("/etc/duet/config.toml"));
    out
}

/// First existing file wins; a file that fails to parse falls back to defaults.
fn load_file(paths: &[PathBuf]) -> Option<Config> {
    let p = paths.iter().find(|p| p.exists())?;
    let s = match std::fs::read_to_string(p) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(path = %p.display(), error = %e, "cannot read config file");
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %p.display(), error = %e, "invalid config file, using defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chunk_size = 4096\ndownload_dir = \"/tmp/in\"\n").unwrap();
        let c = load_file(&[dir.path().join("missing.toml"), path]).unwrap();
        assert_eq!(c.chunk_size, 4096);
        assert_eq!(c.download_dir, PathBuf::from("/tmp/in"));
        assert_eq!(c.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn unknown_field_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "proxy_port = 3128\n").unwrap();
        assert!(load_file(&[path]).is_none());
    }

    #[test]
    fn env_overrides_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> = [
            ("DUET_CHUNK_SIZE", "1024"),
            ("DUET_TRANSPORT_PORT", "not-a-port"),
            ("DUET_DOWNLOAD_DIR", "/srv/duet"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.chunk_size, 1024);
        assert_eq!(c.transport_port, default_transport_port());
        assert_eq!(c.download_dir, PathBuf::from("/srv/duet"));
        assert_eq!(c.session_config().chunk_size, 1024);
    }

    #[test]
    fn huge_chunk_size_is_capped() {
        let vars: HashMap<&str, &str> = [("DUET_CHUNK_SIZE", "5242880")].into_iter().collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(c.chunk_size, 5 * 1024 * 1024);
        assert_eq!(c.session_config().chunk_size, MAX_CHUNK_SIZE);

        let c = Config {
            chunk_size: 0,
            ..Config::default()
        };
        assert_eq!(c.session_config().chunk_size, DEFAULT_CHUNK_SIZE);
    }
}

//! Persisted defaults (SPEC_FULL.md §10.2): `$HOME/.tinifier/config.json`,
//! loaded the way the teacher loads `config.json` — CLI flags override
//! file values, file values override the built-in defaults here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub(crate) trait StorageObject {
    fn save_to<P: AsRef<Path>>(&self, path: P)
    where
        Self: Serialize;
    fn read_from<T: Default + serde::de::DeserializeOwned, P: AsRef<Path>>(path: P) -> T;
}

impl<T: Serialize> StorageObject for T {
    fn save_to<P: AsRef<Path>>(&self, path: P) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            if let Some(parent) = path.as_ref().parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(e) = std::fs::write(path, json) {
                eprintln!("warning: could not write config: {}", e);
            }
        }
    }

    fn read_from<R: Default + serde::de::DeserializeOwned, P: AsRef<Path>>(path: P) -> R {
        let Ok(text) = std::fs::read_to_string(path) else { return R::default() };
        match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("warning: could not parse config, using defaults: {}", e);
                R::default()
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub api_keys: Vec<String>,
    pub ext: Vec<String>,
    pub threads: usize,
    pub max_errors: usize,
    pub max_key_errors: u32,
    pub retry_attempts: usize,
    pub delay_between_retries_ms: u64,
    pub recursive: bool,
    pub skip_if_diff_less_than: f64,
    pub preserve_time: bool,
    pub keep_original_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            ext: vec!["png".to_string(), "jpg".to_string(), "jpeg".to_string(), "webp".to_string()],
            threads: 4,
            max_errors: 0,
            max_key_errors: 0,
            retry_attempts: 2,
            delay_between_retries_ms: 500,
            recursive: false,
            skip_if_diff_less_than: 0.0,
            preserve_time: false,
            keep_original_file: false,
        }
    }
}

impl Config {
    /// Loads `config_file` if it exists, otherwise returns built-in
    /// defaults. Never creates the file itself — `--config-file` is a
    /// read, not a migration, unlike the teacher's `Config::init`.
    pub fn load(config_file: Option<&Path>) -> Self {
        match config_file {
            Some(path) if path.exists() => Self::read_from(path),
            Some(_) => Self::default(),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::read_from(path),
                _ => Self::default(),
            },
        }
    }
}

/// `$HOME/.tinifier/config.json` (teacher precedent: `$HOME/.hostpilot/config.json`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tinifier").join("config.json"))
}

pub fn logs_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".tinifier").join("logs"))
        .unwrap_or_else(|| PathBuf::from(".tinifier/logs"))
}

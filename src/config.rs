use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_RENDER_ENDPOINT: &str = "http://127.0.0.1:5000/generate-syntax-tree";
const DEFAULT_RENDER_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub env_name: String,
    pub data_dir: PathBuf,
    #[serde(default = "default_render_endpoint")]
    pub render_endpoint: String,
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,
    #[serde(default)]
    pub debug: bool,
}

fn default_render_endpoint() -> String {
    DEFAULT_RENDER_ENDPOINT.to_string()
}

fn default_render_timeout_ms() -> u64 {
    DEFAULT_RENDER_TIMEOUT_MS
}

fn env_name() -> String {
    env::var("CALCULA_ENV").unwrap_or_else(|_| String::from("default"))
}

fn home_dir() -> PathBuf {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    PathBuf::from(env::var(var).unwrap_or_else(|_| String::from(".")))
}

impl Default for Config {
    fn default() -> Self {
        let env_name = env_name();
        Config {
            data_dir: home_dir().join(".calcula").join(&env_name),
            env_name,
            render_endpoint: default_render_endpoint(),
            render_timeout_ms: DEFAULT_RENDER_TIMEOUT_MS,
            debug: false,
        }
    }
}

impl Config {
    /// Reads the config file for the current environment, creating it with
    /// defaults the first time. An unreadable file falls back to defaults.
    /// Environment variables win over the file.
    pub fn load() -> Self {
        let config_path = Self::get_config_path();

        let config = match fs::read_to_string(&config_path) {
            Ok(contents) => serde_json::from_str::<Config>(&contents).unwrap_or_else(|err| {
                eprintln!("Warning: ignoring malformed {}: {}", config_path.display(), err);
                Config::default()
            }),
            Err(_) => {
                let config = Config::default();
                if let Err(err) = config.save() {
                    eprintln!("Warning: cannot write {}: {}", config_path.display(), err);
                }
                config
            }
        };

        config.with_env_overrides(|key| env::var(key).ok())
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("CALCULA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = lookup("CALCULA_RENDER_URL") {
            self.render_endpoint = endpoint;
        }
        if let Some(timeout) = lookup("CALCULA_RENDER_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.render_timeout_ms = timeout;
        }
        if let Some(debug) = lookup("CALCULA_DEBUG") {
            self.debug = matches!(debug.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    pub fn save(&self) -> io::Result<()> {
        let config_path = Self::get_config_path();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, contents)
    }

    pub fn get_config_path() -> PathBuf {
        home_dir().join(".calcula").join(env_name()).join("config.json")
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_env_overrides(lookup(&[
            ("CALCULA_DATA_DIR", "/tmp/calcula"),
            ("CALCULA_RENDER_URL", "http://render:8080/tree"),
            ("CALCULA_RENDER_TIMEOUT_MS", "250"),
            ("CALCULA_DEBUG", "TRUE"),
        ]));

        assert_eq!(config.store_path(), PathBuf::from("/tmp/calcula/session.json"));
        assert_eq!(config.render_endpoint, "http://render:8080/tree");
        assert_eq!(config.render_timeout(), Duration::from_millis(250));
        assert!(config.debug);
    }

    #[test]
    fn test_bad_timeout_override_is_ignored() {
        let config = Config::default().with_env_overrides(lookup(&[("CALCULA_RENDER_TIMEOUT_MS", "soon")]));
        assert_eq!(config.render_timeout_ms, DEFAULT_RENDER_TIMEOUT_MS);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: Config = serde_json::from_str(r#"{"env_name": "dev", "data_dir": "/data"}"#).unwrap();
        assert_eq!(config.render_endpoint, DEFAULT_RENDER_ENDPOINT);
        assert_eq!(config.render_timeout_ms, DEFAULT_RENDER_TIMEOUT_MS);
        assert!(!config.debug);
    }
}

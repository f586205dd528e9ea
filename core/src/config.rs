/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_MESSAGE_WINDOW: usize = 100;
const DEFAULT_SUBSCRIPTION_BUFFER: usize = 256;

/// Messaging core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for the document store (None = temporary in-memory store)
    pub data_dir: Option<PathBuf>,

    /// Number of most recent messages delivered by a chat room subscription
    pub message_window: usize,

    /// Capacity of the store's change-notification channel
    pub subscription_buffer: usize,

    /// Flush the store to disk after every write
    pub flush_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            message_window: DEFAULT_MESSAGE_WINDOW,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            flush_on_write: true,
        }
    }
}

impl Config {
    /// Config for an in-memory store, used by tests and the demo
    pub fn in_memory() -> Self {
        Self {
            flush_on_write: false,
            ..Default::default()
        }
    }

    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    config.data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--window" => {
                    let n = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--window requires a number".to_string())
                    })?;
                    config.message_window = parse_window(n)?;
                    i += 2;
                }
                "--in-memory" => {
                    config.data_dir = None;
                    config.flush_on_write = false;
                    i += 1;
                }
                other => {
                    return Err(ChatError::Config(format!(
                        "Unknown argument: {}. Usage: {} [--data-dir <path>] [--window <n>] [--in-memory]",
                        other,
                        args.first().map(String::as_str).unwrap_or("marketchat")
                    )));
                }
            }
        }

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `MARKETCHAT_DATA_DIR` / `MARKETCHAT_MESSAGE_WINDOW` overrides
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("MARKETCHAT_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
        if let Some(n) = lookup("MARKETCHAT_MESSAGE_WINDOW") {
            self.message_window = parse_window(&n)?;
        }
        Ok(())
    }
}

fn parse_window(raw: &str) -> Result<usize> {
    match raw.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ChatError::Config(format!(
            "message window must be a positive number, got {:?}",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(&args(&["marketchat"])).unwrap();
        assert_eq!(config.message_window, 100);
        assert!(config.flush_on_write);
    }

    #[test]
    fn test_flags() {
        let config =
            Config::from_args(&args(&["marketchat", "--data-dir", "/tmp/mc", "--window", "20"]))
                .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/mc")));
        assert_eq!(config.message_window, 20);
    }

    #[test]
    fn test_env_overrides() {
        let env = |vars: &'static [(&'static str, &'static str)]| {
            move |key: &str| {
                vars.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            }
        };

        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("MARKETCHAT_DATA_DIR", "/var/lib/marketchat"),
                ("MARKETCHAT_MESSAGE_WINDOW", "50"),
            ]))
            .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/marketchat")));
        assert_eq!(config.message_window, 50);

        let mut config = Config::default();
        config.apply_env(env(&[("MARKETCHAT_DATA_DIR", "")])).unwrap();
        assert_eq!(config.data_dir, None);

        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("MARKETCHAT_MESSAGE_WINDOW", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
        assert_eq!(config.message_window, DEFAULT_MESSAGE_WINDOW);
    }

    #[test]
    fn test_bad_window() {
        assert!(Config::from_args(&args(&["marketchat", "--window", "0"])).is_err());
        assert!(Config::from_args(&args(&["marketchat", "--window"])).is_err());
        assert!(Config::from_args(&args(&["marketchat", "--bogus"])).is_err());
    }
}

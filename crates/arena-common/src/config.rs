// config.rs — recognized runtime settings
//
// Persists the recognized settings as a TOML document rather than a
// bespoke `key = value` line format — the shape the rest of the corpus
// reaches for for config files.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PLAYER_NAME: &str = "Player";
pub const DEFAULT_SERVER_PORT: u16 = 32455;
pub const MAX_PLAYER_NAME_LEN: usize = 64;
pub const MAX_SERVER_NAME_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub player_name: String,
    pub server_port: u16,
    pub server_name: String,
    pub vsync: bool,
    pub chat_message_display_time: f32,
    pub event_message_display_time: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            player_name: DEFAULT_PLAYER_NAME.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            server_name: String::new(),
            vsync: true,
            chat_message_display_time: 5.0,
            event_message_display_time: 3.0,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl Config {
    /// Parses a TOML document of recognized settings. Unrecognized keys
    /// are ignored rather than rejected, so a config file can carry
    /// settings this crate's core doesn't consume — `#[serde(default)]`
    /// on every field means a partial document just overrides what it
    /// mentions.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config: Config = toml::from_str(text)?;
        config.player_name = truncate(&config.player_name, MAX_PLAYER_NAME_LEN);
        config.server_name = truncate(&config.server_name, MAX_SERVER_NAME_LEN);
        Ok(config)
    }

    pub fn write(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    let mut end = max_len.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.player_name, "Player");
        assert_eq!(config.server_port, 32455);
    }

    #[test]
    fn parse_overrides_recognized_keys() {
        let config = Config::parse("player_name = \"Alice\"\nserver_port = 9000\nvsync = false\n").unwrap();
        assert_eq!(config.player_name, "Alice");
        assert_eq!(config.server_port, 9000);
        assert!(!config.vsync);
    }

    #[test]
    fn parse_ignores_unknown_keys() {
        let config = Config::parse("unknown_cvar = 1\nplayer_name = \"Bob\"\n").unwrap();
        assert_eq!(config.player_name, "Bob");
    }

    #[test]
    fn write_then_parse_round_trips() {
        let mut config = Config::default();
        config.player_name = "Carol".into();
        config.server_port = 40000;
        let text = config.write().unwrap();
        let reparsed = Config::parse(&text).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn player_name_over_max_len_is_truncated() {
        let long = "x".repeat(100);
        let config = Config::parse(&format!("player_name = \"{long}\"\n")).unwrap();
        assert_eq!(config.player_name.len(), MAX_PLAYER_NAME_LEN);
    }
}

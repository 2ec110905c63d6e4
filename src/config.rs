use crate::error::ConfigError;
use crate::peer::types::ServerConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

// Debug builds log negotiation detail, release builds keep to lifecycle events.
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "pairchat=debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "pairchat=info";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub relay: RelayConfig,
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    pub data_link_label: String,
    /// Interest tags sent with the pairing request; the relay prefers partners with overlap.
    pub topics: Vec<String>,
    pub media: MediaConstraints,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    pub wake: WakeConfig,
}

/// Pre-connect probe that wakes an idle relay host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub enabled: bool,
    pub url: String,
    /// At most one wake-up per process within this window.
    pub interval_secs: u64,
    /// How long to wait once the relay answers that it is waking up.
    pub warmup_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub max_frame_rate: u32,
    pub audio: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: 4,
            data_link_label: "data-channel".into(),
            topics: Vec::new(),
            media: MediaConstraints::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/api/matchmaking".into(),
            connect_timeout_secs: 10,
            wake: WakeConfig::default(),
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:8000/ping".into(),
            interval_secs: 5 * 60,
            warmup_secs: 30,
            timeout_secs: 10,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: 24,
            max_frame_rate: 30,
            audio: true,
        }
    }
}

fn default_ice_servers() -> Vec<ServerConfig> {
    (0..4)
        .map(|n| {
            let host = if n == 0 {
                "stun.l.google.com".to_string()
            } else {
                format!("stun{n}.l.google.com")
            };
            ServerConfig {
                id: format!("default-stun-{n}"),
                r#type: "stun".into(),
                url: format!("stun:{host}:19302"),
                username: None,
                credential: None,
            }
        })
        .collect()
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl WakeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Applies `PAIRCHAT_RELAY_URL`, `PAIRCHAT_WAKE_URL` and `PAIRCHAT_TOPICS` (comma separated).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("PAIRCHAT_RELAY_URL") {
            self.relay.url = url;
        }
        if let Ok(url) = std::env::var("PAIRCHAT_WAKE_URL") {
            self.relay.wake.url = url;
        }
        if let Ok(topics) = std::env::var("PAIRCHAT_TOPICS") {
            self.topics = parse_topics(&topics);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "ICE server {} has an empty URL",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::Invalid(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }

        if !(self.relay.url.starts_with("ws://") || self.relay.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "relay URL must use ws:// or wss://, got {}",
                self.relay.url
            )));
        }

        if self.relay.connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid("relay connect timeout must be positive".into()));
        }
        if self.relay.wake.timeout_secs == 0 {
            return Err(ConfigError::Invalid("wake probe timeout must be positive".into()));
        }

        if self.data_link_label.is_empty() {
            return Err(ConfigError::Invalid("data link label is empty".into()));
        }

        Ok(())
    }
}

/// Normalises interest tags: trimmed, lowercased, empties dropped.
pub fn parse_topics(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ice_servers.len(), 4);
        assert_eq!(config.ice_servers[1].url, "stun:stun1.l.google.com:19302");
        assert_eq!(config.relay.wake.interval(), Duration::from_secs(300));
        assert_eq!(config.media.max_frame_rate, 30);
    }

    #[test]
    fn turn_without_credentials_rejected() {
        let mut config = SessionConfig::default();
        config.ice_servers.push(ServerConfig {
            id: "turn-1".into(),
            r#type: "turn".into(),
            url: "turn:turn.example.org:3478".into(),
            username: Some("user".into()),
            credential: None,
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("turn-1"));
    }

    #[test]
    fn relay_url_needs_websocket_scheme() {
        let mut config = SessionConfig::default();
        config.relay.url = "http://localhost:8000/api/matchmaking".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_timeouts_rejected() {
        let mut config = SessionConfig::default();
        config.relay.connect_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("connect timeout"));

        let mut config = SessionConfig::default();
        config.relay.wake.timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wake probe timeout"));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{ "relay": { "url": "wss://relay.example.org/api/matchmaking" }, "topics": ["music"] }"#,
        )
        .unwrap();
        assert_eq!(config.relay.url, "wss://relay.example.org/api/matchmaking");
        assert_eq!(config.relay.connect_timeout_secs, 10);
        assert!(config.relay.wake.enabled);
        assert_eq!(config.topics, vec!["music".to_string()]);
        assert_eq!(config.data_link_label, "data-channel");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "data_link_label": "chat", "ice_candidate_pool_size": 8 }}"#).unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.data_link_label, "chat");
        assert_eq!(config.ice_candidate_pool_size, 8);
    }

    #[test]
    fn topics_normalised() {
        assert_eq!(
            parse_topics(" Music, ,Rust ,"),
            vec!["music".to_string(), "rust".to_string()]
        );
    }
}

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::digits::DEFAULT_MAX_DIGITS;
use crate::model::DeviceIdentity;

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "HORIZON_";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub channel: ChannelConfig,
    pub power: PowerConfig,
    pub server: ServerConfig,
    pub boxes: Vec<KnownBox>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub startup_delay_ms: u64,
    pub key_delay_ms: u64,
    pub reconnect_min_secs: u64,
    pub reconnect_max_secs: u64,
    pub keepalive: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: 5900,
            connect_timeout_ms: 10_000,
            startup_delay_ms: 100,
            key_delay_ms: 100,
            reconnect_min_secs: 3,
            reconnect_max_secs: 19,
            keepalive: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub debounce_ms: u64,
    pub max_digits: usize,
    pub confirm_with_enter: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1500,
            max_digits: 3,
            confirm_with_enter: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerConfig {
    pub probe_port: u16,
    pub probe_path: String,
    pub probe_timeout_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            probe_port: 62137,
            probe_path: "/DeviceDescription.xml".to_string(),
            probe_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 7171,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct KnownBox {
    pub unique_id: String,
    pub label: String,
    pub ip: String,
    pub model_name: String,
    pub model_description: String,
}

impl KnownBox {
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            unique_id: self.unique_id.trim().to_string(),
            label: self.label.trim().to_string(),
            model_name: self.model_name.clone(),
            model_description: self.model_description.clone(),
            ip_address: self.ip.trim().to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&raw) {
                Ok(file_config) => config = file_config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "config file unreadable; using defaults");
                }
            }
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        // Session settings
        if let Some(port) = env_parse("SESSION_PORT") {
            self.session.port = port;
        }
        if let Some(ms) = env_parse("CONNECT_TIMEOUT_MS") {
            self.session.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("KEY_DELAY_MS") {
            self.session.key_delay_ms = ms;
        }
        if let Some(secs) = env_parse("RECONNECT_MIN_SECS") {
            self.session.reconnect_min_secs = secs;
        }
        if let Some(secs) = env_parse("RECONNECT_MAX_SECS") {
            self.session.reconnect_max_secs = secs;
        }

        // Channel entry
        if let Some(ms) = env_parse("DEBOUNCE_MS") {
            self.channel.debounce_ms = ms;
        }
        if let Some(confirm) = env_parse("CONFIRM_WITH_ENTER") {
            self.channel.confirm_with_enter = confirm;
        }

        // Power probe
        if let Some(port) = env_parse("PROBE_PORT") {
            self.power.probe_port = port;
        }
        if let Some(ms) = env_parse("PROBE_TIMEOUT_MS") {
            self.power.probe_timeout_ms = ms;
        }

        // Server settings
        if let Some(enabled) = env_parse("SERVER_ENABLED") {
            self.server.enabled = enabled;
        }
        if let Some(port) = env_parse("SERVER_PORT") {
            self.server.port = port;
        }
        if let Ok(val) = env::var(format!("{}SERVER_TOKEN", ENV_PREFIX)) {
            self.server.token = Some(val);
        }
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.session.port == 0 {
            return Err("session.port must be non-zero".into());
        }
        if self.session.connect_timeout_ms == 0 {
            return Err("session.connect_timeout_ms must be non-zero".into());
        }
        if self.session.reconnect_min_secs > self.session.reconnect_max_secs {
            return Err("session.reconnect_min_secs must not exceed reconnect_max_secs".into());
        }
        if !(1..=DEFAULT_MAX_DIGITS).contains(&self.channel.max_digits) {
            return Err(
                format!("channel.max_digits must be between 1 and {DEFAULT_MAX_DIGITS}").into(),
            );
        }
        if self.power.probe_port == 0 {
            return Err("power.probe_port must be non-zero".into());
        }
        if self.power.probe_timeout_ms == 0 {
            return Err("power.probe_timeout_ms must be non-zero".into());
        }
        if self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        for known in &self.boxes {
            if known.unique_id.trim().is_empty() {
                return Err("boxes.unique_id must be set".into());
            }
            if known.label.trim().is_empty() {
                return Err(format!("boxes.label must be set for {}", known.unique_id).into());
            }
            if known.ip.trim().parse::<IpAddr>().is_err() {
                return Err(format!(
                    "boxes.ip '{}' for {} is not an IP address",
                    known.ip, known.unique_id
                )
                .into());
            }
        }
        Ok(())
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .and_then(|val| val.trim().parse().ok())
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    let base = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join("horizon-remote").join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn living_room() -> KnownBox {
        KnownBox {
            unique_id: "3C36E4-EOSSTB-003356297204".to_string(),
            label: "Living room".to_string(),
            ip: "192.168.1.20".to_string(),
            model_name: "SMT-G7401".to_string(),
            model_description: "UPC Horizon".to_string(),
        }
    }

    #[test]
    fn default_config_serializes() {
        let cfg = Config::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.session.port, 5900);
        assert_eq!(parsed.power.probe_port, 62137);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let raw = r#"
            [channel]
            debounce_ms = 900

            [[boxes]]
            unique_id = "3C36E4-EOSSTB-003356297204"
            label = "Living room"
            ip = "192.168.1.20"
        "#;
        let cfg: Config = toml::from_str(raw).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.channel.debounce_ms, 900);
        assert_eq!(cfg.channel.max_digits, 3);
        assert_eq!(cfg.session.key_delay_ms, 100);
        assert_eq!(cfg.boxes.len(), 1);
        assert_eq!(cfg.boxes[0].model_name, "");
    }

    #[test]
    fn validate_rejects_zero_ports() {
        let mut cfg = Config::default();
        cfg.session.port = 0;
        assert!(cfg.validate().is_err());
        cfg.session.port = 5900;
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
        cfg.server.port = 7171;
        cfg.power.probe_port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_reconnect_window() {
        let mut cfg = Config::default();
        cfg.session.reconnect_min_secs = 20;
        cfg.session.reconnect_max_secs = 3;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_digit_selection() {
        let mut cfg = Config::default();
        cfg.channel.max_digits = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_oversized_digit_selection() {
        let mut cfg = Config::default();
        cfg.channel.max_digits = 2;
        assert!(cfg.validate().is_ok());
        cfg.channel.max_digits = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_checks_known_boxes() {
        let mut cfg = Config::default();
        cfg.boxes.push(living_room());
        assert!(cfg.validate().is_ok());

        cfg.boxes[0].ip = "horizon.local".to_string();
        assert!(cfg.validate().is_err());

        cfg.boxes[0] = living_room();
        cfg.boxes[0].unique_id = "  ".to_string();
        assert!(cfg.validate().is_err());

        cfg.boxes[0] = living_room();
        cfg.boxes[0].label = String::new();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn identity_is_trimmed() {
        let mut known = living_room();
        known.ip = " 192.168.1.20 ".to_string();
        let identity = known.identity();
        assert_eq!(identity.ip_address, "192.168.1.20");
        assert_eq!(identity.label, "Living room");
    }
}

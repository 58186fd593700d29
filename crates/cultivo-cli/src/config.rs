//! Configuration Vault – reads/writes `~/.cultivo/config.toml`.
//!
//! ```toml
//! stale_after_secs = 30
//! event_capacity = 256
//!
//! [broker]
//! host = "192.168.1.100"
//! port = 1883
//! client_id = "cultivo-dashboard"
//! username = "grower"
//! password = "…"
//! keep_alive_secs = 60
//! connect_timeout_secs = 10
//!
//! [backoff]
//! base_ms = 500
//! max_ms = 30000
//! jitter_ms = 250
//!
//! # Optional: replaces the built-in rack0 table.
//! [[channels]]
//! name = "water_temp"
//! wire_topic = "rack0/sens/water/temperature"
//! direction = "inbound"
//! kind = { kind = "numeric", min = -10.0, max = 60.0 }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use cultivo_hal::{TopicRegistry, rack};
use cultivo_types::{BackoffConfig, Channel, Credentials, SyncConfig, SyncError};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// `[broker]` section.  The password is wiped from memory on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Empty for anonymous sessions.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Stored as plain text; the file is created owner-only.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "cultivo-dashboard".to_string()
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_stale_after_secs() -> u64 {
    30
}
fn default_event_capacity() -> usize {
    256
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            client_id: default_client_id(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Persisted operator configuration stored in `~/.cultivo/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Readings older than this are shown as stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Custom channel table.  Empty means the built-in `rack0` table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<Channel>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            event_capacity: default_event_capacity(),
            broker: BrokerConfig::default(),
            backoff: BackoffConfig::default(),
            channels: Vec::new(),
        }
    }
}

impl Config {
    /// The engine's view of this configuration.
    pub fn to_sync_config(&self) -> SyncConfig {
        let credentials = (!self.broker.username.is_empty())
            .then(|| Credentials::new(self.broker.username.clone(), self.broker.password.clone()));
        SyncConfig {
            broker_host: self.broker.host.clone(),
            broker_port: self.broker.port,
            client_id: self.broker.client_id.clone(),
            credentials,
            keep_alive_secs: self.broker.keep_alive_secs,
            connect_timeout_secs: self.broker.connect_timeout_secs,
            backoff: self.backoff.clone(),
            stale_after_secs: self.stale_after_secs,
            event_capacity: self.event_capacity,
        }
    }

    /// The channel table to run with.
    pub fn registry(&self) -> Result<TopicRegistry, SyncError> {
        if self.channels.is_empty() {
            rack::rack0()
        } else {
            TopicRegistry::from_channels(self.channels.clone())
        }
    }
}

/// Return the path to `~/.cultivo/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".cultivo").join("config.toml")
}

/// Load the config from disk with environment overrides applied.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// Load the config from a specific path, without overrides.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `CULTIVO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `CULTIVO_BROKER_HOST` | `broker.host` |
/// | `CULTIVO_BROKER_PORT` | `broker.port` |
/// | `CULTIVO_USERNAME` | `broker.username` |
/// | `CULTIVO_PASSWORD` | `broker.password` |
/// | `CULTIVO_STALE_AFTER_SECS` | `stale_after_secs` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides_from(cfg, |key| std::env::var(key).ok());
}

/// Same as [`apply_env_overrides`] with an injectable variable lookup.
pub(crate) fn apply_overrides_from(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CULTIVO_BROKER_HOST") {
        cfg.broker.host = v;
    }
    if let Some(v) = lookup("CULTIVO_BROKER_PORT")
        && let Ok(port) = v.trim().parse::<u16>()
    {
        cfg.broker.port = port;
    }
    if let Some(v) = lookup("CULTIVO_USERNAME") {
        cfg.broker.username = v;
    }
    if let Some(v) = lookup("CULTIVO_PASSWORD") {
        cfg.broker.password = v;
    }
    if let Some(v) = lookup("CULTIVO_STALE_AFTER_SECS")
        && let Ok(secs) = v.trim().parse::<u64>()
    {
        cfg.stale_after_secs = secs;
    }
}

/// Save the config to disk, creating `~/.cultivo/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cultivo_types::{Direction, ValueKind};
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn debug_redacts_password() {
        let mut cfg = Config::default();
        cfg.broker.username = "adrian".to_string();
        cfg.broker.password = "librecultivo".to_string();
        let debug_str = format!("{:?}", cfg);
        assert!(!debug_str.contains("librecultivo"), "password must not appear in debug output");
        assert!(debug_str.contains("<redacted>"));
    }

    #[test]
    fn debug_shows_not_set_for_empty_password() {
        let debug_str = format!("{:?}", Config::default());
        assert!(debug_str.contains("<not set>"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.broker.host, "localhost");
        assert_eq!(loaded.broker.port, 1883);
        assert_eq!(loaded.stale_after_secs, 30);
        assert!(loaded.channels.is_empty());
        assert_eq!(loaded.registry().expect("rack0").len(), rack::rack0().expect("rack0").len());
    }

    #[test]
    fn custom_channels_replace_rack0() {
        let raw = r#"
            [broker]
            host = "192.168.1.100"

            [[channels]]
            name = "water_temp"
            wire_topic = "rack1/sens/water/temperature"
            direction = "inbound"
            kind = { kind = "numeric", min = -10.0, max = 60.0 }

            [[channels]]
            name = "light"
            wire_topic = "rack1/actu/light"
            direction = "outbound"
            kind = { kind = "boolean" }
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.broker.port, 1883);
        let registry = cfg.registry().expect("valid table");
        assert_eq!(registry.len(), 2);
        let light = registry.resolve("light").expect("light");
        assert_eq!(light.direction, Direction::Outbound);
        assert_eq!(light.kind, ValueKind::Boolean);
    }

    #[test]
    fn duplicate_custom_topics_are_rejected() {
        let mut cfg = Config::default();
        cfg.channels = vec![
            Channel::new("a", "rack1/x", Direction::Inbound, ValueKind::Boolean),
            Channel::new("b", "rack1/x", Direction::Inbound, ValueKind::Boolean),
        ];
        assert!(matches!(cfg.registry(), Err(SyncError::Config(_))));
    }

    #[test]
    fn sync_config_carries_credentials_only_with_username() {
        let mut cfg = Config::default();
        assert!(cfg.to_sync_config().credentials.is_none());

        cfg.broker.username = "adrian".to_string();
        cfg.broker.password = "secret".to_string();
        let sync = cfg.to_sync_config();
        let credentials = sync.credentials.as_ref().expect("credentials");
        assert_eq!(credentials.username, "adrian");
        assert_eq!(credentials.password, "secret");
        assert!(sync.validate().is_ok());
    }

    #[test]
    fn config_path_points_to_cultivo_dir() {
        let p = config_path_for_home("/home/grower");
        assert!(p.to_string_lossy().contains(".cultivo"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "broker = 12").expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn overrides_replace_broker_fields() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup(&[
                ("CULTIVO_BROKER_HOST", "broker.lan"),
                ("CULTIVO_BROKER_PORT", "8883"),
                ("CULTIVO_USERNAME", "grower"),
                ("CULTIVO_PASSWORD", "hunter2"),
                ("CULTIVO_STALE_AFTER_SECS", "90"),
            ]),
        );
        assert_eq!(cfg.broker.host, "broker.lan");
        assert_eq!(cfg.broker.port, 8883);
        assert_eq!(cfg.broker.username, "grower");
        assert_eq!(cfg.broker.password, "hunter2");
        assert_eq!(cfg.stale_after_secs, 90);
    }

    #[test]
    fn overrides_ignore_invalid_numbers() {
        let mut cfg = Config::default();
        apply_overrides_from(
            &mut cfg,
            lookup(&[
                ("CULTIVO_BROKER_PORT", "not-a-port"),
                ("CULTIVO_STALE_AFTER_SECS", "-3"),
            ]),
        );
        assert_eq!(cfg.broker.port, 1883);
        assert_eq!(cfg.stale_after_secs, 30);
    }

    #[test]
    fn env_overrides_read_the_process_environment() {
        // SAFETY: no other test in this crate touches this variable.
        unsafe { std::env::set_var("CULTIVO_USERNAME", "from-env") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.broker.username, "from-env");
        unsafe { std::env::remove_var("CULTIVO_USERNAME") };
    }
}

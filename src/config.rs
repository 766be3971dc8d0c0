use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::Catalog;
use crate::hardware::ListenerConfig;

/// Vehicle definition used when no catalog file is configured (ICSim traffic)
pub const DEFAULT_CATALOG_DBC: &str = r#"
VERSION ""

BO_ 580 ICSim_Speedometer: 5 ICSim
 SG_ ICSim_Speed : 31|16@0+ (0.01,0) [0|655.35] "km/h" Vector__XXX

BO_ 392 ICSim_Signals: 4 ICSim
 SG_ ICSim_TurnLeft : 0|1@1+ (1,0) [0|1] "" Vector__XXX
 SG_ ICSim_TurnRight : 1|1@1+ (1,0) [0|1] "" Vector__XXX
"#;

/// Widget layout used when no widget file is configured
pub const DEFAULT_WIDGET_CONFIG: &str = "\
# SIGNAL[:SIGNAL],LABEL,TYPE[:SKIN],VISIBLE,X,Y,W,H,Z,OPTIONS
ICSim_Speed,Vehicle Speed,needle_meter,yes,20,20,200,200,2,240:0:0:240:20:5:10:MONOSPACE:DIAMOND:GROOVE:80:FD6611AA:DDDDDDFF:DD9999CC:km/h:100:60
ICSim_Speed,Speed,needle_meter:minimalistic,yes,240,20,100,100,1,180:0:0:240:::::::::::km/h
";

/// Application settings, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// CAN interface to bind (for example `can0`, `vcan0`)
    pub interface: String,
    /// `.dbc` or JSON catalog; the built-in ICSim catalog when unset
    pub catalog_path: Option<PathBuf>,
    /// Widget configuration file; the built-in layout when unset
    pub widgets_path: Option<PathBuf>,
    /// Replay a candump log instead of opening the interface
    pub replay_path: Option<PathBuf>,
    /// Delay between replayed frames
    pub replay_interval_ms: u64,
    /// Socket read timeout; unset blocks until traffic arrives
    pub read_timeout_ms: Option<u64>,
    pub max_consecutive_read_errors: u32,
    /// Consumer refresh period
    pub poll_interval_ms: u64,
    /// How long shutdown waits for the listener thread
    pub join_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interface: "vcan0".to_string(),
            catalog_path: None,
            widgets_path: None,
            replay_path: None,
            replay_interval_ms: 10,
            read_timeout_ms: None,
            max_consecutive_read_errors: 16,
            poll_interval_ms: 16,
            join_timeout_ms: 1000,
        }
    }
}

impl AppConfig {
    /// `<config dir>/flex-ic/config.json`
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("flex-ic").join("config.json"))
    }

    /// Load from `path`, or from [`AppConfig::config_path`] when `None`
    ///
    /// A missing default file yields the defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) if path.exists() => path,
                _ => {
                    debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    pub fn load_catalog(&self) -> anyhow::Result<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::load(path),
            None => Catalog::parse_dbc(DEFAULT_CATALOG_DBC).context("Built-in catalog is invalid"),
        }
    }

    /// Widget configuration text
    pub fn widget_config(&self) -> anyhow::Result<String> {
        match &self.widgets_path {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read widget configuration: {:?}", path)),
            None => Ok(DEFAULT_WIDGET_CONFIG.to_string()),
        }
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            interface: self.interface.clone(),
            max_consecutive_read_errors: self.max_consecutive_read_errors.max(1),
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn replay_interval(&self) -> Duration {
        Duration::from_millis(self.replay_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::widget::{load_widgets, WidgetRegistry};

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"interface": "can1", "read_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.interface, "can1");
        assert_eq!(config.read_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.max_consecutive_read_errors, 16);
        assert_eq!(config.poll_interval(), Duration::from_millis(16));
        assert!(config.catalog_path.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("flex-ic-config-{}", std::process::id()));
        let path = dir.join("config.json");
        let config = AppConfig {
            interface: "can0".to_string(),
            join_timeout_ms: 50,
            ..AppConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(AppConfig::load(Some(&path)).unwrap(), config);

        fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
        let _ = fs::remove_dir_all(&dir);

        assert!(AppConfig::load(Some(&dir.join("missing.json"))).is_err());
    }

    #[test]
    fn test_builtin_configuration_loads() {
        let config = AppConfig::default();
        let catalog = config.load_catalog().unwrap();
        assert!(catalog.validate().is_empty(), "{:?}", catalog.validate());

        let text = config.widget_config().unwrap();
        let graph = load_widgets(&text, &catalog, &WidgetRegistry::with_stock_widgets()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.widgets()[1].label(), "Vehicle Speed");
        assert_eq!(graph.widgets()[1].line(), 2);
    }

    #[test]
    fn test_listener_config_never_zero_errors() {
        let config = AppConfig {
            max_consecutive_read_errors: 0,
            ..AppConfig::default()
        };
        assert_eq!(config.listener_config().max_consecutive_read_errors, 1);
    }
}

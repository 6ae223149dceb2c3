//! Configuration file support for linkflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (LINKFLASH_*)
//! 3. File given with `--config`
//! 4. Local config file (./linkflash.toml)
//! 5. Global config file (~/.config/linkflash/config.toml)

use directories::ProjectDirs;
use linkflash::LinkKind;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local config file name.
const LOCAL_CONFIG: &str = "linkflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Link type ("uart" or "usb").
    pub link: Option<LinkKind>,
}

/// Update session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Image bytes per block.
    pub block_size: Option<usize>,
    /// Transmissions allowed per failed block (0 = unlimited).
    pub max_retries: Option<u32>,
    /// Host address on a UART bus.
    pub host_address: Option<u8>,
    /// Device address on a UART bus.
    pub device_address: Option<u8>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Update configuration.
    #[serde(default)]
    pub update: UpdateSettings,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "linkflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    pub fn merge(&mut self, other: Self) {
        let Self { connection, update } = other;

        if connection.serial.is_some() {
            self.connection.serial = connection.serial;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }
        if connection.link.is_some() {
            self.connection.link = connection.link;
        }

        if update.block_size.is_some() {
            self.update.block_size = update.block_size;
        }
        if update.max_retries.is_some() {
            self.update.max_retries = update.max_retries;
        }
        if update.host_address.is_some() {
            self.update.host_address = update.host_address;
        }
        if update.device_address.is_some() {
            self.update.device_address = update.device_address;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.serial.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.connection.link.is_none());
        assert!(config.update.block_size.is_none());
        assert!(config.update.max_retries.is_none());
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.connection.baud = Some(115200);
        base.update.block_size = Some(96);

        let mut other = Config::default();
        other.connection.baud = Some(921600);
        other.connection.link = Some(LinkKind::Uart);

        base.merge(other);
        assert_eq!(base.connection.baud, Some(921600));
        assert_eq!(base.connection.link, Some(LinkKind::Uart));
        assert_eq!(base.update.block_size, Some(96));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.serial = Some("/dev/ttyACM0".to_string());
        base.update.max_retries = Some(3);

        base.merge(Config::default());

        assert_eq!(base.connection.serial.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.update.max_retries, Some(3));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
serial = "/dev/ttyUSB0"
baud = 921600
link = "uart"

[update]
block_size = 128
max_retries = 0
host_address = 1
device_address = 7
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(921600));
        assert_eq!(config.connection.link, Some(LinkKind::Uart));
        assert_eq!(config.update.block_size, Some(128));
        assert_eq!(config.update.max_retries, Some(0));
        assert_eq!(config.update.device_address, Some(7));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.serial.is_none());
        assert!(config.update.block_size.is_none());
    }

    #[test]
    fn test_config_rejects_unknown_link() {
        assert!(toml::from_str::<Config>("[connection]\nlink = \"spi\"\n").is_err());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let mut config = Config::default();
        config.connection.serial = Some("COM3".to_string());
        config.connection.link = Some(LinkKind::Usb);
        config.update.block_size = Some(64);

        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(deserialized.connection.serial.as_deref(), Some("COM3"));
        assert_eq!(deserialized.connection.link, Some(LinkKind::Usb));
        assert_eq!(deserialized.update.block_size, Some(64));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            r#"
[connection]
serial = "/dev/ttyUSB1"
[update]
block_size = 48
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.serial.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.update.block_size, Some(48));
    }

    #[test]
    fn test_load_from_path_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.serial.is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("linkflash"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}

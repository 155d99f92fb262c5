//! Configuration management for nova-bridge
//!
//! Handles loading, parsing, and validation of the YAML configuration file.
//! Every section is optional; a missing file yields the built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::device::{AutomapProtocol, DeviceDescriptor, DeviceModel};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceSelection,
    #[serde(default)]
    pub jack: JackConfig,
    #[serde(default)]
    pub usb: UsbConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default, skip_serializing_if = "ProtocolConfig::is_empty")]
    pub protocol: ProtocolConfig,
}

/// Which device to look for on the bus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    /// First match in the device table
    #[default]
    Auto,
    #[value(name = "ultranova")]
    UltraNova,
    #[value(name = "mininova")]
    MiniNova,
}

impl DeviceSelection {
    /// Restricts the candidates when probing the bus
    pub fn accepts(self, descriptor: &DeviceDescriptor) -> bool {
        match self {
            DeviceSelection::Auto => true,
            DeviceSelection::UltraNova => descriptor.model == DeviceModel::UltraNova,
            DeviceSelection::MiniNova => descriptor.model == DeviceModel::MiniNova,
        }
    }
}

/// JACK client configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct JackConfig {
    /// Overrides the per-device client name ("ultranova" / "mininova")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// USB transport configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UsbConfig {
    /// Interrupt read timeout; bounds how long shutdown waits for reader threads
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Let libusb detach the kernel audio driver from claimed interfaces
    #[serde(default = "default_true")]
    pub detach_kernel_driver: bool,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: default_read_timeout_ms(),
            detach_kernel_driver: true,
        }
    }
}

/// OSC mirror target (Ardour control surface)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MirrorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mirror_host")]
    pub host: String,
    #[serde(default = "default_mirror_port")]
    pub port: u16,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mirror_host(),
            port: default_mirror_port(),
        }
    }
}

impl MirrorConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Hex overrides for the automap protocol patterns
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProtocolConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_pressed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_octave_minus: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_octave_plus: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_octave_minus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_octave_plus: Option<String>,
}

impl ProtocolConfig {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path))?;

        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub async fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path).await
        } else {
            info!("No config file at {}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    #[cfg(test)]
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.usb.read_timeout_ms == 0 {
            anyhow::bail!("usb.read_timeout_ms must be greater than 0");
        }

        if let Some(name) = &self.jack.client_name {
            if name.trim().is_empty() {
                anyhow::bail!("jack.client_name cannot be empty");
            }
        }

        if self.mirror.enabled {
            if self.mirror.host.trim().is_empty() {
                anyhow::bail!("mirror.host cannot be empty when the mirror is enabled");
            }
            if self.mirror.port == 0 {
                anyhow::bail!("mirror.port must be non-zero");
            }
        }

        self.automap_protocol()?;

        Ok(())
    }

    /// Automap patterns with the configured overrides applied
    pub fn automap_protocol(&self) -> Result<AutomapProtocol> {
        AutomapProtocol::with_overrides(&self.protocol).context("Invalid protocol override")
    }

    /// JACK client name for a device
    pub fn client_name<'a>(&'a self, descriptor: &'a DeviceDescriptor) -> &'a str {
        self.jack
            .client_name
            .as_deref()
            .unwrap_or(descriptor.client_name)
    }
}

// Default value functions
fn default_true() -> bool { true }
fn default_read_timeout_ms() -> u64 { 100 }
fn default_mirror_host() -> String { "127.0.0.1".to_string() }
fn default_mirror_port() -> u16 { 3819 }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MININOVA, ULTRANOVA};
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.usb.read_timeout_ms, 100);
        assert!(config.usb.detach_kernel_driver);
        assert!(!config.mirror.enabled);
        assert_eq!(config.mirror.address(), "127.0.0.1:3819");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
device: mininova
mirror:
  enabled: true
  port: 9000
protocol:
  ack: "f0 00 20 29 01 f7"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.device, DeviceSelection::MiniNova);
        assert!(config.mirror.enabled);
        assert_eq!(config.mirror.host, "127.0.0.1");
        assert_eq!(config.mirror.port, 9000);
        assert_eq!(config.automap_protocol().unwrap().ack, vec![0xF0, 0x00, 0x20, 0x29, 0x01, 0xF7]);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        config.usb.read_timeout_ms = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_override() {
        let mut config = AppConfig::default();
        config.protocol.greeting = Some("not hex".into());

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_device_selection() {
        assert!(DeviceSelection::Auto.accepts(&ULTRANOVA));
        assert!(DeviceSelection::Auto.accepts(&MININOVA));
        assert!(DeviceSelection::UltraNova.accepts(&ULTRANOVA));
        assert!(!DeviceSelection::UltraNova.accepts(&MININOVA));
        assert!(DeviceSelection::MiniNova.accepts(&MININOVA));
    }

    #[test]
    fn test_client_name_override() {
        let mut config = AppConfig::default();
        assert_eq!(config.client_name(&ULTRANOVA), "ultranova");

        config.jack.client_name = Some("nova".into());
        assert_eq!(config.client_name(&MININOVA), "nova");
    }

    #[tokio::test]
    async fn test_load_and_save_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device: ultranova\nusb:\n  read_timeout_ms: 250").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.device, DeviceSelection::UltraNova);
        assert_eq!(config.usb.read_timeout_ms, 250);

        config.save(&path).await.unwrap();
        let reloaded = AppConfig::load(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        let config = AppConfig::load_or_default(path.to_str().unwrap()).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "usb: [not, a, map]").unwrap();

        let err = AppConfig::load(file.path().to_str().unwrap()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse YAML"));
    }
}

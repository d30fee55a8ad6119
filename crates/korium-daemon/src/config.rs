//! Configuration file management.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use korium_types::{Contact, NodeId};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Network settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Identity settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 0 = OS-assigned ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Bootstrap seed nodes.
    #[serde(default)]
    pub bootstrap_nodes: Vec<SeedNode>,
}

/// A seed node endpoint for bootstrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedNode {
    /// The seed node's network address, `host:port`.
    pub addr: String,
    /// The seed node's id, hex-encoded.
    pub node_id: String,
}

impl SeedNode {
    /// Resolve this entry into a DHT contact.
    pub fn to_contact(&self) -> anyhow::Result<Contact> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| anyhow::anyhow!("bad seed address {}: {e}", self.addr))?;
        let node_id = NodeId::from_hex(&self.node_id)
            .map_err(|e| anyhow::anyhow!("bad seed id {}: {e}", self.node_id))?;
        Ok(Contact::new(node_id, addr))
    }
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Identity key file. Empty = `$data_dir/identity.key`.
    #[serde(default)]
    pub key_file: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            bootstrap_nodes: Vec::new(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: String::new(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::default_data_dir()
    }

    /// The identity key file path.
    pub fn key_file(&self) -> PathBuf {
        if self.identity.key_file.is_empty() {
            self.data_dir().join("identity.key")
        } else {
            PathBuf::from(&self.identity.key_file)
        }
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform default data directory, overridable via `KORIUM_DATA_DIR`.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("KORIUM_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".korium"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/korium"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.listen_port, 0);
        assert!(config.network.bootstrap_nodes.is_empty());
        assert_eq!(config.advanced.log_level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
    }

    #[test]
    fn test_seed_node_parsing() {
        let seed = SeedNode {
            addr: "127.0.0.1:4433".to_string(),
            node_id: hex::encode([7u8; 64]),
        };
        let contact = seed.to_contact().expect("contact");
        assert_eq!(contact.endpoint.port(), 4433);

        let bad = SeedNode {
            addr: "not-an-address".to_string(),
            node_id: hex::encode([7u8; 64]),
        };
        assert!(bad.to_contact().is_err());

        let bad_id = SeedNode {
            addr: "127.0.0.1:4433".to_string(),
            node_id: "zz".to_string(),
        };
        assert!(bad_id.to_contact().is_err());
    }
}

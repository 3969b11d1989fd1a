//! Init command implementation.

use std::path::Path;

use anyhow::{Result, bail};
use tracing::info;

use sensorlink_types::Role;

use super::write_output;
use crate::config::{AttributeLinkConfig, Config, SessionConfig};

/// Write a starter configuration with one link of each kind.
pub fn cmd_init(path: Option<&Path>, force: bool) -> Result<()> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::path);
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    starter_config().save(&path)?;
    info!(path = %path.display(), "Configuration written");
    write_output(&format!("{}\n", path.display()))
}

fn starter_config() -> Config {
    Config {
        sessions: vec![SessionConfig {
            name: "glove".to_string(),
            role: Role::Client,
            remote_name: "DataGlove".to_string(),
            remote_address: None,
            frame_size: 16,
            channel: None,
            reconnect: None,
        }],
        attribute_links: vec![AttributeLinkConfig {
            name: "thermometer".to_string(),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            attributes: vec!["temperature".to_string(), "battery-level".to_string()],
            teardown_timeout_ms: 2000,
            auto_reconnect: true,
            reconnect: None,
        }],
        ..Config::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_types::DescriptorRegistry;

    #[test]
    fn test_starter_config_is_valid() {
        let config = starter_config();
        assert!(config.validate(&DescriptorRegistry::standard()).is_ok());
        assert!(!config.is_empty());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        cmd_init(Some(&path), false).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), starter_config());

        assert!(cmd_init(Some(&path), false).is_err());
        assert!(cmd_init(Some(&path), true).is_ok());
    }
}

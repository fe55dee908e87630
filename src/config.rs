//! Static device configuration (external collaborator, consumed only).
//!
//! Mirrors the pack's TOML-plus-serde configuration convention (as in
//! `easternanemone-rust-daq`'s config loading), generalized to this crate's
//! two configuration facts: statically-configured devices, and whether the
//! model name should be taken from the network name.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::protocol::ProtoId;

#[derive(Debug, Clone, Deserialize)]
pub struct StaticDevice {
    pub name: String,
    pub uri: String,
    pub proto: ProtoId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<StaticDevice>,
    #[serde(default)]
    pub model_is_netname: bool,
}

impl Config {
    pub fn load_str(text: &str) -> Result<Config> {
        toml::from_str(text).context("failed to parse configuration")
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Config> {
        let text = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
        Self::load_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_static_devices() {
        let cfg = Config::load_str(
            r#"
            model_is_netname = true

            [[devices]]
            name = "kitchen"
            uri = "http://192.168.1.50:80/eSCL"
            proto = "escl"
            "#,
        )
        .unwrap();
        assert!(cfg.model_is_netname);
        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.devices[0].name, "kitchen");
        assert_eq!(cfg.devices[0].proto, ProtoId::Escl);
    }

    #[test]
    fn defaults_to_empty() {
        let cfg = Config::load_str("").unwrap();
        assert!(cfg.devices.is_empty());
        assert!(!cfg.model_is_netname);
    }

    #[test]
    fn load_file_reads_from_disk() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [[devices]]
            name = "office"
            uri = "http://192.168.1.51/eSCL"
            proto = "escl"
            "#
        )
        .unwrap();
        let cfg = Config::load_file(file.path()).unwrap();
        assert_eq!(cfg.devices[0].name, "office");
    }
}

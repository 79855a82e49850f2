//! Node configuration: defaults, an optional JSON file, then environment.

use std::net::SocketAddr;
use std::path::Path;

use meshlight_onoff::PayloadLayout;
use meshlight_transfer::{UdpConfig, DEFAULT_PORT};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provisioning::Credentials;

/// Configuration for a Meshlight node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// UDP address to bind
    pub bind: SocketAddr,
    /// Where frames are sent (broadcast address or explicit peers)
    pub peers: Vec<SocketAddr>,
    /// Hardware id as hex; the address is derived from it. When unset the
    /// node generates one at startup.
    pub device_id: Option<String>,
    /// Wire layout spoken by this node
    pub layout: PayloadLayout,
    /// Network key as 32 hex digits, built-in default when absent
    pub net_key: Option<String>,
    /// Application key as 32 hex digits, built-in default when absent
    pub app_key: Option<String>,
    /// Provision on the first local trigger instead of at startup
    pub auto_provision: bool,
    /// Value the server starts with
    pub initial_value: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            peers: vec![SocketAddr::from(([255, 255, 255, 255], DEFAULT_PORT))],
            device_id: None,
            layout: PayloadLayout::default(),
            net_key: None,
            app_key: None,
            auto_provision: true,
            initial_value: false,
        }
    }
}

impl NodeConfig {
    /// Load from `MESHLIGHT_CONFIG` (if set) and apply `MESHLIGHT_*` overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("MESHLIGHT_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Override fields from `lookup` (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("MESHLIGHT_BIND") {
            self.bind = parse_addr("MESHLIGHT_BIND", &bind)?;
        }

        if let Some(peers) = lookup("MESHLIGHT_PEER") {
            self.peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| parse_addr("MESHLIGHT_PEER", p))
                .collect::<Result<_>>()?;
        }

        if let Some(id) = lookup("MESHLIGHT_DEVICE_ID") {
            self.device_id = Some(id);
        }

        if let Some(layout) = lookup("MESHLIGHT_LAYOUT") {
            self.layout = layout
                .parse()
                .map_err(|e| Error::Config(format!("MESHLIGHT_LAYOUT: {}", e)))?;
        }

        if let Some(key) = lookup("MESHLIGHT_NET_KEY") {
            self.net_key = Some(key);
        }

        if let Some(key) = lookup("MESHLIGHT_APP_KEY") {
            self.app_key = Some(key);
        }

        if let Some(flag) = lookup("MESHLIGHT_AUTO_PROVISION") {
            self.auto_provision = parse_bool("MESHLIGHT_AUTO_PROVISION", &flag)?;
        }

        Ok(())
    }

    /// Decoded device id, empty when unset. The node substitutes
    /// [`generated_device_id`](crate::provisioning::generated_device_id)
    /// for an empty id.
    pub fn device_id_bytes(&self) -> Result<Vec<u8>> {
        match &self.device_id {
            Some(id) => hex::decode(id.trim())
                .map_err(|e| Error::Config(format!("device_id {:?}: {}", id, e))),
            None => Ok(Vec::new()),
        }
    }

    /// Credentials with configured keys over the built-in defaults.
    pub fn credentials(&self) -> Result<Credentials> {
        let mut creds = Credentials::default();
        if let Some(key) = &self.net_key {
            creds.net_key = parse_key("net_key", key)?;
        }
        if let Some(key) = &self.app_key {
            creds.app_key = parse_key("app_key", key)?;
        }
        Ok(creds)
    }

    /// UDP transport settings.
    pub fn udp(&self) -> UdpConfig {
        UdpConfig {
            bind: self.bind,
            peers: self.peers.clone(),
            ..Default::default()
        }
    }
}

fn parse_addr(name: &str, value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{} {:?}: {}", name, value, e)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{}: not a boolean: {:?}", name, other))),
    }
}

fn parse_key(name: &str, value: &str) -> Result<[u8; 16]> {
    let mut key = [0u8; 16];
    hex::decode_to_slice(value.trim(), &mut key)
        .map_err(|e| Error::Config(format!("{}: {}", name, e)))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.bind.port(), DEFAULT_PORT);
        assert_eq!(config.layout, PayloadLayout::EmbeddedSource);
        assert!(config.auto_provision);
        assert_eq!(config.credentials().unwrap(), Credentials::default());
        assert!(config.device_id_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = NodeConfig::default();
        config
            .apply_overrides(env(&[
                ("MESHLIGHT_BIND", "127.0.0.1:7400"),
                ("MESHLIGHT_PEER", "127.0.0.1:7401, 127.0.0.1:7402"),
                ("MESHLIGHT_DEVICE_ID", "3412"),
                ("MESHLIGHT_LAYOUT", "transaction-only"),
                ("MESHLIGHT_AUTO_PROVISION", "off"),
                ("MESHLIGHT_NET_KEY", "000102030405060708090a0b0c0d0e0f"),
            ]))
            .unwrap();

        assert_eq!(config.bind, "127.0.0.1:7400".parse().unwrap());
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.device_id_bytes().unwrap(), vec![0x34, 0x12]);
        assert_eq!(config.layout, PayloadLayout::TransactionOnly);
        assert!(!config.auto_provision);

        let creds = config.credentials().unwrap();
        assert_eq!(creds.net_key[15], 0x0f);
        assert_eq!(creds.app_key, Credentials::default().app_key);
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let mut config = NodeConfig::default();
        let err = config
            .apply_overrides(env(&[("MESHLIGHT_BIND", "nowhere")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = config
            .apply_overrides(env(&[("MESHLIGHT_AUTO_PROVISION", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        config.net_key = Some("abcd".into());
        assert!(matches!(config.credentials(), Err(Error::Config(_))));

        config.device_id = Some("zz".into());
        assert!(matches!(config.device_id_bytes(), Err(Error::Config(_))));
    }

    #[test]
    fn test_json_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "device_id": "0500", "layout": "transaction_only", "initial_value": true }}"#
        )
        .unwrap();

        let config = NodeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.device_id.as_deref(), Some("0500"));
        assert_eq!(config.layout, PayloadLayout::TransactionOnly);
        assert!(config.initial_value);
        assert!(config.auto_provision);
    }
}

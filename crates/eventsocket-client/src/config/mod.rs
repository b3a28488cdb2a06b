//! Client config loading.
//!
//! YAML is parsed strictly (unknown keys are errors) and validated before a
//! `ClientConfig` is handed out. Hosts that build the config in code call
//! [`ClientConfig::validate`] through `Client::connect` instead.

pub mod schema;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use eventsocket_core::error::{EventSocketError, Result};

pub use schema::{ClientConfig, DeliverySection, TransportSection};

/// Load from a YAML file. Relative paths resolve against the process working
/// directory; errors name the path as given.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<ClientConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| {
        EventSocketError::Config(format!("read config {} failed: {e}", path.display()))
    })?;
    load_from_str(&s).map_err(|e| match e {
        EventSocketError::Config(msg) => {
            EventSocketError::Config(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}

pub fn load_from_str(s: &str) -> Result<ClientConfig> {
    let cfg: ClientConfig = serde_yaml::from_str(s)
        .map_err(|e| EventSocketError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

impl FromStr for ClientConfig {
    type Err = EventSocketError;

    fn from_str(s: &str) -> Result<Self> {
        load_from_str(s)
    }
}

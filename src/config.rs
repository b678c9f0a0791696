// rust-xmpp
// Copyright (c) 2015 Florian Zeitz
//
// This project is MIT licensed.
// Please see the COPYING file for more information.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jid::{Jid, JidError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read account configuration: {0}")]
    Io(#[from] io::Error),
    #[error("invalid account configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("could not serialize account configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid account JID: {0}")]
    Jid(#[from] JidError),
}

fn default_true() -> bool {
    true
}

fn default_step_budget() -> u64 {
    2000
}

/// Per-account settings the authentication engine consumes.
///
/// ```toml
/// jid = "juliet@capulet.example/balcony"
/// password = "secret"
/// use_tls = true
/// auth_plain_in_clear = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccountConfig {
    pub jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Upgrade to TLS before authenticating whenever the server offers it.
    #[serde(default = "default_true")]
    pub use_tls: bool,
    /// Refuse to authenticate over an unencrypted stream.
    #[serde(default)]
    pub require_tls: bool,
    /// Remembered answer of the plaintext consent prompt.
    #[serde(default)]
    pub auth_plain_in_clear: bool,
    #[serde(default = "default_step_budget")]
    pub external_step_budget_ms: u64,
}

impl AccountConfig {
    pub fn new(jid: &str, password: Option<&str>) -> AccountConfig {
        AccountConfig {
            jid: jid.to_string(),
            password: password.map(|p| p.to_string()),
            resource: None,
            use_tls: true,
            require_tls: false,
            auth_plain_in_clear: false,
            external_step_budget_ms: default_step_budget(),
        }
    }

    pub fn from_toml_str(s: &str) -> Result<AccountConfig, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<AccountConfig, ConfigError> {
        let data = fs::read_to_string(path)?;
        AccountConfig::from_toml_str(&data)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// The account identity. An explicit `resource` setting overrides
    /// one given in the JID.
    pub fn identity(&self) -> Result<Jid, ConfigError> {
        let jid: Jid = self.jid.parse()?;
        Ok(match self.resource {
            Some(ref resource) => jid.with_resource(resource)?,
            None => jid,
        })
    }

    pub fn external_step_budget(&self) -> Duration {
        Duration::from_millis(self.external_step_budget_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = AccountConfig::from_toml_str("jid = \"juliet@capulet.example\"").unwrap();
        assert_eq!(config, AccountConfig::new("juliet@capulet.example", None));
        assert!(config.use_tls);
        assert!(!config.auth_plain_in_clear);
        assert_eq!(config.external_step_budget(), Duration::from_secs(2));
    }

    #[test]
    fn remembered_consent_survives_a_round_trip() {
        let mut config = AccountConfig::new("juliet@capulet.example", Some("secret"));
        config.auth_plain_in_clear = true;
        let reloaded = AccountConfig::from_toml_str(&config.to_toml_string().unwrap()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn resource_override() {
        let mut config = AccountConfig::new("juliet@capulet.example/balcony", None);
        assert_eq!(config.identity().unwrap().resource(), Some("balcony"));
        config.resource = Some("garden".into());
        assert_eq!(config.identity().unwrap().resource(), Some("garden"));
    }

    #[test]
    fn bad_jid() {
        let config = AccountConfig::new("@nowhere", None);
        assert!(matches!(config.identity(), Err(ConfigError::Jid(_))));
    }
}

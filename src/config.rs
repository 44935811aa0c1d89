//! Deadline settings loaded from TOML.
//!
//! ```toml
//! [timeouts]
//! http = 10.0
//! https = 5.0
//! # ftp left out: FTP keeps the standard handler
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::conn::Protocol;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::registry::Registry;

/// Root of a configuration document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub timeouts: TimeoutConfig,
}

/// Per-protocol deadlines in seconds; a missing entry means no deadline.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    pub http: Option<f64>,
    pub https: Option<f64>,
    pub ftp: Option<f64>,
}

impl TimeoutConfig {
    /// Parse the `[timeouts]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.timeouts.validate()?;
        Ok(settings.timeouts)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| Error::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn seconds(&self, protocol: Protocol) -> Option<f64> {
        match protocol {
            Protocol::Http => self.http,
            Protocol::Https => self.https,
            Protocol::Ftp => self.ftp,
        }
    }

    /// Configured deadlines, in [`Protocol::ALL`] order.
    pub fn deadlines(&self) -> Result<Vec<(Protocol, Deadline)>> {
        Protocol::ALL
            .into_iter()
            .filter_map(|p| self.seconds(p).map(|secs| (p, secs)))
            .map(|(p, secs)| Deadline::from_secs_f64(secs).map(|d| (p, d)))
            .collect()
    }

    /// Reset `registry`, then install a timeout handler for each configured
    /// protocol.
    ///
    /// Deadlines are validated before the registry is touched.
    pub fn apply(&self, registry: &Registry) -> Result<()> {
        let deadlines = self.deadlines()?;
        registry.reset();
        for (protocol, deadline) in deadlines {
            registry.install(protocol, deadline)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.deadlines().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeouts_table() {
        let config = TimeoutConfig::from_toml_str(
            r#"
            [timeouts]
            http = 10
            https = 2.5
            "#,
        )
        .unwrap();
        assert_eq!(config.http, Some(10.0));
        assert_eq!(config.https, Some(2.5));
        assert_eq!(config.ftp, None);
    }

    #[test]
    fn test_empty_document() {
        let config = TimeoutConfig::from_toml_str("").unwrap();
        assert_eq!(config, TimeoutConfig::default());
        assert!(config.deadlines().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            TimeoutConfig::from_toml_str("[timeouts]\nhttp = -1.0\n"),
            Err(Error::InvalidDeadline(_))
        ));
        assert!(matches!(
            TimeoutConfig::from_toml_str("[timeouts]\ngopher = 1.0\n"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_apply_replaces_previous_install() {
        let registry = Registry::new();
        registry
            .install_ftp_timeout(Deadline::from_secs_f64(30.0).unwrap())
            .unwrap();

        let config = TimeoutConfig {
            http: Some(4.0),
            ..Default::default()
        };
        config.apply(&registry).unwrap();

        assert!(registry.handler(Protocol::Http).is_timeout());
        assert!(!registry.handler(Protocol::Ftp).is_timeout());
        assert_eq!(
            registry.default_deadline(Protocol::Http),
            Deadline::from_secs_f64(4.0).unwrap()
        );
    }

    #[test]
    fn test_missing_file() {
        let err = TimeoutConfig::from_file(Path::new("/nonexistent/timeouts.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigFile { .. }));
    }
}

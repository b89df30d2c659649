//! Structured logging configuration.

use crate::config::{LogFormat, LoggingSettings};
use crate::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Filter variable checked before `RUST_LOG`.
pub const LOG_ENV: &str = "TALLY_LOG";

/// Resolved logging configuration.
#[derive(Debug)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Event filter.
    pub filter: EnvFilter,
    /// Append to this file instead of stderr.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// Filter precedence: `verbose` (forces `debug`), `TALLY_LOG`,
    /// `RUST_LOG`, then the configured filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the chosen directive is invalid.
    pub fn from_settings(settings: &LoggingSettings, verbose: bool) -> Result<Self> {
        Self::from_settings_with_env(settings, verbose, |key| std::env::var(key).ok())
    }

    pub(crate) fn from_settings_with_env(
        settings: &LoggingSettings,
        verbose: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let directive = if verbose {
            "debug".to_string()
        } else {
            env(LOG_ENV)
                .or_else(|| env("RUST_LOG"))
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| settings.filter.clone())
        };

        let filter = EnvFilter::try_new(&directive).map_err(|e| {
            Error::Configuration(format!("invalid log filter '{directive}': {e}"))
        })?;

        Ok(Self {
            format: settings.format,
            filter,
            file: settings.file.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(filter: &str) -> LoggingSettings {
        LoggingSettings {
            filter: filter.to_string(),
            ..LoggingSettings::default()
        }
    }

    #[test]
    fn test_verbose_wins() {
        let config =
            LoggingConfig::from_settings_with_env(&settings("warn"), true, |_| {
                Some("error".to_string())
            })
            .unwrap();
        assert_eq!(config.filter.to_string(), "debug");
    }

    #[test]
    fn test_tally_log_before_rust_log() {
        let config = LoggingConfig::from_settings_with_env(&settings("warn"), false, |key| {
            match key {
                LOG_ENV => Some("tally=trace".to_string()),
                "RUST_LOG" => Some("error".to_string()),
                _ => None,
            }
        })
        .unwrap();
        assert_eq!(config.filter.to_string(), "tally=trace");
    }

    #[test]
    fn test_configured_filter_is_fallback() {
        let config =
            LoggingConfig::from_settings_with_env(&settings("warn"), false, |_| None).unwrap();
        assert_eq!(config.filter.to_string(), "warn");
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_invalid_directive_rejected() {
        let err = LoggingConfig::from_settings_with_env(&settings("tally=notalevel"), false, |_| {
            None
        })
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}

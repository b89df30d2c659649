//! Config CLI command.

use crate::TallyConfig;
use std::io::Write;

/// Prints where the configuration came from, and with `show` the
/// effective configuration as TOML. Secrets are redacted.
///
/// # Errors
///
/// Returns an error if the configuration cannot be rendered.
pub fn cmd_config(config: &TallyConfig, show: bool, out: &mut dyn Write) -> anyhow::Result<()> {
    match &config.source {
        Some(path) => writeln!(out, "# source: {}", path.display())?,
        None => writeln!(out, "# source: built-in defaults")?,
    }
    if show {
        writeln!(out, "{}", toml::to_string_pretty(config)?)?;
    } else {
        writeln!(out, "# storage: {}", config.storage.kind())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let mut out = Vec::new();
        cmd_config(&TallyConfig::default(), false, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("built-in defaults"));
        assert!(text.contains("# storage: memory"));
    }

    #[test]
    fn test_show_renders_sections() {
        let mut out = Vec::new();
        cmd_config(&TallyConfig::default(), true, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("[storage]"));
        assert!(text.contains("[bench]"));
        assert!(text.contains("transactions_per_worker = 10000"));
    }
}

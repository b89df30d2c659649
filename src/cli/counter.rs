//! Plain counter commands.

use super::OutputFormat;
use crate::TallyConfig;
use crate::bench::run_stress;
use crate::storage::BackendFactory;
use anyhow::Context;
use std::io::Write;

/// Increments the configured counter `times` times and prints the value.
///
/// # Errors
///
/// Returns an error if the backend cannot be built or an increment fails.
pub fn cmd_inc(config: &TallyConfig, times: u64, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = BackendFactory::create(&config.storage)
        .with_context(|| format!("opening {} backend", config.storage.kind()))?;
    for i in 0..times {
        store
            .increment()
            .with_context(|| format!("increment {} of {times}", i + 1))?;
    }
    let value = store.read().context("reading counter")?;
    store.close()?;
    writeln!(out, "{value}")?;
    Ok(())
}

/// Prints the current value.
///
/// # Errors
///
/// Returns an error if the backend cannot be built or the read fails.
pub fn cmd_get(config: &TallyConfig, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = BackendFactory::create(&config.storage)
        .with_context(|| format!("opening {} backend", config.storage.kind()))?;
    let value = store.read().context("reading counter")?;
    store.close()?;
    writeln!(out, "{value}")?;
    Ok(())
}

/// Resets counter and version on a transactional backend.
///
/// # Errors
///
/// Returns an error for non-transactional backends or if the reset fails.
pub fn cmd_reset(config: &TallyConfig, out: &mut dyn Write) -> anyhow::Result<()> {
    let store = BackendFactory::create_transactional(&config.storage)?;
    store.reset().context("resetting counter")?;
    store.close()?;
    writeln!(out, "counter reset to 0")?;
    Ok(())
}

/// Runs an in-process stress test and prints the report.
///
/// # Errors
///
/// Returns an error if the backend cannot be built, the checker reads
/// fail, or any increment failed.
pub fn cmd_stress(
    config: &TallyConfig,
    workers: usize,
    increments: usize,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let store = BackendFactory::create(&config.storage)
        .with_context(|| format!("opening {} backend", config.storage.kind()))?;
    let report = run_stress(store.as_ref(), workers, increments)?;
    store.close()?;

    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?,
        OutputFormat::Text => writeln!(out, "{report}")?,
    }

    if report.errors > 0 {
        anyhow::bail!("{} of {workers} stress workers failed", report.errors);
    }
    Ok(())
}

//! HTTP server and load client commands.

use crate::TallyConfig;
use crate::http::{LoadConfig, run_load, serve};
use crate::storage::BackendFactory;
use anyhow::Context;
use std::io::Write;
use std::sync::Arc;

/// Serves the configured counter over HTTP until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the backend cannot be built, the server cannot
/// bind, or the `http` feature is missing.
pub fn cmd_serve(config: &TallyConfig, host: &str, port: u16) -> anyhow::Result<()> {
    let store = BackendFactory::create(&config.storage)
        .with_context(|| format!("opening {} backend", config.storage.kind()))?;
    serve(Arc::from(store), host, port).with_context(|| format!("serving on {host}:{port}"))?;
    Ok(())
}

/// Runs the HTTP load client and prints one line per round.
///
/// # Errors
///
/// Returns an error if the server cannot be read, or if any round lost
/// increments or saw failed requests.
pub fn cmd_load(load: &LoadConfig, out: &mut dyn Write) -> anyhow::Result<()> {
    writeln!(
        out,
        "Load test against {} ({} requests per client)",
        load.url, load.requests_per_client
    )?;
    let rounds = run_load(load).with_context(|| format!("load testing {}", load.url))?;
    for round in &rounds {
        writeln!(out, "{round}")?;
    }

    let mismatched = rounds
        .iter()
        .filter(|r| !r.check.matches() || r.errors > 0)
        .count();
    if mismatched > 0 {
        anyhow::bail!("{mismatched} of {} rounds did not add up", rounds.len());
    }
    Ok(())
}

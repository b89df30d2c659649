//! Benchmark command.

use super::OutputFormat;
use crate::bench::{BenchConfig, BenchReport, Harness, RunStatus, Strategy};
use crate::storage::BackendFactory;
use crate::{Error, TallyConfig};
use anyhow::Context;
use std::io::Write;
use std::str::FromStr;

/// Which strategies to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategySelection {
    /// Every strategy, in report order.
    All,
    /// A single strategy.
    One(Strategy),
}

impl StrategySelection {
    /// The strategies selected.
    #[must_use]
    pub fn strategies(self) -> Vec<Strategy> {
        match self {
            Self::All => Strategy::ALL.to_vec(),
            Self::One(strategy) => vec![strategy],
        }
    }
}

impl FromStr for StrategySelection {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse().map(Self::One)
    }
}

/// Runs the benchmark for the selected strategies.
///
/// Each strategy starts from a reset counter. Text output puts a heading
/// above each report; JSON output is one array.
///
/// # Errors
///
/// Returns an error if the backend is not transactional or cannot be
/// built, a run fails outright, or any run was aborted.
pub fn cmd_bench(
    config: &TallyConfig,
    selection: StrategySelection,
    run: BenchConfig,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let store = BackendFactory::create_transactional(&config.storage)
        .with_context(|| format!("opening {} backend for benchmarking", config.storage.kind()))?;
    let harness = Harness::new(store.as_ref());

    let mut reports: Vec<BenchReport> = Vec::new();
    for strategy in selection.strategies() {
        let report = harness
            .run(&run.with_strategy(strategy))
            .with_context(|| format!("running strategy '{strategy}'"))?;
        if format == OutputFormat::Text {
            writeln!(out, "=== {} ===", strategy.title())?;
            writeln!(out, "{report}")?;
            writeln!(out)?;
        }
        let aborted = report.status == RunStatus::Aborted;
        reports.push(report);
        if aborted {
            break;
        }
    }
    store.close()?;

    if format == OutputFormat::Json {
        writeln!(out, "{}", serde_json::to_string_pretty(&reports)?)?;
    }

    if let Some(aborted) = reports.iter().find(|r| r.status == RunStatus::Aborted) {
        anyhow::bail!(
            "benchmark aborted during '{}': {}",
            aborted.strategy,
            aborted.abort_cause.as_deref().unwrap_or("unknown cause")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BackendConfig;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_selection_parse() {
        assert_eq!("ALL".parse::<StrategySelection>().unwrap(), StrategySelection::All);
        assert_eq!(
            "row-lock".parse::<StrategySelection>().unwrap(),
            StrategySelection::One(Strategy::RowLock)
        );
        assert!("nope".parse::<StrategySelection>().is_err());
        assert_eq!(StrategySelection::All.strategies().len(), 6);
    }

    #[test]
    fn test_bench_rejects_memory_backend() {
        let run = BenchConfig::new(Strategy::InPlace, 2, 2).unwrap();
        let err = cmd_bench(
            &TallyConfig::default(),
            StrategySelection::All,
            run,
            OutputFormat::Text,
            &mut Vec::new(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("does not support transactions"));
    }

    #[test]
    fn test_bench_rejects_zero_max_attempts() {
        let dir = TempDir::new().unwrap();
        let config = TallyConfig {
            storage: BackendConfig::Sqlite {
                path: dir.path().join("bench.db"),
                table: "user_counter".to_string(),
                operation_timeout: Duration::from_secs(10),
            },
            ..TallyConfig::default()
        };
        let run = BenchConfig::new(Strategy::SerializableRetry, 2, 2)
            .unwrap()
            .with_retry(crate::bench::RetryPolicy {
                backoff: Duration::ZERO,
                max_attempts: 0,
            });

        let mut out = Vec::new();
        let err = cmd_bench(
            &config,
            StrategySelection::One(Strategy::SerializableRetry),
            run,
            OutputFormat::Text,
            &mut out,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("max attempts"), "{err:#}");
        assert!(out.is_empty());
    }

    #[test]
    fn test_bench_text_output_on_sqlite() {
        let dir = TempDir::new().unwrap();
        let config = TallyConfig {
            storage: BackendConfig::Sqlite {
                path: dir.path().join("bench.db"),
                table: "user_counter".to_string(),
                operation_timeout: Duration::from_secs(10),
            },
            ..TallyConfig::default()
        };
        let run = BenchConfig::new(Strategy::InPlace, 2, 20).unwrap();

        let mut out = Vec::new();
        cmd_bench(
            &config,
            StrategySelection::One(Strategy::InPlace),
            run,
            OutputFormat::Text,
            &mut out,
        )
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("=== In-place update ==="));
        assert!(text.contains("Expected delta:  40"));
        assert!(text.contains("Status:          complete"));
    }
}

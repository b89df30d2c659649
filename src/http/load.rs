//! HTTP load client.
//!
//! For each concurrency level it reads `/count`, has that many threads
//! each call `/inc` a fixed number of times, reads `/count` again and
//! compares.

use crate::bench::ConsistencyCheck;
use crate::config::ClientSettings;
use crate::{Error, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Load run parameters.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Server base URL.
    pub url: String,
    /// Concurrency levels, one round each.
    pub clients: Vec<usize>,
    /// `/inc` calls per client per round.
    pub requests_per_client: usize,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl LoadConfig {
    /// Builds a load configuration from the `[client]` section.
    #[must_use]
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            url: settings.url.clone(),
            clients: settings.clients.clone(),
            requests_per_client: settings.requests_per_client,
            timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }
}

/// One concurrency level's outcome.
#[derive(Debug, Clone)]
pub struct LoadRound {
    /// Concurrent clients.
    pub clients: usize,
    /// Requests each client sent.
    pub requests_per_client: usize,
    /// Wall-clock time of the round.
    pub duration: Duration,
    /// Expected versus observed counter movement.
    pub check: ConsistencyCheck,
    /// Requests that failed.
    pub errors: u64,
}

impl LoadRound {
    /// Successful-or-not requests per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.check.expected_delta as f64 / secs
    }
}

impl fmt::Display for LoadRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clients={:<3} time={:.2}s throughput={:.1} req/s expected={} actual={} errors={}",
            self.clients,
            self.duration.as_secs_f64(),
            self.throughput(),
            self.check.expected_delta,
            self.check.observed_delta,
            self.errors
        )
    }
}

#[derive(Deserialize)]
struct CountBody {
    count: u64,
}

/// Blocking client for the counter server.
///
/// Must not be used from inside an async runtime.
#[derive(Debug, Clone)]
pub struct LoadClient {
    http: Client,
    base: String,
}

impl LoadClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Reads the server's counter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the request fails or the
    /// server answers with an error status, and [`Error::StorageCorrupt`]
    /// if the body is not `{"count": n}`.
    pub fn count(&self) -> Result<u64> {
        let url = format!("{}/count", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| Error::unavailable("http_count", e))?;
        let body: CountBody = response
            .json()
            .map_err(|e| Error::corrupt(url, e))?;
        Ok(body.count)
    }

    /// Sends one increment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageUnavailable`] if the request fails or the
    /// server answers with an error status.
    pub fn increment(&self) -> Result<()> {
        self.http
            .get(format!("{}/inc", self.base))
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map(|_| ())
            .map_err(|e| Error::unavailable("http_increment", e))
    }

    /// Runs one round with `clients` concurrent threads.
    ///
    /// Failed increments are counted, not retried.
    ///
    /// # Errors
    ///
    /// Returns an error if either `/count` read fails.
    pub fn run_round(&self, clients: usize, requests_per_client: usize) -> Result<LoadRound> {
        let before = self.count()?;
        let errors = AtomicU64::new(0);

        let start = Instant::now();
        thread::scope(|scope| {
            for _ in 0..clients {
                let errors = &errors;
                scope.spawn(move || {
                    for _ in 0..requests_per_client {
                        if let Err(e) = self.increment() {
                            tracing::debug!(error = %e, "Increment request failed");
                            errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        let duration = start.elapsed();

        let after = self.count()?;
        let expected = (clients as u64).saturating_mul(requests_per_client as u64);
        Ok(LoadRound {
            clients,
            requests_per_client,
            duration,
            check: ConsistencyCheck::new(before, after, expected),
            errors: errors.into_inner(),
        })
    }
}

/// Runs every configured round in order.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for an empty or zero concurrency list,
/// otherwise the first round's error.
pub fn run_load(config: &LoadConfig) -> Result<Vec<LoadRound>> {
    if config.clients.is_empty() || config.clients.contains(&0) {
        return Err(Error::InvalidInput(
            "client counts must be a non-empty list of positive numbers".to_string(),
        ));
    }
    let client = LoadClient::new(&config.url, config.timeout)?;
    config
        .clients
        .iter()
        .map(|&clients| {
            let round = client.run_round(clients, config.requests_per_client)?;
            tracing::info!(
                clients,
                expected = round.check.expected_delta,
                actual = round.check.observed_delta,
                errors = round.errors,
                "Load round finished"
            );
            Ok(round)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let config = LoadConfig::from_settings(&ClientSettings::default());
        assert_eq!(config.clients, vec![1, 2, 5, 10]);
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_empty_client_list_rejected() {
        let config = LoadConfig {
            clients: Vec::new(),
            ..LoadConfig::from_settings(&ClientSettings::default())
        };
        assert!(matches!(run_load(&config), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_unreachable_server_is_unavailable() {
        let client = LoadClient::new("http://127.0.0.1:9/", Duration::from_millis(200)).unwrap();
        assert!(client.count().unwrap_err().is_unavailable());
    }

    #[test]
    fn test_round_display() {
        let round = LoadRound {
            clients: 2,
            requests_per_client: 5,
            duration: Duration::from_secs(2),
            check: ConsistencyCheck::new(10, 20, 10),
            errors: 0,
        };
        let line = round.to_string();
        assert!(line.contains("throughput=5.0 req/s"));
        assert!(line.contains("expected=10 actual=10"));
    }
}

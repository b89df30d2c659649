//! HTTP counter surface and load client.
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /inc` | `{"status": "ok"}` after one increment |
//! | `GET /count` | `{"count": n}` |
//!
//! Storage errors map to `503` when the store is unavailable and `500`
//! otherwise, with body `{"error": "..."}`.
//!
//! The server needs the `http` feature; the [`load`] client is always
//! built.

pub mod load;

#[cfg(feature = "http")]
mod server;

#[cfg(feature = "http")]
pub use server::{router, serve};

pub use load::{LoadClient, LoadConfig, LoadRound, run_load};

/// Serves the counter over HTTP (feature not enabled).
///
/// # Errors
///
/// Always returns [`crate::Error::FeatureNotEnabled`].
#[cfg(not(feature = "http"))]
pub fn serve(
    _store: std::sync::Arc<dyn crate::storage::CounterStore>,
    _host: &str,
    _port: u16,
) -> crate::Result<()> {
    Err(crate::Error::FeatureNotEnabled("http".to_string()))
}

//! Structured logging init, in the spirit of the teacher repo's
//! `tfc::logger::init_combined_logger` — a single call site a binary makes
//! once at startup, everything else just uses `tracing`'s macros with a
//! `target:` scoped to the emitting component.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes a `tracing` subscriber reading `RUST_LOG`, defaulting to `info`.
/// Idempotent-ish: a second call is harmless but the second subscriber install
/// will be ignored by `tracing`'s global dispatcher.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

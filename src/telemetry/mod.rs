//! Tracing setup for embedders.
//!
//! The engine itself only emits `tracing` events (transitions, sentry
//! pulses, dispatch drains); installing a subscriber is the host's choice.
//! [`init_tracing`] wires up the common fmt + env-filter + error-layer
//! stack for binaries and examples that want one quickly.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global subscriber: env-filter (`RUST_LOG`, default `info`),
/// compact fmt output, and span-trace capture for error reports.
///
/// Safe to call once per process; returns quietly if a subscriber is
/// already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .with(ErrorLayer::default())
        .try_init();
}

//! # tickrun
//!
//! The running bridge: TCP listener, authenticated script sessions,
//! process lifecycle, and the tick loop glue over the `tickhost` model.

pub mod config;
pub mod error;
pub mod launch;
pub mod metrics;
pub mod runtime;
pub mod session;
pub mod subscribe;
pub mod tick;

pub use config::fresh_token;
pub use config::BridgeConfig;
pub use error::RunError;
pub use error::RunResult;
pub use launch::discover_scripts;
pub use launch::LaunchSpec;
pub use launch::NullLauncher;
pub use launch::ProcessLauncher;
pub use launch::ScriptHandle;
pub use launch::ScriptLauncher;
pub use metrics::MetricsFacade;
pub use runtime::BridgeRuntime;
pub use session::Session;
pub use session::SessionContext;
pub use session::TokenLedger;
pub use subscribe::Priority;
pub use subscribe::Subscription;
pub use subscribe::SubscriptionSet;
pub use tick::TickThread;
pub use tick::TICK_PERIOD;

/// Install a global `tracing` subscriber honoring `RUST_LOG`. Call once
/// from the embedding binary; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests;

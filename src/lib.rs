pub mod agent;
pub mod bmc;
pub mod collector;
pub mod config;
pub mod error;
pub mod runner;
pub mod store;

/// Initialises structured logging from `RUST_LOG`, defaulting to `info`
/// when unset, shared by both binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

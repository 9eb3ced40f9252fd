pub mod config;
pub mod executor;
pub mod files;
pub mod link;
pub mod packages;
pub mod shell;
pub mod syslog;
pub mod system_metrics;
pub mod util;

// === CLI entrypoint ===
pub mod cli;

/// Entrypoint used by `main.rs` and tests to run the full CLI.
pub async fn run_cli() -> anyhow::Result<()> {
    cli::cli().await
}

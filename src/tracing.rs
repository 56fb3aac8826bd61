use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Global tracing subscriber for the migration CLI.
///
/// `RUST_LOG` wins when set; the caller supplies the fallback directive
/// (typically `info,sqlx=warn` so statement logging stays quiet during long
/// ledger-heavy runs). Target names are kept because per-module filtering is
/// how noisy sub-steps get silenced in practice.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

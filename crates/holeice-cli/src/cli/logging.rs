use anyhow::{Context, anyhow};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "info";

/// Sweep progress goes to stdout, next to the simulator's own output.
///
/// `--log-level` wins over `RUST_LOG`; without either everything at `info`
/// and above is shown.
pub(super) fn init_logging(level: Option<&str>) -> anyhow::Result<()> {
    let env_filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid --log-level '{level}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(false)
                .without_time(),
        )
        .try_init()
        .map_err(|error| anyhow!("failed to initialise logging: {error}"))
}

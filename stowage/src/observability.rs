use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "info";

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `filter` is used, falling back to
/// `info`. Fails if a global subscriber is already installed.
pub fn init_tracing(filter: Option<&str>) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => EnvFilter::try_new(filter.unwrap_or(DEFAULT_FILTER))?,
    };

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber already set: {e}"))
}

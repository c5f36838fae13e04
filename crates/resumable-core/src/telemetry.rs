use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "resumable=debug";

/// Initialize tracing with an `EnvFilter` read from `RUST_LOG`.
///
/// Falls back to `default_filter` (or [`DEFAULT_FILTER`]) when `RUST_LOG` is
/// unset. Returns an error if a global subscriber is already installed, which
/// test harnesses calling this repeatedly can ignore.
pub fn init_telemetry(
    default_filter: Option<&str>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.unwrap_or(DEFAULT_FILTER).into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    tracing::debug!("Tracing initialized");
    Ok(())
}

use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the process-wide tracing subscriber.
///
/// Reads `RUST_LOG` through [`EnvFilter`], defaulting to `info` when unset.
/// There is no external exporter: the server emits structured log lines to
/// stdout and nothing else, matching the hosts-compose-logging boundary
/// called out in the scope document.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

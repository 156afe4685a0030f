use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber for hosts that do not bring their own.
///
/// `RUST_LOG` drives filtering (default `sync_engine=info`); set
/// `RUST_LOG_FORMAT=json` for structured output. Returns `false` when a
/// subscriber was already installed.
pub fn init_tracing() -> bool {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sync_engine=info,backend_client=info".into());

    let installed = if json_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    installed.is_ok()
}

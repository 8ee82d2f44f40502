use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `level`. Text output carries targets and
/// thread names so the feed and service contexts can be told apart.
pub fn init_logger(level: &str, json: bool) {
    if let Err(e) = try_init_logger(level, json) {
        eprintln!("logger already initialized: {}", e);
    }
}

/// Like [`init_logger`], but reports a second initialization as an error
pub fn try_init_logger(
    level: &str,
    json: bool,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_names(true))
            .try_init()
    }
}

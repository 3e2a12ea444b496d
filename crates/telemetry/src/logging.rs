use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with human-readable output.
///
/// Uses `RUST_LOG` if set, otherwise `default_level` (e.g. "info",
/// "portal_gateway=debug,warn"). Safe to call multiple times — later calls
/// are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (human-readable)");
}

/// Initialize logging with JSON output, for deployments that ship logs to a
/// collector rather than a terminal.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}

/// Dispatch to [`init_logging`] or [`init_logging_json`] based on the
/// configured log format (`"human"` or `"json"`).
pub fn init_from_format(service_name: &str, default_level: &str, format: &str) {
    match format {
        "json" => init_logging_json(service_name, default_level),
        _ => init_logging(service_name, default_level),
    }
}

// Observability
// Structured logging setup and trace-scoped execution helpers. Call
// `init_logging` once at startup; everything else is per-operation.

use anyhow::Result;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Initialize the logging and tracing infrastructure with defaults.
pub fn init_logging() -> Result<()> {
    init_logging_with_level(false, false)
}

/// Initialize logging with configurable verbosity.
pub fn init_logging_with_level(verbose: bool, quiet: bool) -> Result<()> {
    let filter_level = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("kortex=debug,info")
    } else {
        // Default: warnings and errors for kortex, only errors for dependencies.
        EnvFilter::new("kortex=warn,error")
    };

    // Quiet takes precedence over RUST_LOG so that --quiet always silences.
    let env_filter = if quiet {
        EnvFilter::new("error")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::try_from_default_env().unwrap_or(filter_level)
    } else {
        filter_level
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(!quiet)
        .with_line_number(!quiet)
        .with_file(!quiet)
        .with_ansi(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        Ok(()) => Ok(()),
        // Already initialized, which is fine in test environments.
        Err(_) => Ok(()),
    }
}

/// Execute a future with a fresh trace id, logging start, completion, and
/// failure with elapsed time.
pub async fn with_trace_id<F, T>(operation: &str, f: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let trace_id = Uuid::new_v4();

    info!(trace_id = %trace_id, "Starting operation: {}", operation);

    let start = Instant::now();
    let result = f.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => {
            info!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis(),
                "Operation completed: {}", operation
            );
        }
        Err(e) => {
            error!(
                trace_id = %trace_id,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "Operation failed: {}", operation
            );
        }
    }

    result
}

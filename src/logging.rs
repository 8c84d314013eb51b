use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE: &str = "epi_report.log";
const DEFAULT_DIRECTIVE: &str = "epi_report=info";

/// `RUST_LOG` when set and valid, the crate at info otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

/// Console output on stderr plus a daily-rolling JSON file under `logs/`.
///
/// Stdout stays free for the status lines the binary prints.
pub fn init_logging() {
    if let Err(e) = fs::create_dir_all(LOG_DIR) {
        eprintln!("cannot create log directory '{LOG_DIR}': {e}");
    }

    // JSON file layer
    let file_appender = tracing_appender::rolling::daily(LOG_DIR, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer().json().with_writer(writer);

    // Console layer
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(console_layer)
        .init();

    // Flushes on drop; lives for the whole process
    std::mem::forget(guard);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_directive_parses() {
        assert!(DEFAULT_DIRECTIVE.parse::<tracing_subscriber::filter::Directive>().is_ok());
    }
}

//! Structured logging setup.
//!
//! Format is selected by the `LOG_FORMAT` environment variable: `json` for
//! machine-readable production logs, anything else (including unset) for
//! human-readable text during local development.

use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter};

/// Initializes the global tracing subscriber. Call once at process start.
pub fn init_logging(service_name: &str) {
    let format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if format.eq_ignore_ascii_case("json") {
        init_json_logging(service_name);
    } else {
        init_text_logging(service_name);
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_json_logging(service_name: &str) {
    let layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_target(true)
        .flatten_event(true)
        .with_span_events(FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(layer)
        .init();

    tracing::info!(service = service_name, format = "json", "logging initialized");
}

fn init_text_logging(service_name: &str) {
    let layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(layer)
        .init();

    tracing::info!(service = service_name, format = "text", "logging initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_parses_default() {
        std::env::remove_var("RUST_LOG");
        let filter = env_filter();
        assert_eq!(filter.to_string(), "info");
    }
}

//! Telemetry
//!
//! Structured logging for checkpoint and recovery operations.
//! - Filter from `RUST_LOG`, falling back to the configured directive
//! - Compact stderr output or JSON lines
//! - Recovery spans with timing and outcome

use std::future::Future;
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Sanitize a string for safe log output by escaping control characters.
/// Task ids come from callers, so embedded newlines could forge log lines.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Initialize the global subscriber from logging config.
/// `RUST_LOG` wins over `logging.filter` when set.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.filter.clone());
    init_tracing_with_filter(&filter, config.json);
}

/// Initialize with a custom filter string. Only the first call has effect.
pub fn init_tracing_with_filter(filter: &str, json: bool) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter_layer = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        let registry = tracing_subscriber::registry().with(filter_layer);
        let _ = if json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_writer(std::io::stderr),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .with_level(true)
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .try_init()
        };
    });
}

/// Run one recovery attempt inside a span, logging duration and outcome.
pub async fn track_recovery<F, Fut, T, E>(task_id: &str, strategy: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let safe_id = sanitize_for_log(task_id);
    let span = info_span!(
        "recovery.attempt",
        task_id = safe_id.as_str(),
        strategy,
        duration_ms = tracing::field::Empty,
        success = tracing::field::Empty,
    );

    let result = f().instrument(span.clone()).await;
    let duration = start.elapsed().as_millis() as u64;
    span.record("duration_ms", duration);

    let _enter = span.enter();
    match &result {
        Ok(_) => {
            span.record("success", true);
            info!(duration_ms = duration, "Recovery attempt succeeded");
        }
        Err(e) => {
            let safe_err = sanitize_for_log(&e.to_string());
            span.record("success", false);
            error!(duration_ms = duration, error = safe_err.as_str(), "Recovery attempt failed");
        }
    }
    result
}

/// Initialize tracing for tests with a simple subscriber
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

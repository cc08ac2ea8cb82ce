//! Logging setup for the CLI.
//!
//! The engine emits `tracing` events; this module installs the subscriber.
//! Logs go to stderr so command output on stdout stays pipeable.
//!
//! # Environment Variables
//!
//! - `SUPA_DEBUG=true` - Enable debug logging
//! - `SUPA_LOG_LEVEL=debug|info|warn|error|trace` - Set specific log level
//! - `SUPA_LOG_FORMAT=json|pretty|compact` - Set output format (default: compact)

use std::env;
use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static INIT: Once = Once::new();

/// Whether `value` turns debug logging on.
fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Resolve the log level from the raw `SUPA_LOG_LEVEL` value and the debug flag.
///
/// Unknown levels fall back as if the variable were unset.
pub fn resolve_level(level: Option<&str>, debug: bool) -> &'static str {
    let fallback = if debug { "debug" } else { "warn" };
    match level.map(str::to_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("info") => "info",
        Some("warn") => "warn",
        Some("error") => "error",
        _ => fallback,
    }
}

/// Resolve the output format from the raw `SUPA_LOG_FORMAT` value.
pub fn resolve_format(format: Option<&str>) -> &'static str {
    match format.map(str::to_lowercase).as_deref() {
        Some("json") => "json",
        Some("pretty") => "pretty",
        _ => "compact",
    }
}

/// Check if debug logging is enabled via `SUPA_DEBUG`.
pub fn is_debug_enabled() -> bool {
    env::var("SUPA_DEBUG").map(|v| is_truthy(&v)).unwrap_or(false)
}

/// Install the global subscriber. Subsequent calls are no-ops.
pub fn init() {
    INIT.call_once(|| {
        let level = resolve_level(env::var("SUPA_LOG_LEVEL").ok().as_deref(), is_debug_enabled());
        let format = resolve_format(env::var("SUPA_LOG_FORMAT").ok().as_deref());

        let filter = EnvFilter::try_new(format!("supa_migrate={},supa_cli={}", level, level))
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

        let registry = tracing_subscriber::registry().with(filter);
        let result = match format {
            "json" => registry.with(layer.json()).try_init(),
            "pretty" => registry.with(layer.pretty()).try_init(),
            _ => registry.with(layer.compact()).try_init(),
        };
        if result.is_err() {
            tracing::debug!("Global tracing subscriber already installed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_level() {
        assert_eq!(resolve_level(None, false), "warn");
        assert_eq!(resolve_level(None, true), "debug");
        assert_eq!(resolve_level(Some("INFO"), false), "info");
        assert_eq!(resolve_level(Some("trace"), true), "trace");
        assert_eq!(resolve_level(Some("verbose"), false), "warn");
        assert_eq!(resolve_level(Some("verbose"), true), "debug");
    }

    #[test]
    fn test_resolve_format() {
        assert_eq!(resolve_format(None), "compact");
        assert_eq!(resolve_format(Some("JSON")), "json");
        assert_eq!(resolve_format(Some("pretty")), "pretty");
        assert_eq!(resolve_format(Some("xml")), "compact");
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy("1"));
        assert!(is_truthy("Yes"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}

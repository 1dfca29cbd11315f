// ABOUTME: Structured logging setup (tracing + tracing-subscriber)
// ABOUTME: Installed once at process start via init()
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Logging
//!
//! Token plaintexts and ciphertexts must never be logged, only hashes and
//! prefixes. Every inbound request gets a span from the `TraceLayer` set up
//! in `lib.rs`; this module only builds the subscriber those spans are
//! emitted through.

use tracing_subscriber::{fmt, EnvFilter};

/// Output shape for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

/// Install the global tracing subscriber. Call exactly once, at process
/// start, before any other module logs.
pub fn init(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .with_target(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .with_env_filter(filter)
                .pretty()
                .with_target(true)
                .init();
        }
        LogFormat::Compact => {
            fmt()
                .with_env_filter(filter)
                .compact()
                .with_target(true)
                .init();
        }
    }
}

//! Tracing subscriber setup.
//!
//! Logs go to stderr so command output on stdout stays pipeable. The filter
//! defaults to `info` and can be overridden with `RUST_LOG`.

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber. Later calls are no-ops.
pub fn init_tracing(json_output: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // `try_init` fails when a subscriber is already installed (tests, repeated calls).
    let _ = if json_output {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_writer(std::io::stderr);
        Registry::default().with(env_filter).with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        Registry::default().with(env_filter).with(fmt_layer).try_init()
    };
}

//! Tracing subscriber setup.
//!
//! Events go to stderr so command output on stdout stays parseable.
//! `RUST_LOG` takes precedence over `[logging] filter`.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

//! Tracing subscriber setup for the `chat` binary.
//!
//! Logs go to stderr so `chat ask` output on stdout stays clean. `RUST_LOG`
//! takes precedence; otherwise `--verbose` selects DEBUG for this
//! workspace's crates and INFO elsewhere.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "info,chat_engine=debug,chat_engine_core=debug"
    } else {
        "info"
    }
}

pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    // a second init (e.g. in tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

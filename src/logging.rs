//! Tracing subscriber setup for the CLI.
//!
//! Logs go to stderr so command output on stdout stays parseable.
//! `RUST_LOG` wins when set; otherwise `--verbose` selects `debug` and the
//! default is `info` for this crate and `warn` for dependencies.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "warn,drive_rag=debug"
    } else {
        "warn,drive_rag=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_ansi(atty::is(atty::Stream::Stderr));

    // A second call (e.g. from tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

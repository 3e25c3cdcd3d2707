//! Provide tracing, tailored to this program.
//!
//! The daemon calls [`init_journald_or_stdout`] once at startup to install a
//! subscriber. Everything else does `use crate::tracing::prelude::*` for the
//! `trace!()` .. `error!()` macros; the library itself never installs a
//! subscriber, so embedding programs keep control of their output.

use std::env;
use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime},
    prelude::*,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging.
///
/// Under systemd, log to the journal; otherwise log to stderr, filtered by
/// `RUST_LOG` with `default` as the level when it is unset.
pub fn init_journald_or_stdout(default: LevelFilter) {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
        } else {
            use_stderr(default);
            error!("Failed to initialize journald logging, using stderr.");
        }
    } else {
        use_stderr(default);
    }
}

// The console owns stdout, so human-readable logs go to stderr.
fn use_stderr(default: LevelFilter) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimer),
        )
        .init();
}

// Local time to the nearest second.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or(OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| std::fmt::Error)?;
        write!(w, "{stamp}")
    }
}

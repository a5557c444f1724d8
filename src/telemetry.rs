//! Tracing setup.
//!
//! Call [`init`] once at process start. Filtering follows `RUST_LOG`,
//! falling back to warnings plus this crate's info-level events.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Safe to call once per process; later
/// calls are ignored.
pub fn init() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn,mangrove=info"))
        .expect("static filter directive is valid");

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

//! Log output for hosts and tests.
//!
//! The controller only emits `tracing` events; embedding hosts that install
//! their own subscriber should not call [`init`].

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive, e.g. `places_sync=trace`.
pub const LOG_ENV: &str = "PLACES_SYNC_LOG";

static INIT: Once = Once::new();

/// Install a compact stderr subscriber. Only the first call has any effect.
///
/// Under a test runner the output goes through the test writer, for every
/// test thread, and defaults to debug level for this crate.
pub fn init() {
    INIT.call_once(|| {
        let under_test =
            std::env::var_os("NEXTEST").is_some() || std::env::var_os("CARGO_TARGET_TMPDIR").is_some();
        let filter = filter(if under_test { Level::DEBUG } else { Level::INFO });

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_target(true)
            .compact();

        let installed = if under_test {
            builder.with_test_writer().try_init()
        } else {
            builder.with_writer(std::io::stderr).try_init()
        };
        if let Err(e) = installed {
            eprintln!("Failed to initialize places-sync tracing: {}", e);
        }
    });
}

/// `PLACES_SYNC_LOG` when set and valid, otherwise `places_sync=<level>`.
fn filter(default: Level) -> EnvFilter {
    let fallback = || EnvFilter::new(format!("places_sync={}", default.as_str().to_lowercase()));
    match std::env::var(LOG_ENV) {
        Ok(directives) => EnvFilter::try_new(&directives).unwrap_or_else(|e| {
            eprintln!("Ignoring invalid {}='{}': {}", LOG_ENV, directives, e);
            fallback()
        }),
        Err(_) => fallback(),
    }
}

//! ## emnet-telemetry::logging
//! **`tracing-subscriber` set-up for binaries and embedders**
//!
//! ### Expectations:
//! - `RUST_LOG` wins over the configured default level
//! - Installing twice is an error for `try_init`, never a panic

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug)]
pub struct StackLogger;

impl StackLogger {
    /// Installs the global subscriber. A second call is ignored.
    pub fn init(default_level: &str) {
        if let Err(err) = Self::try_init(default_level) {
            tracing::debug!(%err, "global subscriber already installed");
        }
    }

    pub fn try_init(default_level: &str) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(Self::filter(default_level))
            .with(fmt::layer().with_thread_names(true).with_target(true))
            .try_init()
    }

    /// `RUST_LOG` if set and valid, else `default_level`, else `info`.
    pub fn filter(default_level: &str) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

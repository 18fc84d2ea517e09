pub mod config;
pub mod cors;
pub mod error;
pub mod headers;
pub mod health;
pub mod metrics;
pub mod sanitize;
pub mod trace;
pub mod types;

pub use config::{AppConfig, ConfigError, EnvTag};
pub use error::{ApiError, ApiResult, ErrorKind, Origin};
pub use trace::{TraceContext, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
pub use types::{JobStatus, Priority, Role, StatusEvent, Subject};

/// Initialise the global tracing subscriber.
///
/// Reads `RUST_LOG` for filtering (default `info`). Call once at startup;
/// subsequent calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

//! Console tracing setup. `STEPRUN_LOG` takes precedence over the
//! configured level, same role LOGGING_LEVEL plays for the Python jobs
//! this harness wraps.

use tracing_subscriber::EnvFilter;

pub fn init(level: &str) {
    let filter =
        EnvFilter::try_from_env("STEPRUN_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    // tolerate an already-installed subscriber (tests, embedding)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

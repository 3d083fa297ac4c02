//! Profiling support.
//!
//! With the `profiling` feature enabled, the hot paths (entity creation,
//! migration, deferred drain, frame stepping) carry `info_span!`
//! instrumentation. This module installs a subscriber that records those
//! spans as JSON lines, off the hot thread.
//!
//! ```ignore
//! let _guard = flux_ecs::profiling::init_json_logging("./profiles");
//! world.step_frame(0.016)?;
//! ```

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

/// Install a global JSON subscriber writing to `directory/flux-ecs.log`.
///
/// Keep the returned guard alive for as long as spans should be recorded;
/// dropping it flushes and stops the writer thread. Installing a second
/// global subscriber is a no-op.
pub fn init_json_logging(directory: impl AsRef<Path>) -> WorkerGuard {
    let appender = tracing_appender::rolling::never(directory.as_ref(), "flux-ecs.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer));
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

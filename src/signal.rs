//! SIGINT/SIGTERM handling.
//!
//! The first signal asks the tasks to stop; a second one exits
//! immediately with status 1.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Run `on_shutdown` on the first SIGINT or SIGTERM.
///
/// The returned flag turns `true` at the same moment, for loops that
/// would rather poll than be told.
pub fn install_signal_handler<F>(on_shutdown: F) -> Result<Arc<AtomicBool>, ctrlc::Error>
where
    F: Fn() + Send + 'static,
{
    let signalled = Arc::new(AtomicBool::new(false));
    let flag = signalled.clone();

    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("second signal, exiting now");
            std::process::exit(1);
        }
        tracing::info!("shutdown signal received, stopping tasks");
        on_shutdown();
    })?;

    Ok(signalled)
}

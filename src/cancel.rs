//! Cooperative stopping of generation runs.
//!
//! A [`StopToken`] is owned by the session driving a run
//! ([`SessionState`](crate::progress::SessionState)) and handed by
//! reference to the orchestrator and the generators. Stopping never aborts
//! a task: the run notices the flag at its next checkpoint (a chunk
//! boundary, or between sections) and returns `Stopped` with all completed
//! work intact. The CLI trips the token from a Ctrl-C watcher task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Shared stop flag for one generation session.
///
/// Clones share state, so a clone moved into a signal handler stops the
/// run holding the original. A stopped token stays stopped until
/// [`reset`](StopToken::reset), which a resumed run must call first.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Ask the run to stop at its next checkpoint. Idempotent.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
    }

    /// Spawn a task that stops this token on the first Ctrl-C.
    ///
    /// Abort the returned handle once the run settles so a later Ctrl-C
    /// falls through to the default handler.
    pub fn stop_on_ctrl_c(&self) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nStopping after the current chunk...");
                tracing::info!("stop requested from terminal");
                token.stop();
            }
        })
    }
}

//! Debounced background saving.
//!
//! [`AutoSaver::schedule`] is cheap and synchronous; a background task
//! coalesces scheduled documents by id and writes the latest version once
//! no new version has arrived for the debounce window. Failed writes are
//! logged and dropped: saving never blocks or fails generation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::Document;
use crate::store::DocumentStore;

enum Command {
    Save(Box<Document>),
    Flush(oneshot::Sender<()>),
}

/// Handle to the background save task.
pub struct AutoSaver {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

impl AutoSaver {
    /// Spawn the save task on the current tokio runtime.
    pub fn spawn(store: Arc<dyn DocumentStore>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(save_loop(store, debounce, rx));
        Self { tx, handle }
    }

    /// Queue `doc` for saving; a later schedule for the same id replaces it.
    pub fn schedule(&self, doc: Document) {
        if self.tx.send(Command::Save(Box::new(doc))).is_err() {
            tracing::warn!("autosave task is gone; document not saved");
        }
    }

    /// Write everything pending now and wait for it.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Flush and stop the task.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "autosave task ended abnormally");
        }
    }
}

async fn save_loop(
    store: Arc<dyn DocumentStore>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut pending: HashMap<String, Document> = HashMap::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => tokio::select! {
                cmd = rx.recv() => cmd,
                _ = tokio::time::sleep_until(at) => {
                    write_all(store.as_ref(), &mut pending).await;
                    deadline = None;
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match command {
            Some(Command::Save(doc)) => {
                pending.insert(doc.id.clone(), *doc);
                deadline = Some(Instant::now() + debounce);
            }
            Some(Command::Flush(done)) => {
                write_all(store.as_ref(), &mut pending).await;
                deadline = None;
                let _ = done.send(());
            }
            None => {
                write_all(store.as_ref(), &mut pending).await;
                return;
            }
        }
    }
}

async fn write_all(store: &dyn DocumentStore, pending: &mut HashMap<String, Document>) {
    for (id, doc) in pending.drain() {
        match store.save_document(&doc).await {
            Ok(()) => tracing::debug!(document = %id, "document saved"),
            Err(e) => tracing::warn!(document = %id, error = %e, "failed to save document"),
        }
    }
}

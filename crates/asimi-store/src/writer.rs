// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use asimi_core::SessionSnapshot;

use crate::SessionStore;

/// How long `close` waits for the writer to flush pending saves.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

enum WriteRequest {
    Save(SessionSnapshot),
    Close(oneshot::Sender<()>),
}

/// Handle to the background writer.  `save_session` never blocks; pending
/// saves for the same session id are coalesced so a burst of saves results
/// in at most one extra write reflecting the latest state.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<WriteRequest>,
}

impl StoreHandle {
    /// Spawn the writer task over `store`.  Must be called within a tokio
    /// runtime.
    pub fn spawn(store: Arc<SessionStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(store, rx));
        Self { tx }
    }

    /// Enqueue a save of the given snapshot.  A later enqueue for the same
    /// session id supersedes an earlier one that has not been written yet.
    pub fn save_session(&self, snapshot: SessionSnapshot) {
        let _ = self.tx.send(WriteRequest::Save(snapshot));
    }

    /// Flush pending writes and stop the writer, waiting up to 2 seconds.
    pub async fn close(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteRequest::Close(ack_tx)).is_err() {
            return;
        }
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, ack_rx).await.is_err() {
            warn!("session store close timed out before the flush completed");
        }
    }
}

async fn writer_loop(store: Arc<SessionStore>, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    // Coalescing is structural: one dirty snapshot per session id, latest
    // wins.  While a write batch is in flight, new requests queue in the
    // channel and are drained into the next batch.
    let mut pending: HashMap<String, SessionSnapshot> = HashMap::new();
    loop {
        let Some(first) = rx.recv().await else {
            flush(&store, std::mem::take(&mut pending)).await;
            return;
        };
        let mut close_ack = None;
        for req in std::iter::once(first).chain(std::iter::from_fn(|| rx.try_recv().ok())) {
            match req {
                WriteRequest::Save(snap) => {
                    pending.insert(snap.id.clone(), snap);
                }
                WriteRequest::Close(ack) => close_ack = Some(ack),
            }
        }

        flush(&store, std::mem::take(&mut pending)).await;

        if let Some(ack) = close_ack {
            let _ = ack.send(());
            return;
        }
    }
}

async fn flush(store: &Arc<SessionStore>, batch: HashMap<String, SessionSnapshot>) {
    if batch.is_empty() {
        return;
    }
    let store = Arc::clone(store);
    let result = tokio::task::spawn_blocking(move || {
        for snapshot in batch.into_values() {
            if let Err(e) = store.save_snapshot(&snapshot) {
                warn!(id = %snapshot.id, error = %e, "session save failed");
            }
        }
    })
    .await;
    if let Err(e) = result {
        warn!(error = %e, "session writer task panicked");
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

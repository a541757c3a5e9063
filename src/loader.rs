//! Incremental per-user statistics loading.
//!
//! Identifiers are fetched in fixed-size chunks on a background thread. Each chunk is
//! published as soon as it arrives so the UUIDs table can render progressively; the
//! receiving side appends whole chunks only.

use crate::error_display::user_message_from_report;
use crate::record::Record;
use crate::store::RecordStore;
use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderPhase {
    #[default]
    Idle,
    Loading,
    Complete,
    Cancelled,
    Failed,
}

/// Messages from a loader thread, tagged with the loading cycle they belong to.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    Chunk {
        cycle: u64,
        records: Vec<Record>,
        loaded: usize,
        total: usize,
    },
    Complete {
        cycle: u64,
        total: usize,
    },
    Failed {
        cycle: u64,
        loaded: usize,
        message: String,
    },
}

impl LoaderEvent {
    pub fn cycle(&self) -> u64 {
        match self {
            LoaderEvent::Chunk { cycle, .. }
            | LoaderEvent::Complete { cycle, .. }
            | LoaderEvent::Failed { cycle, .. } => *cycle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Complete,
    Cancelled,
}

/// Append-only sequence of loaded statistics records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    records: Vec<Record>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_chunk(&mut self, chunk: Vec<Record>) {
        self.records.extend(chunk);
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// Fetch `ids` chunk by chunk on the calling thread, handing each chunk to `publish`.
///
/// Cancellation is checked before every fetch and again before publishing, so a
/// cancelled run never publishes a partial or late chunk. A store returning more records
/// than it was asked for is truncated to the chunk length.
pub fn load_in_chunks(
    ids: &[String],
    chunk_size: usize,
    store: &dyn RecordStore,
    token: &CancellationToken,
    mut publish: impl FnMut(Vec<Record>),
) -> Result<LoadOutcome> {
    let chunk_size = chunk_size.max(1);
    for (index, chunk) in ids.chunks(chunk_size).enumerate() {
        if token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }
        let mut records = store.query_uuid_statistics(chunk, chunk_size)?;
        if records.len() > chunk.len() {
            tracing::warn!(
                chunk = index,
                requested = chunk.len(),
                returned = records.len(),
                "store returned extra statistics records, truncating"
            );
            records.truncate(chunk.len());
        }
        if token.is_cancelled() {
            return Ok(LoadOutcome::Cancelled);
        }
        publish(records);
    }
    Ok(LoadOutcome::Complete)
}

/// Starts background loading cycles against a store.
#[derive(Clone)]
pub struct StatsLoader {
    store: Arc<dyn RecordStore>,
    chunk_size: usize,
}

impl StatsLoader {
    pub fn new(store: Arc<dyn RecordStore>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Load `ids` on a new thread, reporting to `tx`. Dropping the handle cancels the run.
    pub fn spawn(&self, cycle: u64, ids: Vec<String>, tx: Sender<LoaderEvent>) -> LoaderHandle {
        let token = CancellationToken::new();
        let thread_token = token.clone();
        let store = Arc::clone(&self.store);
        let chunk_size = self.chunk_size;

        let thread = std::thread::spawn(move || {
            let total = ids.len();
            let mut loaded = 0;
            tracing::debug!(cycle, total, chunk_size, "stats loader started");
            let outcome = load_in_chunks(&ids, chunk_size, store.as_ref(), &thread_token, |records| {
                loaded += records.len();
                let event = LoaderEvent::Chunk {
                    cycle,
                    records,
                    loaded,
                    total,
                };
                if tx.send(event).is_err() {
                    // Receiver gone: the page navigated away.
                    thread_token.cancel();
                }
            });
            match outcome {
                Ok(LoadOutcome::Complete) => {
                    tracing::debug!(cycle, total, "stats loader complete");
                    let _ = tx.send(LoaderEvent::Complete { cycle, total });
                }
                Ok(LoadOutcome::Cancelled) => {
                    tracing::debug!(cycle, loaded, "stats loader cancelled");
                }
                Err(e) => {
                    let message = user_message_from_report(&e);
                    tracing::error!(cycle, loaded, error = %message, "stats loader failed");
                    let _ = tx.send(LoaderEvent::Failed {
                        cycle,
                        loaded,
                        message,
                    });
                }
            }
        });

        LoaderHandle {
            cycle,
            token,
            thread: Some(thread),
        }
    }
}

/// Handle to a running loader cycle.
#[derive(Debug)]
pub struct LoaderHandle {
    cycle: u64,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl LoaderHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the thread to exit without cancelling it.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(cycle = self.cycle, "stats loader thread panicked");
            }
        }
    }
}

impl Drop for LoaderHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.token.cancel();
        }
    }
}

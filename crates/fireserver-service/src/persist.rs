//! Background history persistence.
//!
//! Ingestion hands classified readings to a bounded queue; a single worker
//! appends them to SQLite. The HTTP response never waits on the database
//! unless `persistence.await_write` is set, and even then only up to the
//! write timeout.
//!
//! A timed-out write is reported as failed, but the blocking SQLite call is
//! not interrupted, so the row may still land afterwards.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fireserver_store::{NewHistoryEntry, Store};

use crate::config::PersistenceConfig;

/// History write failures. None of these fail an ingestion request.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("History queue is full")]
    QueueFull,
    #[error("History write timed out after {0:?}")]
    Timeout(Duration),
    #[error("History writer is not running")]
    WorkerGone,
    #[error("History store error: {0}")]
    Store(#[from] fireserver_store::Error),
}

/// Handle to the history database.
///
/// File databases get separate writer and reader connections so history
/// queries do not queue behind appends. An in-memory database has a single
/// connection shared by both.
#[derive(Clone)]
pub struct HistoryStore {
    writer: Arc<Mutex<Store>>,
    reader: Arc<Mutex<Store>>,
}

impl HistoryStore {
    pub fn open(path: &Path) -> fireserver_store::Result<Self> {
        Ok(Self {
            writer: Arc::new(Mutex::new(Store::open(path)?)),
            reader: Arc::new(Mutex::new(Store::open(path)?)),
        })
    }

    pub fn in_memory() -> fireserver_store::Result<Self> {
        Ok(Self::from_store(Store::open_in_memory()?))
    }

    /// Wrap one store used for both reads and writes.
    pub fn from_store(store: Store) -> Self {
        let store = Arc::new(Mutex::new(store));
        Self {
            writer: Arc::clone(&store),
            reader: store,
        }
    }

    /// Append on the blocking pool.
    pub async fn append(&self, entry: NewHistoryEntry) -> Result<i64, PersistenceError> {
        let writer = Arc::clone(&self.writer);
        run_blocking(move || {
            let store = writer.lock().unwrap_or_else(PoisonError::into_inner);
            store.append(&entry)
        })
        .await
    }

    /// Run a read on the blocking pool.
    pub async fn read<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> fireserver_store::Result<T> + Send + 'static,
    {
        let reader = Arc::clone(&self.reader);
        run_blocking(move || {
            let store = reader.lock().unwrap_or_else(PoisonError::into_inner);
            f(&store)
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, PersistenceError>
where
    T: Send + 'static,
    F: FnOnce() -> fireserver_store::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(PersistenceError::from),
        Err(e) => {
            error!("History store task failed: {}", e);
            Err(PersistenceError::WorkerGone)
        }
    }
}

/// What happened to one history write, as far as ingestion knows.
#[derive(Debug)]
pub enum PersistOutcome {
    /// Written; the row id.
    Stored(i64),
    /// Accepted by the queue; not waited for.
    Queued,
    Failed(PersistenceError),
}

impl PersistOutcome {
    /// `stored`, `queued` or `failed`, as reported to the device.
    pub fn label(&self) -> &'static str {
        match self {
            PersistOutcome::Stored(_) => "stored",
            PersistOutcome::Queued => "queued",
            PersistOutcome::Failed(_) => "failed",
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            PersistOutcome::Stored(id) => Some(*id),
            _ => None,
        }
    }
}

/// Counters since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    /// Entries accepted by the queue.
    pub queued: u64,
    /// Entries written.
    pub stored: u64,
    /// Writes that failed or timed out.
    pub failed: u64,
    /// Entries refused because the queue was full or the worker gone.
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    queued: AtomicU64,
    stored: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

type Ack = oneshot::Sender<Result<i64, PersistenceError>>;

struct PersistJob {
    entry: NewHistoryEntry,
    ack: Option<Ack>,
}

enum Pending {
    Rejected(PersistenceError),
    Queued,
    Awaiting(oneshot::Receiver<Result<i64, PersistenceError>>),
}

/// An entry handed to [`PersistQueue::enqueue`].
#[must_use = "call `outcome` to learn whether the entry was stored"]
pub struct PendingWrite {
    device_id: String,
    state: Pending,
    timeout: Duration,
}

impl PendingWrite {
    /// Resolve to the final outcome, waiting for the writer when
    /// `await_write` is configured.
    pub async fn outcome(self) -> PersistOutcome {
        let result = match self.state {
            Pending::Rejected(e) => return PersistOutcome::Failed(e),
            Pending::Queued => return PersistOutcome::Queued,
            Pending::Awaiting(result) => result,
        };
        match tokio::time::timeout(self.timeout, result).await {
            Ok(Ok(Ok(id))) => PersistOutcome::Stored(id),
            Ok(Ok(Err(e))) => PersistOutcome::Failed(e),
            Ok(Err(_)) => PersistOutcome::Failed(PersistenceError::WorkerGone),
            Err(_) => {
                warn!(
                    device_id = %self.device_id,
                    "Gave up waiting for history write after {:?}",
                    self.timeout
                );
                PersistOutcome::Failed(PersistenceError::Timeout(self.timeout))
            }
        }
    }
}

/// Sender side of the history write queue.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<PersistJob>,
    config: PersistenceConfig,
    counters: Arc<Counters>,
}

impl PersistQueue {
    /// Start the writer task.
    ///
    /// When `cancel` fires the worker stops taking new entries, writes what is
    /// already queued, and exits.
    pub fn start(
        store: HistoryStore,
        config: PersistenceConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            store,
            write_timeout: config.write_timeout(),
            counters: Arc::clone(&counters),
        };
        let handle = tokio::spawn(worker.run(rx, cancel));

        (
            Self {
                tx,
                config,
                counters,
            },
            handle,
        )
    }

    /// Hand an entry to the writer and wait for the outcome.
    ///
    /// Returns [`PersistOutcome::Queued`] right away unless `await_write` is
    /// configured, in which case it waits for the write up to the write
    /// timeout.
    pub async fn submit(&self, entry: NewHistoryEntry) -> PersistOutcome {
        self.enqueue(entry).await.outcome().await
    }

    /// Put an entry on the queue without waiting for the write.
    ///
    /// Entries are written in the order they are enqueued. Waiting on the
    /// returned [`PendingWrite`] is separate so callers can release their
    /// own locks first.
    pub async fn enqueue(&self, entry: NewHistoryEntry) -> PendingWrite {
        let device_id = entry.device_id().to_string();
        let timeout = self.config.write_timeout();
        let (ack, result) = if self.config.await_write {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let state = match self.send(PersistJob { entry, ack }).await {
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(device_id = %device_id, "History entry rejected: {}", e);
                Pending::Rejected(e)
            }
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                match result {
                    Some(rx) => Pending::Awaiting(rx),
                    None => Pending::Queued,
                }
            }
        };

        PendingWrite {
            device_id,
            state,
            timeout,
        }
    }

    async fn send(&self, job: PersistJob) -> Result<(), PersistenceError> {
        let wait = self.config.enqueue_wait();
        if wait.is_zero() {
            self.tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PersistenceError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => PersistenceError::WorkerGone,
            })
        } else {
            self.tx.send_timeout(job, wait).await.map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => PersistenceError::QueueFull,
                mpsc::error::SendTimeoutError::Closed(_) => PersistenceError::WorkerGone,
            })
        }
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            stored: self.counters.stored.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Entries waiting for the writer.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

struct Worker {
    store: HistoryStore,
    write_timeout: Duration,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<PersistJob>, cancel: CancellationToken) {
        info!("History writer started");
        loop {
            tokio::select! {
                biased;
                job = rx.recv() => match job {
                    Some(job) => self.write(job).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    rx.close();
                    let mut drained = 0usize;
                    while let Some(job) = rx.recv().await {
                        self.write(job).await;
                        drained += 1;
                    }
                    info!(drained, "History writer drained queue");
                    break;
                }
            }
        }
        info!("History writer stopped");
    }

    async fn write(&self, job: PersistJob) {
        let PersistJob { entry, ack } = job;
        let device_id = entry.device_id().to_string();
        let state = entry.state;

        let result = match tokio::time::timeout(self.write_timeout, self.store.append(entry)).await
        {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::Timeout(self.write_timeout)),
        };

        match &result {
            Ok(id) => {
                self.counters.stored.fetch_add(1, Ordering::Relaxed);
                debug!(id, device_id = %device_id, status = %state, "History record stored");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(device_id = %device_id, status = %state, "History write failed: {}", e);
            }
        }

        if let Some(ack) = ack {
            // The caller may have stopped waiting.
            let _ = ack.send(result);
        }
    }
}

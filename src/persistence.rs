//! Durable storage of readings, decoupled from the live pipeline.
//!
//! Writes go through a [`PersistenceQueue`]: the dispatch path hands each measurement
//! to a bounded channel without awaiting, and a detached worker writes it to a
//! [`ReadingRepository`]. A full queue or a failed write is logged and counted; the
//! live pipeline never waits on storage.
//!
//! Two repositories are provided:
//! - [`JsonLinesRepository`]: one `session_<id>.jsonl` file per session plus a
//!   `session_<id>.meta.json` descriptor.
//! - [`MemoryRepository`]: in-process, for tests and dry runs.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppResult, DaqError};
use crate::ingest::ReadingSink;
use crate::protocol::Reading;

/// Identifier of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptor of a stored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// Free-form operator notes.
    pub notes: String,
}

/// Durable store for readings, grouped by session.
#[async_trait]
pub trait ReadingRepository: Send + Sync {
    /// Start a new session.
    async fn create_session(&self, notes: &str) -> AppResult<SessionInfo>;

    /// Append one reading to a session.
    async fn insert_reading(&self, session: SessionId, reading: &Reading) -> AppResult<()>;

    /// Readings of a session in stored order, which is dump order rather than
    /// temporal order. Sort with [`sort_for_replay`] before replaying.
    async fn session_readings(&self, session: SessionId) -> AppResult<Vec<Reading>>;

    /// Up to `limit` sessions, newest first.
    async fn recent_sessions(&self, limit: usize) -> AppResult<Vec<SessionInfo>>;
}

/// Order readings by (plot, elapsed time) ascending, as required by
/// [`ChannelStore::replay`](crate::store::ChannelStore::replay).
///
/// The sort is stable; readings without a plot sort first.
pub fn sort_for_replay(readings: &mut [Reading]) {
    readings.sort_by(|a, b| {
        a.plot().cmp(&b.plot()).then_with(|| {
            a.elapsed_s()
                .unwrap_or(0.0)
                .total_cmp(&b.elapsed_s().unwrap_or(0.0))
        })
    });
}

fn newest_first(sessions: &mut [SessionInfo]) {
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
}

// =============================================================================
// In-memory repository
// =============================================================================

#[derive(Default)]
struct MemoryState {
    sessions: Vec<SessionInfo>,
    readings: HashMap<SessionId, Vec<Reading>>,
}

/// Repository held entirely in memory.
#[derive(Default)]
pub struct MemoryRepository {
    state: parking_lot::Mutex<MemoryState>,
}

impl MemoryRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingRepository for MemoryRepository {
    async fn create_session(&self, notes: &str) -> AppResult<SessionInfo> {
        let mut state = self.state.lock();
        let info = SessionInfo {
            id: SessionId(state.sessions.len() as u64 + 1),
            started_at: Utc::now(),
            notes: notes.to_string(),
        };
        state.sessions.push(info.clone());
        state.readings.insert(info.id, Vec::new());
        Ok(info)
    }

    async fn insert_reading(&self, session: SessionId, reading: &Reading) -> AppResult<()> {
        let mut state = self.state.lock();
        let readings = state
            .readings
            .get_mut(&session)
            .ok_or_else(|| DaqError::Persistence(format!("unknown session {session}")))?;
        readings.push(reading.clone());
        Ok(())
    }

    async fn session_readings(&self, session: SessionId) -> AppResult<Vec<Reading>> {
        self.state
            .lock()
            .readings
            .get(&session)
            .cloned()
            .ok_or_else(|| DaqError::Persistence(format!("unknown session {session}")))
    }

    async fn recent_sessions(&self, limit: usize) -> AppResult<Vec<SessionInfo>> {
        let mut sessions = self.state.lock().sessions.clone();
        newest_first(&mut sessions);
        sessions.truncate(limit);
        Ok(sessions)
    }
}

// =============================================================================
// JSON-lines repository
// =============================================================================

const META_SUFFIX: &str = ".meta.json";
const DATA_SUFFIX: &str = ".jsonl";

/// Repository writing one JSON-lines file per session.
pub struct JsonLinesRepository {
    dir: PathBuf,
    next_id: AtomicU64,
}

impl JsonLinesRepository {
    /// Open (creating if needed) a repository rooted at `dir`.
    ///
    /// Session ids continue after the highest id already present.
    pub async fn open(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut highest = 0;
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = meta_file_id(&entry.file_name().to_string_lossy()) {
                highest = highest.max(id);
            }
        }

        info!(dir = %dir.display(), sessions = highest, "opened session directory");
        Ok(Self {
            dir,
            next_id: AtomicU64::new(highest + 1),
        })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn meta_path(&self, session: SessionId) -> PathBuf {
        self.dir.join(format!("session_{session}{META_SUFFIX}"))
    }

    fn data_path(&self, session: SessionId) -> PathBuf {
        self.dir.join(format!("session_{session}{DATA_SUFFIX}"))
    }

    async fn ensure_session(&self, session: SessionId) -> AppResult<()> {
        if tokio::fs::try_exists(self.meta_path(session)).await? {
            Ok(())
        } else {
            Err(DaqError::Persistence(format!("unknown session {session}")))
        }
    }
}

fn meta_file_id(name: &str) -> Option<u64> {
    name.strip_prefix("session_")?
        .strip_suffix(META_SUFFIX)?
        .parse()
        .ok()
}

#[async_trait]
impl ReadingRepository for JsonLinesRepository {
    async fn create_session(&self, notes: &str) -> AppResult<SessionInfo> {
        let info = SessionInfo {
            id: SessionId(self.next_id.fetch_add(1, Ordering::SeqCst)),
            started_at: Utc::now(),
            notes: notes.to_string(),
        };
        let meta = serde_json::to_vec_pretty(&info)?;
        tokio::fs::write(self.meta_path(info.id), meta).await?;
        info!(session = %info.id, "session created");
        Ok(info)
    }

    async fn insert_reading(&self, session: SessionId, reading: &Reading) -> AppResult<()> {
        self.ensure_session(session).await?;

        let mut line = serde_json::to_vec(reading)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.data_path(session))
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn session_readings(&self, session: SessionId) -> AppResult<Vec<Reading>> {
        self.ensure_session(session).await?;

        let path = self.data_path(session);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&path).await?;

        let mut readings = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Reading>(line) {
                Ok(reading) => readings.push(reading),
                Err(e) => warn!(
                    session = %session,
                    line = index + 1,
                    error = %e,
                    "skipping corrupt stored reading"
                ),
            }
        }
        Ok(readings)
    }

    async fn recent_sessions(&self, limit: usize) -> AppResult<Vec<SessionInfo>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if meta_file_id(&entry.file_name().to_string_lossy()).is_none() {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            match serde_json::from_slice::<SessionInfo>(&bytes) {
                Ok(info) => sessions.push(info),
                Err(e) => warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "skipping corrupt session descriptor"
                ),
            }
        }
        newest_first(&mut sessions);
        sessions.truncate(limit);
        Ok(sessions)
    }
}

// =============================================================================
// Background queue
// =============================================================================

/// Counters of the persistence queue.
#[derive(Debug, Default)]
pub struct PersistenceStats {
    written: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl PersistenceStats {
    /// Readings written successfully.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Writes that the repository rejected.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Readings dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Non-blocking front end of the persistence worker.
///
/// Register a clone with the ingestion controller as a [`ReadingSink`]. The worker
/// drains remaining readings and exits once every clone has been dropped.
#[derive(Clone)]
pub struct PersistenceQueue {
    tx: mpsc::Sender<Reading>,
    session: SessionId,
    stats: Arc<PersistenceStats>,
}

impl PersistenceQueue {
    /// Start a worker writing to `session` in `repository`.
    ///
    /// Returns the queue and the worker handle; await the handle after dropping every
    /// queue clone to flush pending writes.
    pub fn spawn(
        repository: Arc<dyn ReadingRepository>,
        session: SessionId,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Reading>(capacity.max(1));
        let stats = Arc::new(PersistenceStats::default());

        let worker_stats = Arc::clone(&stats);
        let worker = tokio::spawn(async move {
            while let Some(reading) = rx.recv().await {
                match repository.insert_reading(session, &reading).await {
                    Ok(()) => {
                        worker_stats.written.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        worker_stats.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(session = %session, error = %e, "failed to persist reading");
                    }
                }
            }
            debug!(session = %session, "persistence worker finished");
        });

        (Self { tx, session, stats }, worker)
    }

    /// Session being written.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<PersistenceStats> {
        Arc::clone(&self.stats)
    }

    /// Enqueue a reading without waiting. Returns false if it was dropped.
    pub fn submit(&self, reading: &Reading) -> bool {
        match self.tx.try_send(reading.clone()) {
            Ok(()) => true,
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "worker stopped",
                };
                warn!(session = %self.session, reason, "dropping reading for persistence");
                false
            }
        }
    }
}

impl ReadingSink for PersistenceQueue {
    fn on_reading(&mut self, reading: &Reading) {
        // Status frames (warm-up, zero, end of dump) are not stored.
        if reading.kind.is_measurement() {
            self.submit(reading);
        }
    }
}

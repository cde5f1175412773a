//! Durable single-key store for the emergency recovery snapshot.
//!
//! SQLite access runs on one dedicated worker thread; callers hand it
//! closures over a channel and await the result through a oneshot. Exactly
//! one record exists at a time — every write replaces the previous value.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::oneshot;

mod migrations;

use crate::models::EmergencyRecord;
use migrations::run_migrations;

/// The one fixed key recovery snapshots live under.
const EMERGENCY_KEY: &str = "emergency_tracking_state";

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

#[derive(Clone)]
pub struct EmergencyStore {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
}

impl EmergencyStore {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory {}", parent.display()))?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("fieldtrack-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(
                            anyhow::Error::new(err).context("failed to open SQLite store")
                        ));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Emergency store initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    /// Serializes and writes the snapshot, replacing any previous one.
    pub async fn write(&self, record: &EmergencyRecord) -> Result<()> {
        let value =
            serde_json::to_string(record).context("failed to serialize emergency record")?;
        let updated_at = Utc::now().to_rfc3339();

        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO emergency_state (key, value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![EMERGENCY_KEY, value, updated_at],
            )
            .with_context(|| "failed to write emergency record")?;
            Ok(())
        })
        .await
    }

    /// Reads the snapshot. Missing *and* malformed values both come back as
    /// `None` — a corrupt row must never wedge recovery.
    pub async fn read(&self) -> Result<Option<EmergencyRecord>> {
        let value: Option<String> = self
            .execute(move |conn| {
                conn.query_row(
                    "SELECT value FROM emergency_state WHERE key = ?1",
                    params![EMERGENCY_KEY],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| "failed to read emergency record")
            })
            .await?;

        let Some(raw) = value else {
            return Ok(None);
        };

        match serde_json::from_str::<EmergencyRecord>(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                warn!("Discarding malformed emergency record: {err}");
                Ok(None)
            }
        }
    }

    /// Deletes the snapshot. Succeeds when none exists.
    pub async fn clear(&self) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM emergency_state WHERE key = ?1",
                params![EMERGENCY_KEY],
            )
            .with_context(|| "failed to clear emergency record")?;
            Ok(())
        })
        .await
    }
}

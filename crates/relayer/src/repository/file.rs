use super::{BlockRepository, EventRepository, Snapshot, StoreState};
use crate::error::RepositoryError;
use crate::event::{Event, EventId, EventStatus};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Single-file JSON snapshot store.
///
/// Every write rewrites the whole snapshot to `<path>.tmp`, fsyncs it, renames it
/// over `path` and fsyncs the directory, so a crash or power loss leaves either the
/// old or the new state on disk. The in-memory state only changes after that
/// sequence succeeds.
///
/// Each mutation costs a full serialization plus two fsyncs, growing linearly with
/// the number of stored events (delivered ones included). Suited to a single relayer
/// with a modest backlog; a larger deployment should put a database behind
/// [EventRepository] instead.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    /// Open `path`, starting empty if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => StoreState::from(serde_json::from_slice::<Snapshot>(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::info!(path = %path.display(), "opened store");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Apply `f` to a copy of the state, persist it, then publish it.
    async fn mutate<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<R, RepositoryError>,
    ) -> Result<R, RepositoryError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn persist(&self, state: &StoreState) -> Result<(), RepositoryError> {
        let bytes = serde_json::to_vec(&Snapshot::from(state))?;
        let tmp = tmp_path(&self.path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        sync_parent(&self.path).await?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf().into_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Make the rename itself durable.
#[cfg(unix)]
async fn sync_parent(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl EventRepository for FileStore {
    async fn save(&self, event: Event) -> Result<(), RepositoryError> {
        self.mutate(|s| s.save(event)).await
    }

    async fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        attempts: u32,
        last_error: Option<String>,
        dest_tx_hash: Option<B256>,
    ) -> Result<(), RepositoryError> {
        self.mutate(|s| s.update_status(id, status, attempts, last_error, dest_tx_hash))
            .await
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>, RepositoryError> {
        Ok(self.state.lock().await.find_by_status(status))
    }

    async fn find_by_address(&self, address: Address) -> Result<Vec<Event>, RepositoryError> {
        Ok(self.state.lock().await.find_by_address(address))
    }

    async fn claim(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        self.mutate(|s| s.claim(id)).await
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        Ok(self.state.lock().await.find_by_id(id))
    }
}

#[async_trait]
impl BlockRepository for FileStore {
    async fn latest_block(&self) -> Result<Option<u64>, RepositoryError> {
        Ok(self.state.lock().await.latest_block())
    }

    async fn save_latest_block(&self, block: u64) -> Result<(), RepositoryError> {
        self.mutate(|s| s.save_latest_block(block)).await
    }
}

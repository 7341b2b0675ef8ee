use super::{BlockRepository, EventRepository, StoreState};
use crate::error::RepositoryError;
use crate::event::{Event, EventId, EventStatus};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// In-memory store. State is lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn save(&self, event: Event) -> Result<(), RepositoryError> {
        self.state.lock().await.save(event)
    }

    async fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        attempts: u32,
        last_error: Option<String>,
        dest_tx_hash: Option<B256>,
    ) -> Result<(), RepositoryError> {
        self.state
            .lock()
            .await
            .update_status(id, status, attempts, last_error, dest_tx_hash)
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>, RepositoryError> {
        Ok(self.state.lock().await.find_by_status(status))
    }

    async fn find_by_address(&self, address: Address) -> Result<Vec<Event>, RepositoryError> {
        Ok(self.state.lock().await.find_by_address(address))
    }

    async fn claim(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        self.state.lock().await.claim(id)
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        Ok(self.state.lock().await.find_by_id(id))
    }
}

#[async_trait]
impl BlockRepository for MemoryStore {
    async fn latest_block(&self) -> Result<Option<u64>, RepositoryError> {
        Ok(self.state.lock().await.latest_block())
    }

    async fn save_latest_block(&self, block: u64) -> Result<(), RepositoryError> {
        self.state.lock().await.save_latest_block(block)
    }
}

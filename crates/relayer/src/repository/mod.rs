//! Event and block-cursor repositories.
//!
//! The event repository is the queue between the indexer and the processor:
//! statuses only move forward, `claim` is atomic, and `done` always carries a
//! destination transaction hash. Two stores implement both traits:
//! [MemoryStore] and the single-file JSON snapshot [FileStore].

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::RepositoryError;
use crate::event::{Event, EventId, EventStatus};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Insert a new record. Rejects an identifier that already exists.
    async fn save(&self, event: Event) -> Result<(), RepositoryError>;

    /// Move `id` to `status`. Rejects backward transitions and `done` without a tx hash.
    async fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        attempts: u32,
        last_error: Option<String>,
        dest_tx_hash: Option<B256>,
    ) -> Result<(), RepositoryError>;

    /// Records with `status`, in ingestion order (block, log index).
    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>, RepositoryError>;

    /// Records whose message sender, owner or recipient is `address`, any status.
    async fn find_by_address(&self, address: Address) -> Result<Vec<Event>, RepositoryError>;

    /// Atomically move a `new` or `retriable-failure` record to `processing`
    /// and bump its attempt count. `None` if it was not claimable.
    async fn claim(&self, id: EventId) -> Result<Option<Event>, RepositoryError>;

    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>, RepositoryError>;
}

#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Highest fully indexed source block, if any.
    async fn latest_block(&self) -> Result<Option<u64>, RepositoryError>;

    /// Advance the cursor. Rejects a value below the current one.
    async fn save_latest_block(&self, block: u64) -> Result<(), RepositoryError>;
}

/// Shared state and rules behind both stores.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    latest_block: Option<u64>,
    events: BTreeMap<EventId, Event>,
}

/// On-disk form of [StoreState].
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Snapshot {
    latest_block: Option<u64>,
    events: Vec<Event>,
}

impl From<Snapshot> for StoreState {
    fn from(s: Snapshot) -> Self {
        Self {
            latest_block: s.latest_block,
            events: s.events.into_iter().map(|e| (e.id, e)).collect(),
        }
    }
}

impl From<&StoreState> for Snapshot {
    fn from(s: &StoreState) -> Self {
        Self {
            latest_block: s.latest_block,
            events: s.events.values().cloned().collect(),
        }
    }
}

impl StoreState {
    pub(crate) fn save(&mut self, event: Event) -> Result<(), RepositoryError> {
        if self.events.contains_key(&event.id) {
            return Err(RepositoryError::Duplicate(event.id));
        }
        self.events.insert(event.id, event);
        Ok(())
    }

    pub(crate) fn update_status(
        &mut self,
        id: EventId,
        status: EventStatus,
        attempts: u32,
        last_error: Option<String>,
        dest_tx_hash: Option<B256>,
    ) -> Result<(), RepositoryError> {
        let event = self
            .events
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        if !event.status.can_transition_to(status) {
            return Err(RepositoryError::InvalidTransition {
                id,
                from: event.status,
                to: status,
            });
        }
        if status == EventStatus::Done && dest_tx_hash.is_none() {
            return Err(RepositoryError::MissingDestTxHash(id));
        }
        event.status = status;
        event.attempts = attempts;
        event.last_error = last_error;
        if dest_tx_hash.is_some() {
            event.dest_tx_hash = dest_tx_hash;
        }
        Ok(())
    }

    pub(crate) fn claim(&mut self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        let event = self
            .events
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound(id))?;
        if !event.status.is_claimable() {
            return Ok(None);
        }
        event.status = EventStatus::Processing;
        event.attempts = event.attempts.saturating_add(1);
        Ok(Some(event.clone()))
    }

    pub(crate) fn find_by_status(&self, status: EventStatus) -> Vec<Event> {
        self.collect(|e| e.status == status)
    }

    pub(crate) fn find_by_address(&self, address: Address) -> Vec<Event> {
        self.collect(|e| e.message.involves(&address))
    }

    pub(crate) fn find_by_id(&self, id: EventId) -> Option<Event> {
        self.events.get(&id).cloned()
    }

    pub(crate) fn latest_block(&self) -> Option<u64> {
        self.latest_block
    }

    pub(crate) fn save_latest_block(&mut self, block: u64) -> Result<(), RepositoryError> {
        if let Some(current) = self.latest_block {
            if block < current {
                return Err(RepositoryError::CursorRegression {
                    current,
                    requested: block,
                });
            }
        }
        self.latest_block = Some(block);
        Ok(())
    }

    fn collect(&self, pred: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut out: Vec<Event> = self.events.values().filter(|e| pred(e)).cloned().collect();
        out.sort_by_key(|e| (e.block_number, e.id.log_index, e.id.tx_hash));
        out
    }
}

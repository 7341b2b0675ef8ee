//! Confirmation gate: hold a delivery until the destination has synced enough source blocks.
//!
//! Eligibility is decided by a [Strategy]; [ConfirmationDepth] requires
//! `synced >= block_number + K`.

use crate::backoff::sleep_or_cancel;
use crate::destination::{HeaderSyncReader, SyncedHeader};
use crate::error::ProcessError;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Defines when a source block is safe to act on given the synced source height.
pub trait Strategy: Send + Sync {
    /// Minimum synced height for an event at `block_number`.
    fn required_height(&self, block_number: u64) -> u64;

    fn is_eligible(&self, block_number: u64, synced: u64) -> bool {
        synced >= self.required_height(block_number)
    }
}

/// Confirmation-depth strategy: eligible when `synced >= block_number + K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationDepth(pub u64);

impl Strategy for ConfirmationDepth {
    fn required_height(&self, block_number: u64) -> u64 {
        block_number.saturating_add(self.0)
    }
}

/// Polls a [HeaderSyncReader] until a [Strategy] is satisfied, a timeout passes, or cancel fires.
pub struct ConfirmationGate {
    reader: Arc<dyn HeaderSyncReader>,
    strategy: Box<dyn Strategy>,
    poll_interval: Duration,
    timeout: Duration,
}

impl ConfirmationGate {
    pub fn new(
        reader: Arc<dyn HeaderSyncReader>,
        strategy: impl Strategy + 'static,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            reader,
            strategy: Box::new(strategy),
            poll_interval,
            timeout,
        }
    }

    /// Wait until the synced header is eligible for `block_number` and return it.
    ///
    /// Returns [ProcessError::NotSynced] after the timeout and
    /// [ProcessError::Cancelled] on cancel. Transient read errors keep polling.
    pub async fn wait(
        &self,
        block_number: u64,
        cancel: &CancellationToken,
    ) -> Result<SyncedHeader, ProcessError> {
        let required = self.strategy.required_height(block_number);
        // No deadline when the timeout does not fit the clock.
        let deadline = Instant::now().checked_add(self.timeout);
        let mut last_seen = None;
        loop {
            match self.reader.latest_synced_header().await {
                Ok(Some(header)) => {
                    last_seen = Some(header.number);
                    if self.strategy.is_eligible(block_number, header.number) {
                        return Ok(header);
                    }
                    tracing::debug!(block = block_number, required, synced = header.number, "waiting for header sync");
                }
                Ok(None) => {
                    tracing::debug!(block = block_number, required, "no synced header yet");
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(reason = %e, "header sync read failed, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Err(ProcessError::NotSynced {
                    required,
                    synced: last_seen,
                });
            }
            let nap = deadline.map_or(self.poll_interval, |d| self.poll_interval.min(d - now));
            if !sleep_or_cancel(nap, cancel).await {
                return Err(ProcessError::Cancelled);
            }
        }
    }
}

//! Processor: delivers ingested events to the destination bridge.
//!
//! [Processor::process_event] runs one attempt for one event: claim, validate,
//! idempotence check, confirmation gate, proof, submission, receipt. The
//! outcome is written back as a forward status transition. [ProcessorPool]
//! drains the repository with a bounded number of concurrent attempts.

use crate::abi::hash_message;
use crate::backoff::{sleep_or_cancel, Backoff};
use crate::config::{RelayerConfig, RetryConfig};
use crate::confirmation::{ConfirmationDepth, ConfirmationGate};
use crate::destination::{DestinationBridge, HeaderSyncReader};
use crate::error::{ProcessError, RepositoryError, ServiceError, SubmitError};
use crate::event::{Event, EventId, EventStatus};
use crate::proof::ProofBuilder;
use crate::repository::EventRepository;
use crate::service::ErrorReporter;
use alloy::primitives::{B256, U256};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub confirmations: u64,
    pub poll_interval: Duration,
    pub header_sync_timeout: Duration,
    pub receipt_timeout: Duration,
    pub retry: RetryConfig,
    pub workers: usize,
}

impl From<&RelayerConfig> for ProcessorConfig {
    fn from(c: &RelayerConfig) -> Self {
        Self {
            confirmations: c.confirmations,
            poll_interval: c.poll_interval,
            header_sync_timeout: c.header_sync_timeout,
            receipt_timeout: c.receipt_timeout,
            retry: c.retry.clone(),
            workers: c.num_workers.max(1),
        }
    }
}

/// Result of one [Processor::process_event] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Marked `done` with this destination transaction.
    Delivered(B256),
    /// Marked `retriable-failure` after this many attempts.
    Retriable { attempts: u32 },
    /// Marked `failed`.
    Failed,
    /// Not claimable (already in flight or terminal).
    Skipped,
    /// Cancelled mid-attempt; left in `processing`.
    Interrupted,
}

pub struct Processor {
    events: Arc<dyn EventRepository>,
    bridge: Arc<dyn DestinationBridge>,
    prover: Arc<dyn ProofBuilder>,
    gate: ConfirmationGate,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new(
        events: Arc<dyn EventRepository>,
        header_sync: Arc<dyn HeaderSyncReader>,
        bridge: Arc<dyn DestinationBridge>,
        prover: Arc<dyn ProofBuilder>,
        config: ProcessorConfig,
    ) -> Self {
        let gate = ConfirmationGate::new(
            header_sync,
            ConfirmationDepth(config.confirmations),
            config.poll_interval,
            config.header_sync_timeout,
        );
        Self {
            events,
            bridge,
            prover,
            gate,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run one delivery attempt for `event` and record the outcome.
    ///
    /// Only repository failures are returned as errors; everything else ends
    /// up in the event's status trail.
    pub async fn process_event(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<Outcome, RepositoryError> {
        let id = event.id;
        let Some(event) = self.events.claim(id).await? else {
            tracing::debug!(%id, "event not claimable, skipping");
            return Ok(Outcome::Skipped);
        };
        tracing::info!(%id, block = event.block_number, attempt = event.attempts, "processing event");

        match self.attempt(&event, cancel).await {
            Ok(tx) => {
                self.events
                    .update_status(id, EventStatus::Done, event.attempts, None, Some(tx))
                    .await?;
                tracing::info!(%id, tx = %tx, "event delivered");
                Ok(Outcome::Delivered(tx))
            }
            Err(ProcessError::Cancelled) => {
                tracing::info!(%id, "attempt interrupted");
                Ok(Outcome::Interrupted)
            }
            Err(e) if e.is_retriable() && event.attempts < self.config.retry.max_attempts => {
                tracing::warn!(%id, reason = %e, attempt = event.attempts, "attempt failed, will retry");
                self.events
                    .update_status(
                        id,
                        EventStatus::RetriableFailure,
                        event.attempts,
                        Some(e.to_string()),
                        None,
                    )
                    .await?;
                Ok(Outcome::Retriable {
                    attempts: event.attempts,
                })
            }
            Err(e) => {
                tracing::error!(%id, reason = %e, attempt = event.attempts, "event failed");
                self.events
                    .update_status(id, EventStatus::Failed, event.attempts, Some(e.to_string()), None)
                    .await?;
                Ok(Outcome::Failed)
            }
        }
    }

    async fn attempt(&self, event: &Event, cancel: &CancellationToken) -> Result<B256, ProcessError> {
        self.validate(event).await?;

        if let Some(tx) = cancellable(cancel, self.already_delivered(event.signal)).await?? {
            tracing::info!(id = %event.id, tx = %tx, "message already delivered");
            return Ok(tx);
        }

        let synced = self.gate.wait(event.block_number, cancel).await?;
        let proof = cancellable(
            cancel,
            self.prover.build_proof(event.id.tx_hash, event.signal, &synced),
        )
        .await??;

        let tx = match cancellable(cancel, self.bridge.process_message(&event.message, &proof)).await? {
            Ok(tx) => tx,
            Err(SubmitError::AlreadyProcessed) => {
                tracing::info!(id = %event.id, "destination reports message already processed");
                return self.delivery_tx(event.signal).await;
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(id = %event.id, tx = %tx, anchor = synced.number, "delivery submitted");
        self.wait_for_receipt(event, tx, cancel).await
    }

    async fn validate(&self, event: &Event) -> Result<(), ProcessError> {
        let dest = event.message.dest_chain_id;
        if dest == U256::ZERO {
            return Err(ProcessError::Invalid("zero destination chain id".into()));
        }
        let chain_id = self.bridge.chain_id().await?;
        if dest != U256::from(chain_id) {
            return Err(ProcessError::Invalid(format!(
                "destination chain {} does not match {}",
                dest, chain_id
            )));
        }
        if hash_message(&event.message) != event.signal {
            return Err(ProcessError::Invalid("signal does not match message hash".into()));
        }
        Ok(())
    }

    async fn already_delivered(&self, signal: B256) -> Result<Option<B256>, ProcessError> {
        let status = self.bridge.message_status(signal).await?;
        if !status.is_delivered() {
            return Ok(None);
        }
        self.delivery_tx(signal).await.map(Some)
    }

    async fn delivery_tx(&self, signal: B256) -> Result<B256, ProcessError> {
        self.bridge
            .find_delivery(signal)
            .await?
            .ok_or(ProcessError::DeliveryNotFound)
    }

    async fn wait_for_receipt(
        &self,
        event: &Event,
        tx: B256,
        cancel: &CancellationToken,
    ) -> Result<B256, ProcessError> {
        let deadline = Instant::now().checked_add(self.config.receipt_timeout);
        loop {
            match self.bridge.receipt(tx).await {
                Ok(Some(receipt)) if receipt.status => return Ok(tx),
                Ok(Some(_)) => {
                    tracing::warn!(id = %event.id, tx = %tx, "delivery reverted, re-checking message status");
                    return match self.already_delivered(event.signal).await? {
                        Some(found) => Ok(found),
                        None => Err(ProcessError::Reverted(tx)),
                    };
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!(tx = %tx, reason = %e, "receipt lookup failed");
                }
                Err(e) => return Err(e.into()),
            }
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Err(ProcessError::NotIncluded(tx));
            }
            let nap = deadline.map_or(self.config.poll_interval, |d| self.config.poll_interval.min(d - now));
            if !sleep_or_cancel(nap, cancel).await {
                return Err(ProcessError::Cancelled);
            }
        }
    }
}

async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, ProcessError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProcessError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Removes an id from the in-flight set when the attempt ends, panics included.
struct InFlight {
    set: Arc<Mutex<HashSet<EventId>>>,
    id: EventId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

/// Worker pool: polls for `new` and due `retriable-failure` events and runs
/// at most `workers` attempts at once.
pub struct ProcessorPool {
    processor: Arc<Processor>,
    events: Arc<dyn EventRepository>,
    errors: ErrorReporter,
    retry_backoff: Backoff,
}

impl ProcessorPool {
    pub fn new(processor: Arc<Processor>, events: Arc<dyn EventRepository>, errors: ErrorReporter) -> Self {
        let retry_backoff = Backoff::from(&processor.config().retry);
        Self {
            processor,
            events,
            errors,
            retry_backoff,
        }
    }

    /// Move events left in `processing` by a previous run back into the retry path.
    pub async fn recover(&self) -> Result<usize, RepositoryError> {
        let stuck = self.events.find_by_status(EventStatus::Processing).await?;
        let max_attempts = self.processor.config().retry.max_attempts;
        for event in &stuck {
            let status = if event.attempts >= max_attempts {
                EventStatus::Failed
            } else {
                EventStatus::RetriableFailure
            };
            self.events
                .update_status(event.id, status, event.attempts, Some("interrupted".into()), None)
                .await?;
            tracing::info!(id = %event.id, %status, "recovered interrupted event");
        }
        Ok(stuck.len())
    }

    /// Run until `cancel` fires, then wait for in-flight attempts to return.
    pub async fn run(&self, cancel: CancellationToken) {
        if let Err(e) = self.recover().await {
            tracing::error!(reason = %e, "recovery sweep failed");
            self.errors.report(ServiceError::ProcessorRepository(e));
        }

        let workers = self.processor.config().workers;
        let poll_interval = self.processor.config().poll_interval;
        let in_flight: Arc<Mutex<HashSet<EventId>>> = Arc::default();
        let mut not_before: HashMap<EventId, Instant> = HashMap::new();
        let mut tasks: JoinSet<(EventId, Result<Outcome, RepositoryError>)> = JoinSet::new();

        tracing::info!(workers, "processor pool started");
        loop {
            if tasks.len() < workers {
                match self.due_events(&in_flight, &not_before).await {
                    Ok(due) => {
                        for event in due.into_iter().take(workers - tasks.len()) {
                            let guard = InFlight {
                                set: Arc::clone(&in_flight),
                                id: event.id,
                            };
                            in_flight
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(event.id);
                            let processor = Arc::clone(&self.processor);
                            let cancel = cancel.clone();
                            tasks.spawn(async move {
                                let _guard = guard;
                                let outcome = processor.process_event(&event, &cancel).await;
                                (event.id, outcome)
                            });
                        }
                    }
                    Err(e) => {
                        tracing::warn!(reason = %e, "failed to poll events");
                        self.errors.report(ServiceError::ProcessorRepository(e));
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    self.on_finished(done, &mut not_before);
                }
            }
        }

        tracing::info!(in_flight = tasks.len(), "processor pool stopping");
        while let Some(done) = tasks.join_next().await {
            self.on_finished(done, &mut not_before);
        }
        tracing::info!("processor pool stopped");
    }

    async fn due_events(
        &self,
        in_flight: &Mutex<HashSet<EventId>>,
        not_before: &HashMap<EventId, Instant>,
    ) -> Result<Vec<Event>, RepositoryError> {
        let mut due = self.events.find_by_status(EventStatus::New).await?;
        due.extend(self.events.find_by_status(EventStatus::RetriableFailure).await?);
        let now = Instant::now();
        let busy = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        due.retain(|e| !busy.contains(&e.id) && not_before.get(&e.id).map_or(true, |t| *t <= now));
        Ok(due)
    }

    fn on_finished(
        &self,
        done: Result<(EventId, Result<Outcome, RepositoryError>), tokio::task::JoinError>,
        not_before: &mut HashMap<EventId, Instant>,
    ) {
        match done {
            Ok((id, Ok(Outcome::Retriable { attempts }))) => {
                let delay = self.retry_backoff.delay_for(attempts.saturating_sub(1));
                tracing::debug!(%id, ?delay, "retry scheduled");
                not_before.insert(id, Instant::now() + delay);
            }
            Ok((id, Ok(_))) => {
                not_before.remove(&id);
            }
            Ok((id, Err(e))) => {
                tracing::error!(%id, reason = %e, "repository failure while processing event");
                self.errors.report(ServiceError::ProcessorRepository(e));
            }
            Err(e) => {
                tracing::error!(reason = %e, "processor task panicked");
                self.errors.report(ServiceError::TaskPanicked(e.to_string()));
            }
        }
    }
}

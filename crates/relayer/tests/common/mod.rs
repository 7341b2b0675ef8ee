//! Common test doubles for integration tests: a scripted source chain, header-sync
//! reader, destination bridge, proof builder, and a repository that records writes.

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use relayer::abi::{decode_message_sent, encode_message_sent};
use relayer::chain::HeadStream;
use relayer::config::RetryConfig;
use relayer::types::{AccountProof, Header, Log, LogFilter, Receipt, StorageProof};
use relayer::{
    BlockRepository, BridgeMessage, ChainClient, DestinationBridge, Event, EventId, EventRepository,
    EventStatus, HeaderSyncReader, MemoryStore, MessageStatus, Proof, ProofBuilder, ProofError,
    ProcessorConfig, RepositoryError, RpcError, StateProofClient, SubmitError, SyncedHeader,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const SRC_CHAIN: u64 = 1;
pub const DEST_CHAIN: u64 = 167;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("relayer=debug".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

pub fn bridge_address() -> Address {
    Address::repeat_byte(0xb1)
}

pub fn message(id: u64, sender: Address, to: Address) -> BridgeMessage {
    BridgeMessage {
        id: U256::from(id),
        sender,
        src_chain_id: U256::from(SRC_CHAIN),
        dest_chain_id: U256::from(DEST_CHAIN),
        owner: sender,
        to,
        refund_address: sender,
        deposit_value: U256::from(1_000_000u64),
        call_value: U256::ZERO,
        processing_fee: U256::from(1_000u64),
        gas_limit: U256::from(150_000u64),
        data: Bytes::new(),
        memo: format!("message {}", id),
    }
}

pub fn tx_hash(block: u64, log_index: u64) -> B256 {
    let mut b = [0u8; 32];
    b[0] = 0x7a;
    b[8..16].copy_from_slice(&block.to_be_bytes());
    b[24..].copy_from_slice(&log_index.to_be_bytes());
    B256::from(b)
}

pub fn sent_log(message: &BridgeMessage, block: u64, log_index: u64) -> Log {
    encode_message_sent(bridge_address(), message, block, tx_hash(block, log_index), log_index)
}

/// The event the indexer would create for `message` at `block`.
pub fn event_at(message: &BridgeMessage, block: u64, log_index: u64) -> Event {
    decode_message_sent(&sent_log(message, block, log_index), SRC_CHAIN).unwrap()
}

/// Hash of the fake source header at `number`.
pub fn header_hash(number: u64) -> B256 {
    let mut b = [0u8; 32];
    b[0] = 0xee;
    b[24..].copy_from_slice(&number.to_be_bytes());
    B256::from(b)
}

fn number_of(hash: B256) -> Option<u64> {
    let b = hash.as_slice();
    if b[0] != 0xee {
        return None;
    }
    let mut n = [0u8; 8];
    n.copy_from_slice(&b[24..]);
    Some(u64::from_be_bytes(n))
}

pub fn header(number: u64) -> Header {
    Header {
        hash: header_hash(number),
        parent_hash: header_hash(number.saturating_sub(1)),
        ommers_hash: B256::repeat_byte(0x1d),
        beneficiary: Address::ZERO,
        state_root: B256::repeat_byte(0x51),
        transactions_root: B256::repeat_byte(0x52),
        receipts_root: B256::repeat_byte(0x53),
        logs_bloom: Bytes::from(vec![0u8; 256]),
        difficulty: U256::ZERO,
        number,
        gas_limit: 30_000_000,
        gas_used: 21_000,
        timestamp: 1_700_000_000 + number * 12,
        extra_data: Bytes::new(),
        mix_hash: B256::ZERO,
        nonce: 0,
        base_fee_per_gas: Some(U256::from(7u64)),
    }
}

pub fn processor_config() -> ProcessorConfig {
    ProcessorConfig {
        confirmations: 5,
        poll_interval: Duration::from_secs(1),
        header_sync_timeout: Duration::from_secs(60),
        receipt_timeout: Duration::from_secs(30),
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_secs: 5,
            max_backoff_secs: 60,
        },
        workers: 4,
    }
}

/// Poll `check` until it returns true or ten virtual minutes pass.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(600);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ---------------------------------------------------------------------------
// Source chain
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ChainState {
    tip: u64,
    logs: Vec<Log>,
    receipts: HashMap<B256, Receipt>,
    storage_value: U256,
}

/// Source chain with a settable tip. Never offers a head subscription, so the indexer polls.
pub struct FakeChain {
    pub chain_id: u64,
    state: Mutex<ChainState>,
    /// Inclusive block ranges requested via `logs`.
    pub requested: Mutex<Vec<(u64, u64)>>,
    /// Fail this many upcoming calls to `logs` / `transaction_receipt` with a timeout.
    pub fail_logs: AtomicUsize,
    pub fail_receipts: AtomicUsize,
    /// Head streams handed out by successive `subscribe_heads` calls. Once empty the chain only polls.
    head_streams: Mutex<VecDeque<Vec<u64>>>,
    pub subscriptions: AtomicUsize,
}

impl FakeChain {
    pub fn new(tip: u64) -> Self {
        Self {
            chain_id: SRC_CHAIN,
            state: Mutex::new(ChainState {
                tip,
                storage_value: U256::from(1u64),
                ..Default::default()
            }),
            requested: Mutex::new(Vec::new()),
            fail_logs: AtomicUsize::new(0),
            fail_receipts: AtomicUsize::new(0),
            head_streams: Mutex::new(VecDeque::new()),
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Queue a subscription that yields `heads` and then ends. The polled tip is left untouched.
    pub fn push_head_stream(&self, heads: Vec<u64>) {
        self.head_streams.lock().unwrap().push_back(heads);
    }

    pub fn set_tip(&self, tip: u64) {
        self.state.lock().unwrap().tip = tip;
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn insert_receipt(&self, receipt: Receipt) {
        self.state
            .lock()
            .unwrap()
            .receipts
            .insert(receipt.tx_hash, receipt);
    }

    pub fn set_storage_value(&self, value: U256) {
        self.state.lock().unwrap().storage_value = value;
    }

    pub fn requested(&self) -> Vec<(u64, u64)> {
        self.requested.lock().unwrap().clone()
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(self.chain_id)
    }

    async fn header_by_number(&self, number: Option<u64>) -> Result<Option<Header>, RpcError> {
        let tip = self.state.lock().unwrap().tip;
        let n = number.unwrap_or(tip);
        Ok((n <= tip).then(|| header(n)))
    }

    async fn header_by_hash(&self, hash: B256) -> Result<Option<Header>, RpcError> {
        let tip = self.state.lock().unwrap().tip;
        Ok(number_of(hash).filter(|n| *n <= tip).map(header))
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, RpcError> {
        let from = filter.from_block.unwrap_or(0);
        let to = filter.to_block.unwrap_or(u64::MAX);
        self.requested.lock().unwrap().push((from, to));
        if take_failure(&self.fail_logs) {
            return Err(RpcError::Timeout);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .logs
            .iter()
            .filter(|l| l.block_number >= from && l.block_number <= to && filter.matches(l))
            .cloned()
            .collect())
    }

    async fn subscribe_heads(&self) -> Result<HeadStream, RpcError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        match self.head_streams.lock().unwrap().pop_front() {
            Some(heads) => Ok(stream::iter(heads.into_iter().map(Ok)).boxed()),
            None => Err(RpcError::Unsupported("fake chain polls".into())),
        }
    }
}

#[async_trait]
impl StateProofClient for FakeChain {
    async fn transaction_receipt(&self, hash: B256) -> Result<Option<Receipt>, RpcError> {
        if take_failure(&self.fail_receipts) {
            return Err(RpcError::Timeout);
        }
        Ok(self.state.lock().unwrap().receipts.get(&hash).cloned())
    }

    async fn storage_proof(&self, _address: Address, slot: B256, _block: u64) -> Result<AccountProof, RpcError> {
        let value = self.state.lock().unwrap().storage_value;
        Ok(AccountProof {
            account_proof: vec![Bytes::from(vec![0xf8; 64]), Bytes::from(vec![0xf9; 32])],
            storage_proof: vec![StorageProof {
                key: slot,
                value,
                proof: vec![Bytes::from(vec![0xe2; 33])],
            }],
        })
    }
}

// ---------------------------------------------------------------------------
// Header sync
// ---------------------------------------------------------------------------

/// Synced height that advances by `step` after every read.
pub struct FakeHeaderSync {
    synced: Mutex<Option<u64>>,
    step: u64,
    pub reads: AtomicUsize,
}

impl FakeHeaderSync {
    pub fn new(synced: Option<u64>, step: u64) -> Self {
        Self {
            synced: Mutex::new(synced),
            step,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, synced: u64) {
        *self.synced.lock().unwrap() = Some(synced);
    }

    pub fn current(&self) -> Option<u64> {
        *self.synced.lock().unwrap()
    }
}

#[async_trait]
impl HeaderSyncReader for FakeHeaderSync {
    async fn latest_synced_header(&self) -> Result<Option<SyncedHeader>, RpcError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut synced = self.synced.lock().unwrap();
        let current = *synced;
        if let Some(n) = current {
            *synced = Some(n + self.step);
        }
        Ok(current.map(|number| SyncedHeader {
            number,
            hash: header_hash(number),
        }))
    }
}

// ---------------------------------------------------------------------------
// Destination bridge
// ---------------------------------------------------------------------------

/// Scripted outcome of the next `process_message` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Transient,
    AlreadyProcessed,
    Rejected,
    /// Mined with status 0.
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub signal: B256,
    pub anchor: u64,
    pub tx: Option<B256>,
}

#[derive(Default)]
struct BridgeState {
    statuses: HashMap<B256, MessageStatus>,
    deliveries: HashMap<B256, B256>,
    receipts: HashMap<B256, Receipt>,
    script: VecDeque<Scripted>,
    submissions: Vec<Submission>,
    next_tx: u64,
}

pub struct FakeBridge {
    pub chain_id: u64,
    state: Mutex<BridgeState>,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self {
            chain_id: DEST_CHAIN,
            state: Mutex::new(BridgeState::default()),
        }
    }

    pub fn script(&self, outcomes: &[Scripted]) {
        self.state.lock().unwrap().script.extend(outcomes.iter().copied());
    }

    /// Record `signal` as delivered by `tx` (e.g. by another relayer).
    pub fn mark_delivered(&self, signal: B256, tx: B256) {
        let mut state = self.state.lock().unwrap();
        state.statuses.insert(signal, MessageStatus::Done);
        state.deliveries.insert(signal, tx);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn status(&self, signal: B256) -> MessageStatus {
        self.state
            .lock()
            .unwrap()
            .statuses
            .get(&signal)
            .copied()
            .unwrap_or(MessageStatus::New)
    }
}

fn dest_tx(n: u64) -> B256 {
    let mut b = [0u8; 32];
    b[0] = 0xd0;
    b[24..].copy_from_slice(&n.to_be_bytes());
    B256::from(b)
}

fn receipt(tx: B256, status: bool) -> Receipt {
    Receipt {
        tx_hash: tx,
        block_number: 1,
        block_hash: B256::repeat_byte(0xdd),
        status,
        logs: Vec::new(),
    }
}

#[async_trait]
impl DestinationBridge for FakeBridge {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(self.chain_id)
    }

    async fn message_status(&self, signal: B256) -> Result<MessageStatus, RpcError> {
        Ok(self.status(signal))
    }

    async fn find_delivery(&self, signal: B256) -> Result<Option<B256>, RpcError> {
        Ok(self.state.lock().unwrap().deliveries.get(&signal).copied())
    }

    async fn process_message(&self, message: &BridgeMessage, proof: &Proof) -> Result<B256, SubmitError> {
        let signal = relayer::abi::hash_message(message);
        let mut state = self.state.lock().unwrap();
        let scripted = state.script.pop_front();
        let mut record = Submission {
            signal,
            anchor: proof.anchor.number,
            tx: None,
        };
        let result = match scripted {
            None => {
                state.next_tx += 1;
                let tx = dest_tx(state.next_tx);
                state.statuses.insert(signal, MessageStatus::Done);
                state.deliveries.insert(signal, tx);
                state.receipts.insert(tx, receipt(tx, true));
                record.tx = Some(tx);
                Ok(tx)
            }
            Some(Scripted::Reverted) => {
                state.next_tx += 1;
                let tx = dest_tx(state.next_tx);
                state.receipts.insert(tx, receipt(tx, false));
                record.tx = Some(tx);
                Ok(tx)
            }
            Some(Scripted::Transient) => Err(SubmitError::Transient("request timed out".into())),
            Some(Scripted::Rejected) => Err(SubmitError::Rejected("B:signal not received".into())),
            Some(Scripted::AlreadyProcessed) => {
                let tx = dest_tx(9_999);
                state.statuses.insert(signal, MessageStatus::Done);
                state.deliveries.insert(signal, tx);
                Err(SubmitError::AlreadyProcessed)
            }
        };
        state.submissions.push(record);
        result
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<Receipt>, RpcError> {
        Ok(self.state.lock().unwrap().receipts.get(&tx_hash).cloned())
    }
}

// ---------------------------------------------------------------------------
// Proof builder
// ---------------------------------------------------------------------------

pub struct FakeProver {
    pub calls: Mutex<Vec<(B256, u64)>>,
    pub failures: Mutex<VecDeque<ProofError>>,
}

impl FakeProver {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn fail_next(&self, e: ProofError) {
        self.failures.lock().unwrap().push_back(e);
    }
}

#[async_trait]
impl ProofBuilder for FakeProver {
    async fn build_proof(&self, tx_hash: B256, _signal: B256, anchor: &SyncedHeader) -> Result<Proof, ProofError> {
        self.calls.lock().unwrap().push((tx_hash, anchor.number));
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(Proof {
            anchor: *anchor,
            encoded: Bytes::from(vec![0x01, 0x02]),
        })
    }
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

/// [MemoryStore] that records status transitions and cursor writes, and can fail cursor writes.
#[derive(Default)]
pub struct RecordingRepository {
    inner: MemoryStore,
    /// Every status an event entered, in order.
    pub transitions: Mutex<Vec<(EventId, EventStatus)>>,
    /// (cursor, blocks of all saved events) at each successful cursor write.
    pub cursor_writes: Mutex<Vec<(u64, Vec<u64>)>>,
    /// Fail this many upcoming cursor writes.
    pub fail_cursor_writes: AtomicUsize,
    pub duplicate_saves: AtomicUsize,
}

impl RecordingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transitions_of(&self, id: EventId) -> Vec<EventStatus> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == id)
            .map(|(_, s)| *s)
            .collect()
    }

    pub async fn all_events(&self) -> Vec<Event> {
        let mut all = Vec::new();
        for status in [
            EventStatus::New,
            EventStatus::Processing,
            EventStatus::Done,
            EventStatus::RetriableFailure,
            EventStatus::Failed,
        ] {
            all.extend(self.inner.find_by_status(status).await.unwrap());
        }
        all
    }
}

#[async_trait]
impl EventRepository for RecordingRepository {
    async fn save(&self, event: Event) -> Result<(), RepositoryError> {
        let id = event.id;
        let res = self.inner.save(event).await;
        match &res {
            Ok(()) => self.transitions.lock().unwrap().push((id, EventStatus::New)),
            Err(RepositoryError::Duplicate(_)) => {
                self.duplicate_saves.fetch_add(1, Ordering::SeqCst);
            }
            Err(_) => {}
        }
        res
    }

    async fn update_status(
        &self,
        id: EventId,
        status: EventStatus,
        attempts: u32,
        last_error: Option<String>,
        dest_tx_hash: Option<B256>,
    ) -> Result<(), RepositoryError> {
        self.inner
            .update_status(id, status, attempts, last_error, dest_tx_hash)
            .await?;
        self.transitions.lock().unwrap().push((id, status));
        Ok(())
    }

    async fn find_by_status(&self, status: EventStatus) -> Result<Vec<Event>, RepositoryError> {
        self.inner.find_by_status(status).await
    }

    async fn find_by_address(&self, address: Address) -> Result<Vec<Event>, RepositoryError> {
        self.inner.find_by_address(address).await
    }

    async fn claim(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        let claimed = self.inner.claim(id).await?;
        if claimed.is_some() {
            self.transitions.lock().unwrap().push((id, EventStatus::Processing));
        }
        Ok(claimed)
    }

    async fn find_by_id(&self, id: EventId) -> Result<Option<Event>, RepositoryError> {
        self.inner.find_by_id(id).await
    }
}

#[async_trait]
impl BlockRepository for RecordingRepository {
    async fn latest_block(&self) -> Result<Option<u64>, RepositoryError> {
        self.inner.latest_block().await
    }

    async fn save_latest_block(&self, block: u64) -> Result<(), RepositoryError> {
        if take_failure(&self.fail_cursor_writes) {
            return Err(RepositoryError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        self.inner.save_latest_block(block).await?;
        let blocks = self.all_events().await.iter().map(|e| e.block_number).collect();
        self.cursor_writes.lock().unwrap().push((block, blocks));
        Ok(())
    }
}

//! Integration tests: indexer batching, cursor discipline, dedup, and failure recovery
//! against a fake source chain that polls or serves scripted head subscriptions.

mod common;

use alloy::primitives::Address;
use common::{bridge_address, init_tracing, message, sent_log, wait_until, FakeChain, RecordingRepository};
use relayer::{
    BlockRepository, ErrorReporter, EventRepository, EventStatus, Indexer, IndexerConfig,
    ReconnectionConfig, ServiceError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn config(start_block: u64, batch: u64, workers: usize) -> IndexerConfig {
    IndexerConfig {
        bridge: bridge_address(),
        start_block,
        block_batch_size: batch,
        workers,
        ingest_confirmations: 0,
        poll_interval: Duration::from_secs(1),
        reconnection: ReconnectionConfig::default(),
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    errors: tokio::sync::mpsc::Receiver<ServiceError>,
}

impl Running {
    async fn stop(self) -> tokio::sync::mpsc::Receiver<ServiceError> {
        self.cancel.cancel();
        self.task.await.unwrap();
        self.errors
    }
}

fn spawn_indexer(chain: Arc<FakeChain>, repo: Arc<RecordingRepository>, config: IndexerConfig) -> Running {
    let (reporter, errors) = ErrorReporter::channel(8);
    let indexer = Indexer::new(chain, repo.clone(), repo, config, reporter);
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { indexer.run(run_cancel).await });
    Running { cancel, task, errors }
}

async fn cursor_reaches(repo: &RecordingRepository, block: u64) -> bool {
    let repo_ref = repo;
    wait_until(|| async move { repo_ref.latest_block().await.unwrap() == Some(block) }).await
}

#[tokio::test(start_paused = true)]
async fn batch_with_one_event_records_it_and_advances_cursor() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(105));
    let m = message(1, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    chain.push_log(sent_log(&m, 102, 0));
    let repo = Arc::new(RecordingRepository::new());

    let running = spawn_indexer(chain.clone(), repo.clone(), config(100, 100, 1));
    assert!(cursor_reaches(&repo, 105).await);
    running.stop().await;

    let events = repo.all_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].block_number, 102);
    assert_eq!(events[0].status, EventStatus::New);
    assert_eq!(events[0].message, m);
    assert_eq!(chain.requested()[0], (100, 105));
}

#[tokio::test(start_paused = true)]
async fn concurrent_batches_commit_in_order() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(120));
    for (i, block) in [101u64, 104, 108, 115, 120].iter().enumerate() {
        let m = message(i as u64, Address::repeat_byte(0x01), Address::repeat_byte(0x02));
        chain.push_log(sent_log(&m, *block, 0));
    }
    let repo = Arc::new(RecordingRepository::new());

    let running = spawn_indexer(chain.clone(), repo.clone(), config(100, 3, 4));
    assert!(cursor_reaches(&repo, 120).await);
    running.stop().await;

    let writes = repo.cursor_writes.lock().unwrap().clone();
    let cursors: Vec<u64> = writes.iter().map(|(c, _)| *c).collect();
    assert!(cursors.windows(2).all(|w| w[0] < w[1]), "cursor writes not increasing: {:?}", cursors);
    assert_eq!(cursors.first(), Some(&102));
    // Every event at or below a written cursor was already saved.
    for (cursor, saved) in &writes {
        for block in [101u64, 104, 108, 115, 120] {
            if block <= *cursor {
                assert!(saved.contains(&block), "cursor {} ahead of event at {}", cursor, block);
            }
        }
    }
    assert_eq!(repo.all_events().await.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn duplicate_log_delivery_is_deduplicated() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(105));
    let m = message(1, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    chain.push_log(sent_log(&m, 102, 0));
    chain.push_log(sent_log(&m, 102, 0));
    let repo = Arc::new(RecordingRepository::new());

    let running = spawn_indexer(chain, repo.clone(), config(100, 100, 1));
    assert!(cursor_reaches(&repo, 105).await);
    running.stop().await;

    assert_eq!(repo.all_events().await.len(), 1);
    assert_eq!(repo.duplicate_saves.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_cursor_write_replays_batch_without_duplicates() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(105));
    let m = message(1, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    chain.push_log(sent_log(&m, 102, 0));
    let repo = Arc::new(RecordingRepository::new());
    repo.fail_cursor_writes.store(1, Ordering::SeqCst);

    let running = spawn_indexer(chain.clone(), repo.clone(), config(100, 100, 1));
    assert!(cursor_reaches(&repo, 105).await);
    let mut errors = running.stop().await;

    // Events were written before the failed cursor write, and the replay hit the dedup path.
    assert_eq!(repo.all_events().await.len(), 1);
    assert_eq!(repo.duplicate_saves.load(Ordering::SeqCst), 1);
    assert_eq!(chain.requested().iter().filter(|r| **r == (100, 105)).count(), 2);
    assert!(matches!(errors.try_recv(), Ok(ServiceError::IndexerRepository(_))));
}

#[tokio::test(start_paused = true)]
async fn transient_log_errors_are_retried() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(105));
    let m = message(1, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    chain.push_log(sent_log(&m, 103, 2));
    chain.fail_logs.store(2, Ordering::SeqCst);
    let repo = Arc::new(RecordingRepository::new());

    let running = spawn_indexer(chain.clone(), repo.clone(), config(100, 100, 1));
    assert!(cursor_reaches(&repo, 105).await);
    let mut errors = running.stop().await;

    assert_eq!(repo.all_events().await.len(), 1);
    assert_eq!(chain.requested().len(), 3);
    assert!(errors.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn removed_and_foreign_logs_are_skipped() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(105));
    let m = message(1, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    let mut removed = sent_log(&m, 101, 0);
    removed.removed = true;
    chain.push_log(removed);
    let mut foreign = sent_log(&m, 102, 0);
    foreign.address = Address::repeat_byte(0x99);
    chain.push_log(foreign);
    let mut garbled = sent_log(&m, 103, 0);
    garbled.data = alloy::primitives::Bytes::from(vec![0u8; 7]);
    chain.push_log(garbled);
    chain.push_log(sent_log(&m, 104, 1));
    let repo = Arc::new(RecordingRepository::new());

    let running = spawn_indexer(chain, repo.clone(), config(100, 100, 1));
    assert!(cursor_reaches(&repo, 105).await);
    running.stop().await;

    let events = repo.all_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].block_number, 104);
}

#[tokio::test(start_paused = true)]
async fn resumes_from_persisted_cursor_and_follows_new_blocks() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(105));
    let repo = Arc::new(RecordingRepository::new());
    repo.save_latest_block(103).await.unwrap();

    let running = spawn_indexer(chain.clone(), repo.clone(), config(0, 100, 1));
    assert!(cursor_reaches(&repo, 105).await);
    assert_eq!(chain.requested()[0], (104, 105));

    let m = message(7, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    chain.push_log(sent_log(&m, 108, 0));
    chain.set_tip(110);
    assert!(cursor_reaches(&repo, 110).await);
    running.stop().await;

    assert!(chain.requested().contains(&(106, 110)));
    let events = repo.find_by_status(EventStatus::New).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].block_number, 108);
}

#[tokio::test(start_paused = true)]
async fn ended_head_stream_is_resubscribed() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(100));
    let first = message(21, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    let second = message(22, Address::repeat_byte(0xab), Address::repeat_byte(0xcd));
    chain.push_log(sent_log(&first, 105, 0));
    chain.push_log(sent_log(&second, 115, 0));
    chain.push_head_stream(vec![110]);
    chain.push_head_stream(vec![120]);
    let repo = Arc::new(RecordingRepository::new());

    let running = spawn_indexer(chain.clone(), repo.clone(), config(90, 100, 1));
    assert!(cursor_reaches(&repo, 120).await);
    running.stop().await;

    assert!(chain.subscriptions.load(Ordering::SeqCst) >= 2);
    let requested = chain.requested();
    assert!(requested.contains(&(101, 110)));
    assert!(requested.contains(&(111, 120)));
    let mut blocks: Vec<u64> = repo.all_events().await.iter().map(|e| e.block_number).collect();
    blocks.sort_unstable();
    assert_eq!(blocks, vec![105, 115]);
}

#[tokio::test(start_paused = true)]
async fn ingest_confirmations_hold_back_from_tip() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(110));
    let repo = Arc::new(RecordingRepository::new());
    let mut cfg = config(100, 100, 1);
    cfg.ingest_confirmations = 4;

    let running = spawn_indexer(chain.clone(), repo.clone(), cfg);
    assert!(cursor_reaches(&repo, 106).await);
    tokio::time::sleep(Duration::from_secs(5)).await;
    running.stop().await;

    assert_eq!(repo.latest_block().await.unwrap(), Some(106));
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_indexer() {
    init_tracing();
    let chain = Arc::new(FakeChain::new(105));
    let repo = Arc::new(RecordingRepository::new());
    let running = spawn_indexer(chain, repo.clone(), config(100, 100, 1));
    assert!(cursor_reaches(&repo, 105).await);
    tokio::time::timeout(Duration::from_secs(5), running.stop())
        .await
        .expect("indexer did not stop");
}

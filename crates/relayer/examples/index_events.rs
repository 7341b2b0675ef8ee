//! Example: run the Indexer against a source chain and print each ingested MessageSent.
//!
//! Usage: cargo run -p relayer --example index_events -- --http-url URL [--ws-url WS_URL] --contract 0x... [--start-block N]

use alloy::primitives::Address;
use relayer::rpc::RpcClient;
use relayer::{
    BlockRepository, ErrorReporter, EventId, EventRepository, EventStatus, Indexer, IndexerConfig,
    MemoryStore, ReconnectionConfig, SourceChain,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut http_url = String::new();
    let mut ws_url = None;
    let mut contract = String::new();
    let mut start_block = 0u64;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-url" => {
                i += 1;
                http_url = args.get(i).cloned().unwrap_or_default();
            }
            "--ws-url" => {
                i += 1;
                ws_url = args.get(i).cloned();
            }
            "--contract" => {
                i += 1;
                contract = args.get(i).cloned().unwrap_or_default();
            }
            "--start-block" => {
                i += 1;
                start_block = args.get(i).map(|s| s.parse()).transpose()?.unwrap_or(0);
            }
            _ => {}
        }
        i += 1;
    }
    if http_url.is_empty() || contract.is_empty() {
        eprintln!("Usage: index_events --http-url URL [--ws-url WS_URL] --contract 0xADDR [--start-block N]");
        std::process::exit(1);
    }
    let bridge: Address = contract.parse()?;

    let rpc = Arc::new(RpcClient::new(http_url, Duration::from_secs(30))?);
    let chain = Arc::new(SourceChain::new(rpc, ws_url));
    let store = Arc::new(MemoryStore::new());
    let (reporter, mut errors) = ErrorReporter::channel(16);
    let indexer = Indexer::new(
        chain,
        store.clone(),
        store.clone(),
        IndexerConfig {
            bridge,
            start_block,
            block_batch_size: 1000,
            workers: 4,
            ingest_confirmations: 0,
            poll_interval: Duration::from_secs(3),
            reconnection: ReconnectionConfig::default(),
        },
        reporter,
    );

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move { indexer.run(run_cancel).await });

    let mut seen: HashSet<EventId> = HashSet::new();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(err) = errors.recv() => eprintln!("indexer error: {}", err),
            _ = tick.tick() => {
                for ev in store.find_by_status(EventStatus::New).await? {
                    if seen.insert(ev.id) {
                        println!(
                            "MessageSent block={} log_index={} signal={} from={} to={} dest_chain={}",
                            ev.block_number,
                            ev.id.log_index,
                            ev.signal,
                            ev.message.sender,
                            ev.message.to,
                            ev.message.dest_chain_id
                        );
                    }
                }
                if let Some(cursor) = store.latest_block().await? {
                    tracing::debug!(cursor, "indexed");
                }
            }
        }
    }
    cancel.cancel();
    task.await?;
    Ok(())
}

//! Cross-chain message relayer.
//!
//! - **Indexer**: follows the source chain (WebSocket heads, or polling) and
//!   ingests bridge `MessageSent` logs into the event repository in batches,
//!   advancing a persisted block cursor only after the events are saved.
//! - **Processor**: drains the repository with a worker pool. For each event it
//!   waits until the destination's header sync covers the event block plus the
//!   configured confirmation depth ([ConfirmationDepth]), builds a storage proof
//!   anchored at the synced header, and submits `processMessage` signed with the
//!   relayer key.
//!
//! The two pipelines share nothing but the repository. [Service] wires them
//! together from a [RelayerConfig].

pub mod abi;
pub mod backoff;
pub mod chain;
pub mod config;
pub mod confirmation;
pub mod destination;
pub mod error;
pub mod event;
pub mod indexer;
pub mod processor;
pub mod proof;
pub mod repository;
pub mod rpc;
pub mod service;
pub mod signer;
pub mod types;

pub use abi::MessageStatus;
pub use backoff::{Backoff, RetryPolicy};
pub use chain::{ChainClient, SourceChain, StateProofClient};
pub use config::{ReconnectionConfig, RelayerConfig, RetryConfig};
pub use confirmation::{ConfirmationDepth, ConfirmationGate, Strategy};
pub use destination::{DestinationBridge, DestinationChain, HeaderSyncContract, HeaderSyncReader, SyncedHeader};
pub use error::{ConfigError, ProcessError, ProofError, RepositoryError, RpcError, ServiceError, SubmitError};
pub use event::{BridgeMessage, Event, EventId, EventStatus};
pub use indexer::{Indexer, IndexerConfig};
pub use processor::{Outcome, Processor, ProcessorConfig, ProcessorPool};
pub use proof::{Proof, ProofBuilder, Prover};
pub use repository::{BlockRepository, EventRepository, FileStore, MemoryStore};
pub use service::{Components, ErrorReporter, Service, ServiceHandle, ServiceOpts};
pub use signer::RelayerKey;

//! Garden Sync Core Library
//!
//! Peer coordination and replication for a local-first note app.
//!
//! ## Overview
//!
//! Devices that join the same session name discover each other through a
//! rendezvous and get one ordered, reliable channel per peer. On top of
//! those channels this crate provides:
//!
//! - **Bulk garden transfer**: a garden (a folder of notes plus its
//!   history) is archived, compressed, chunked and streamed to peers with
//!   backpressure; receivers reassemble, replace their history once per
//!   session, and report completion only after every write has landed.
//! - **Incremental file updates**: single files flooded over gossip and
//!   applied last-writer-wins on an embedded timestamp.
//! - **Live sync**: an elected host serves document snapshots, and open
//!   documents are replicated as automerge CRDTs.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use gardensync_core::{AutoUi, DocKey, MemoryHub, MemoryStore, PeerInfo, SyncConfig, SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = MemoryHub::new();
//!     let (engine, laptop) = SyncEngine::new(
//!         PeerInfo::new("laptop", "Laptop"),
//!         Arc::new(MemoryStore::new()),
//!         AutoUi::new(vec!["journal".into()]),
//!         SyncConfig::default(),
//!     );
//!     engine.spawn();
//!     let _membership = hub.join("home", laptop.local_id().clone(), laptop.transport_sink())?;
//!
//!     laptop.enable_live_sync().await?;
//!     laptop.open_document(DocKey::new("journal", "today.md")).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod files;
pub mod live;
pub mod logging;
pub mod peers;
pub mod replica;
pub mod storage;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncHandle};
pub use error::{SyncError, SyncResult};
pub use files::{ReceiveFinished, ReceiveStatus, SendOutcome};
pub use live::{AutoUi, HostPreference, LiveStatus, SessionMemory, SyncUi};
pub use peers::{Peer, PeerRegistry, TransportChannel, TransportEvent, TransportEventKind};
pub use replica::{DocumentReplica, UpdateOrigin};
pub use storage::Storage;
pub use store::{ContentStore, FsStore, MemoryStore};
pub use sync::{
    Envelope, LivePeer, LiveState, Message, MessageRouter, Progress, ProgressKind, SyncEvent,
};
pub use transport::{
    generate_secret_key, peer_id_for_key, IrohTransport, MemoryHub, MemoryMembership, TransportSink,
};
pub use types::*;

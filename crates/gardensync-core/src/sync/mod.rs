//! Envelope layer shared by every coordinator
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  MessageRouter                                                  │
//! │  ├── Envelope (version, message id, origin, gossip flag)       │
//! │  ├── SeenMessageCache (bounded dedup window)                   │
//! │  └── PeerRegistry (the only path to a channel)                 │
//! │                                                                 │
//! │  Message (closed enum)                                          │
//! │  └── route() → LiveSync | Peer | FileSync                      │
//! │                                                                 │
//! │  SyncEvent (broadcast to the application)                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Gossip
//!
//! An envelope sent with `use_gossip` is re-sent by every receiver to all of
//! its open peers, including the one it came from. Duplicates are dropped
//! by message id, so the flood terminates once every peer has seen it.

pub mod envelope;
pub mod events;
pub mod protocol;
pub mod router;
pub mod seen;

pub use envelope::{Envelope, ENVELOPE_VERSION};
pub use events::{Progress, ProgressKind, SyncEvent};
pub use protocol::{LivePeer, LiveState, Message, Route};
pub use router::MessageRouter;
pub use seen::SeenMessageCache;

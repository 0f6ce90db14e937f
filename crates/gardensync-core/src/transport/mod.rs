//! Transports: where peer channels come from
//!
//! A transport introduces peers that share a session name and hands the
//! engine one [`TransportChannel`](crate::peers::TransportChannel) per
//! remote peer. Everything it observes is reported through a
//! [`TransportSink`]; the engine never polls a transport.
//!
//! - [`memory`]: in-process hub, used by tests and the CLI demo
//! - [`iroh`]: QUIC channels, with iroh-gossip as the rendezvous

pub mod iroh;
pub mod memory;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::engine::EngineInput;
use crate::peers::{TransportChannel, TransportEvent, TransportEventKind};
use crate::types::{ConnectionState, PeerId};

pub use self::iroh::{generate_secret_key, peer_id_for_key, IrohTransport};
pub use self::memory::{MemoryChannel, MemoryHub, MemoryMembership};

/// Delivers transport events into an engine inbox
///
/// Every call returns `false` once the engine has stopped.
#[derive(Clone)]
pub struct TransportSink {
    tx: mpsc::UnboundedSender<EngineInput>,
}

impl std::fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl TransportSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<EngineInput>) -> Self {
        Self { tx }
    }

    /// Forward a raw event
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send(EngineInput::Transport(event)).is_ok()
    }

    /// A channel to `peer` is ready
    pub fn opened(&self, peer: PeerId, channel: Arc<dyn TransportChannel>) -> bool {
        self.emit(TransportEvent {
            peer,
            kind: TransportEventKind::Opened(channel),
        })
    }

    /// A frame arrived from `peer`
    pub fn message(&self, peer: PeerId, frame: Bytes) -> bool {
        self.emit(TransportEvent {
            peer,
            kind: TransportEventKind::Message(frame),
        })
    }

    /// The connection to `peer` changed state
    pub fn state(&self, peer: PeerId, state: ConnectionState) -> bool {
        self.emit(TransportEvent {
            peer,
            kind: TransportEventKind::State(state),
        })
    }

    /// Whether the engine has stopped listening
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

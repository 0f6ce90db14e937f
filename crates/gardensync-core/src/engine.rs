//! SyncEngine - the single task that owns all sync state
//!
//! SyncEngine coordinates the PeerRegistry, MessageRouter,
//! FileSyncCoordinator and LiveSyncCoordinator:
//! - transport events are applied to the registry and routed
//! - commands from [`SyncHandle`] are executed in order
//! - timers, decisions and background write results come back as inputs
//!
//! Nothing outside this task mutates coordinator state, so no handler ever
//! observes another one half-way through.
//!
//! # Example
//!
//! ```ignore
//! use gardensync_core::{AutoUi, MemoryHub, MemoryStore, PeerInfo, SyncConfig, SyncEngine};
//!
//! let (engine, handle) = SyncEngine::new(
//!     PeerInfo::new("laptop", "Laptop"),
//!     Arc::new(MemoryStore::new()),
//!     AutoUi::default(),
//!     SyncConfig::default(),
//! );
//! engine.spawn();
//!
//! // Join a session over the in-process transport
//! let hub = MemoryHub::new();
//! hub.join("notes", handle.local_id().clone(), handle.transport_sink())?;
//!
//! // Push a garden to everyone
//! handle.send_gardens(vec!["journal".into()], vec![]).await?;
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::files::{FileSyncCoordinator, FileSyncInput, ReceiveStatus};
use crate::live::{LiveInput, LiveStatus, LiveSyncCoordinator, SyncUi};
use crate::peers::{Peer, PeerRegistry, TransportEvent, TransportEventKind};
use crate::storage::Storage;
use crate::store::ContentStore;
use crate::sync::envelope::Envelope;
use crate::sync::events::SyncEvent;
use crate::sync::protocol::{LiveState, Message, Route};
use crate::sync::router::MessageRouter;
use crate::transport::TransportSink;
use crate::types::{DocKey, PeerId, PeerInfo, TransferId};

/// Everything the engine task reacts to
pub(crate) enum EngineInput {
    Transport(TransportEvent),
    Command(Command),
    Files(FileSyncInput),
    Live(LiveInput),
}

pub(crate) type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command {
    SendGardens {
        gardens: Vec<String>,
        targets: Vec<PeerId>,
        reply: Reply<SyncResult<TransferId>>,
    },
    RequestGardens {
        gardens: Vec<String>,
        from: PeerId,
        reply: Reply<SyncResult<()>>,
    },
    CancelTransfer {
        transfer_id: TransferId,
        reply: Reply<SyncResult<()>>,
    },
    SendFileUpdate {
        garden: String,
        path: String,
        content: Vec<u8>,
        timestamp: i64,
        reply: Reply<()>,
    },
    EnableLiveSync {
        reply: Reply<SyncResult<()>>,
    },
    DisableLiveSync {
        reply: Reply<SyncResult<()>>,
    },
    Reelect {
        reply: Reply<SyncResult<()>>,
    },
    OpenDocument {
        key: DocKey,
        reply: Reply<()>,
    },
    CloseDocument {
        key: DocKey,
        reply: Reply<SyncResult<()>>,
    },
    EditDocument {
        key: DocKey,
        text: String,
        reply: Reply<SyncResult<()>>,
    },
    DocumentText {
        key: DocKey,
        reply: Reply<SyncResult<String>>,
    },
    LiveStatus {
        reply: Reply<LiveStatus>,
    },
    ReceiveStatus {
        reply: Reply<ReceiveStatus>,
    },
    Peers {
        reply: Reply<Vec<Peer>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// The sync engine actor
///
/// Create with [`SyncEngine::new`], then [`spawn`](SyncEngine::spawn) it
/// and talk to it through the returned [`SyncHandle`].
pub struct SyncEngine<S: ContentStore, U: SyncUi> {
    local: PeerInfo,
    registry: PeerRegistry,
    router: MessageRouter,
    files: FileSyncCoordinator<S>,
    live: LiveSyncCoordinator<S, U>,
    /// Durable settings; `None` runs without persistence
    storage: Option<Storage>,
    /// Whether the user wants live sync on, restored from storage
    live_wanted: bool,
    events: broadcast::Sender<SyncEvent>,
    inputs: mpsc::UnboundedReceiver<EngineInput>,
}

impl<S: ContentStore, U: SyncUi> SyncEngine<S, U> {
    /// Create an engine and its command handle
    pub fn new(local: PeerInfo, store: Arc<S>, ui: U, config: SyncConfig) -> (Self, SyncHandle) {
        let (inputs_tx, inputs) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let registry = PeerRegistry::new();
        let router = MessageRouter::new(
            local.id.clone(),
            registry.clone(),
            config.seen_cache_capacity,
        );
        let files = FileSyncCoordinator::new(
            router.clone(),
            store.clone(),
            config.clone(),
            events.clone(),
            inputs_tx.clone(),
        );
        let live = LiveSyncCoordinator::new(
            router.clone(),
            local.clone(),
            store,
            config,
            events.clone(),
            inputs_tx.clone(),
            Arc::new(ui),
        );
        let handle = SyncHandle {
            local: local.id.clone(),
            tx: inputs_tx,
            events: events.clone(),
        };
        let engine = Self {
            local,
            registry,
            router,
            files,
            live,
            storage: None,
            live_wanted: false,
            events,
            inputs,
        };
        (engine, handle)
    }

    /// Persist the live-sync flag in `storage` and restore it now
    ///
    /// # Errors
    ///
    /// Returns a database error if the flag cannot be read.
    pub fn with_storage(mut self, storage: Storage) -> SyncResult<Self> {
        self.live_wanted = storage.live_sync_enabled()?;
        if self.live_wanted {
            info!("Live sync was enabled last run; will resume when a peer connects");
        }
        self.storage = Some(storage);
        Ok(self)
    }

    /// Run the engine on a new task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process inputs until shutdown
    pub async fn run(mut self) {
        info!(peer = %self.local.id.short(), "Sync engine started");
        while let Some(input) = self.inputs.recv().await {
            match input {
                EngineInput::Transport(event) => self.on_transport(event).await,
                EngineInput::Command(Command::Shutdown { reply }) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
                EngineInput::Command(command) => self.on_command(command).await,
                EngineInput::Files(input) => {
                    if let Some(finished) = self.files.handle_input(input) {
                        self.live.on_snapshot_complete(&finished).await;
                    }
                }
                EngineInput::Live(input) => self.live.handle_input(input).await,
            }
        }
        info!(peer = %self.local.id.short(), "Sync engine stopped");
    }

    async fn shutdown(&mut self) {
        info!("Shutting down sync engine");
        self.live.suspend().await;
        for peer in self.registry.clear() {
            debug!(peer = %peer.id.short(), "Closed channel");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Transport
    // ═══════════════════════════════════════════════════════════════════════

    async fn on_transport(&mut self, event: TransportEvent) {
        let TransportEvent { peer, kind } = event;
        match kind {
            TransportEventKind::Opened(channel) => {
                let entry = self.registry.add_peer(peer.clone(), channel);
                let _ = self.events.send(SyncEvent::PeerJoined { peer: entry.info() });
                if let Err(e) = self.router.send_to(
                    Message::PeerIntroduction {
                        peer: self.local.clone(),
                    },
                    &peer,
                ) {
                    warn!(peer = %peer.short(), error = %e, "Failed to introduce ourselves");
                }
                if self.live_wanted && self.live.state() == LiveState::Disabled {
                    info!("Peer connected, resuming live sync");
                    self.live.enable().await;
                }
            }
            TransportEventKind::Message(frame) => {
                if let Some(envelope) = self.router.receive(&peer, frame) {
                    self.dispatch(envelope).await;
                }
            }
            TransportEventKind::State(state) => {
                let Some(left) = self.registry.connection_state_changed(&peer, state) else {
                    return;
                };
                let _ = self.events.send(SyncEvent::PeerLeft {
                    peer_id: left.id.clone(),
                });
                self.files.on_peer_left(&left.id);
                self.live.on_peer_left(&left.id).await;
                if self.registry.count() == 0 && self.live.state() != LiveState::Disabled {
                    info!("Last peer left, suspending live sync");
                    self.live.suspend().await;
                }
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { from, payload, .. } = envelope;
        debug!(from = %from.short(), kind = payload.kind(), "Dispatching");
        match payload.route() {
            Route::Peer => {
                if let Message::PeerIntroduction { peer } = payload {
                    if peer.id != from {
                        warn!(from = %from.short(), claimed = %peer.id.short(), "Introduction for another peer");
                        return;
                    }
                    if self.registry.set_display_name(&from, peer.display_name.clone()) {
                        info!(peer = %from.short(), name = %peer.display_name, "Peer introduced");
                    }
                }
            }
            Route::FileSync => {
                if let Some(finished) = self.files.handle_message(&from, payload).await {
                    self.live.on_snapshot_complete(&finished).await;
                }
            }
            Route::LiveSync => self.live.handle_message(&from, payload).await,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════════

    fn persist_live_flag(&mut self, enabled: bool) -> SyncResult<()> {
        self.live_wanted = enabled;
        match &self.storage {
            Some(storage) => storage.set_live_sync_enabled(enabled),
            None => Ok(()),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::SendGardens {
                gardens,
                targets,
                reply,
            } => {
                let _ = reply.send(self.files.send_gardens(gardens, targets));
            }
            Command::RequestGardens {
                gardens,
                from,
                reply,
            } => {
                let result = if self.registry.is_open(&from) {
                    self.files.request_gardens(gardens, &from);
                    Ok(())
                } else {
                    Err(SyncError::Transport(format!("{} is not connected", from.short())))
                };
                let _ = reply.send(result);
            }
            Command::CancelTransfer { transfer_id, reply } => {
                let _ = reply.send(self.files.cancel_transfer(transfer_id));
            }
            Command::SendFileUpdate {
                garden,
                path,
                content,
                timestamp,
                reply,
            } => {
                self.files.send_file_update(garden, path, content, timestamp);
                let _ = reply.send(());
            }
            Command::EnableLiveSync { reply } => {
                let result = self.persist_live_flag(true);
                self.live.enable().await;
                let _ = reply.send(result);
            }
            Command::DisableLiveSync { reply } => {
                let result = self.persist_live_flag(false);
                self.live.disable().await;
                let _ = reply.send(result);
            }
            Command::Reelect { reply } => {
                let _ = reply.send(self.live.reelect().await);
            }
            Command::OpenDocument { key, reply } => {
                self.live.open_document(key).await;
                let _ = reply.send(());
            }
            Command::CloseDocument { key, reply } => {
                let _ = reply.send(self.live.close_document(&key).await);
            }
            Command::EditDocument { key, text, reply } => {
                let _ = reply.send(self.live.edit_document(&key, &text));
            }
            Command::DocumentText { key, reply } => {
                let _ = reply.send(self.live.document_text(&key));
            }
            Command::LiveStatus { reply } => {
                let _ = reply.send(self.live.status());
            }
            Command::ReceiveStatus { reply } => {
                let _ = reply.send(self.files.receive_status());
            }
            Command::Peers { reply } => {
                let _ = reply.send(self.registry.list());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

/// Cloneable command API for a running [`SyncEngine`]
///
/// Every method fails with `SyncError::EngineStopped` once the engine task
/// has exited.
#[derive(Clone)]
pub struct SyncHandle {
    local: PeerId,
    tx: mpsc::UnboundedSender<EngineInput>,
    events: broadcast::Sender<SyncEvent>,
}

impl std::fmt::Debug for SyncHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHandle")
            .field("local", &self.local)
            .finish_non_exhaustive()
    }
}

impl SyncHandle {
    /// Id of the local peer
    pub fn local_id(&self) -> &PeerId {
        &self.local
    }

    /// Sink for a transport to report into
    pub fn transport_sink(&self) -> TransportSink {
        TransportSink::new(self.tx.clone())
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineInput::Command(make(reply)))
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Send `gardens` to `targets`, or to every open peer if empty
    pub async fn send_gardens(
        &self,
        gardens: Vec<String>,
        targets: Vec<PeerId>,
    ) -> SyncResult<TransferId> {
        self.request(|reply| Command::SendGardens {
            gardens,
            targets,
            reply,
        })
        .await?
    }

    /// Ask `from` to send us `gardens`
    pub async fn request_gardens(&self, gardens: Vec<String>, from: PeerId) -> SyncResult<()> {
        self.request(|reply| Command::RequestGardens {
            gardens,
            from,
            reply,
        })
        .await?
    }

    /// Cancel an outgoing or incoming transfer
    pub async fn cancel_transfer(&self, transfer_id: TransferId) -> SyncResult<()> {
        self.request(|reply| Command::CancelTransfer { transfer_id, reply })
            .await?
    }

    /// Gossip a single-file update
    pub async fn send_file_update(
        &self,
        garden: impl Into<String>,
        path: impl Into<String>,
        content: Vec<u8>,
        timestamp: i64,
    ) -> SyncResult<()> {
        let garden = garden.into();
        let path = path.into();
        self.request(|reply| Command::SendFileUpdate {
            garden,
            path,
            content,
            timestamp,
            reply,
        })
        .await
    }

    /// Turn live sync on and remember that choice
    pub async fn enable_live_sync(&self) -> SyncResult<()> {
        self.request(|reply| Command::EnableLiveSync { reply }).await?
    }

    /// Turn live sync off and remember that choice
    pub async fn disable_live_sync(&self) -> SyncResult<()> {
        self.request(|reply| Command::DisableLiveSync { reply }).await?
    }

    /// Ask every peer to elect a new host
    pub async fn reelect(&self) -> SyncResult<()> {
        self.request(|reply| Command::Reelect { reply }).await?
    }

    /// Open a document pane
    pub async fn open_document(&self, key: DocKey) -> SyncResult<()> {
        self.request(|reply| Command::OpenDocument { key, reply }).await
    }

    /// Close a document pane
    pub async fn close_document(&self, key: DocKey) -> SyncResult<()> {
        self.request(|reply| Command::CloseDocument { key, reply })
            .await?
    }

    /// Replace the text of an open live document
    pub async fn edit_document(&self, key: DocKey, text: impl Into<String>) -> SyncResult<()> {
        let text = text.into();
        self.request(|reply| Command::EditDocument { key, text, reply })
            .await?
    }

    /// Text of an open live document
    pub async fn document_text(&self, key: DocKey) -> SyncResult<String> {
        self.request(|reply| Command::DocumentText { key, reply })
            .await?
    }

    /// Live-sync status snapshot
    pub async fn live_status(&self) -> SyncResult<LiveStatus> {
        self.request(|reply| Command::LiveStatus { reply }).await
    }

    /// State of the current receive session
    pub async fn receive_status(&self) -> SyncResult<ReceiveStatus> {
        self.request(|reply| Command::ReceiveStatus { reply }).await
    }

    /// Connected peers
    pub async fn peers(&self) -> SyncResult<Vec<Peer>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Stop the engine, closing every channel
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

//! Live sync: host election and session lifecycle
//!
//! ## State machine
//!
//! ```text
//!              enable()                 HostChosen / decision
//!  Disabled ─────────────► Pending ─────────────────────────► Host | Follower
//!     ▲                      │  ▲                                   │
//!     │                      │  └──── host lost / Reelect ──────────┤
//!     │                      │        (disable then enable)         │
//!     └──────── disable() ───┴──────────────────────────────────────┘
//! ```
//!
//! - An existing session always outranks a fresh election: a pending peer
//!   that hears `SessionInfo`, or an announce from a host/follower, joins it.
//! - Concurrent `HostChosen` messages resolve in favour of the choice made
//!   by the smallest chooser id, until the host starts the session.
//! - The sticky host and its gardens are remembered for the current run
//!   only and are forgotten on an explicit disable.
//!
//! Election messages are gossiped; document updates are not.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::engine::EngineInput;
use crate::error::{SyncError, SyncResult};
use crate::files::ReceiveFinished;
use crate::replica::{ReplicaRole, ReplicaSet};
use crate::store::ContentStore;
use crate::sync::events::{Progress, SyncEvent};
use crate::sync::protocol::{LivePeer, LiveState, Message};
use crate::sync::router::MessageRouter;
use crate::types::{DocKey, PeerId, PeerInfo};

/// Decision points presented to the user.
///
/// Implementations may auto-resolve; the engine never blocks on them, the
/// answer is posted back and ignored if the election moved on meanwhile.
pub trait SyncUi: Send + Sync + 'static {
    /// Pick the session host among the pending peers (self included).
    /// `None` means the user dismissed the prompt.
    fn choose_host(
        &self,
        local: &PeerId,
        candidates: Vec<PeerInfo>,
    ) -> impl Future<Output = Option<PeerId>> + Send;

    /// Pick which gardens take part in live sync
    fn choose_gardens(&self, suggested: Vec<String>) -> impl Future<Output = Vec<String>> + Send;
}

/// Host choice made by [`AutoUi`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostPreference {
    /// The lexicographically smallest candidate id
    #[default]
    LowestId,
    /// Always this device
    Local,
    /// The smallest candidate that is not this device
    Remote,
}

/// Headless [`SyncUi`] that answers immediately
#[derive(Debug, Clone, Default)]
pub struct AutoUi {
    preference: HostPreference,
    gardens: Vec<String>,
}

impl AutoUi {
    /// Auto-resolver that hosts `gardens` when elected
    pub fn new(gardens: Vec<String>) -> Self {
        Self {
            preference: HostPreference::default(),
            gardens,
        }
    }

    /// Change how the host is picked
    pub fn with_preference(mut self, preference: HostPreference) -> Self {
        self.preference = preference;
        self
    }
}

impl SyncUi for AutoUi {
    async fn choose_host(&self, local: &PeerId, candidates: Vec<PeerInfo>) -> Option<PeerId> {
        let mut ids: Vec<PeerId> = candidates.into_iter().map(|p| p.id).collect();
        ids.sort();
        match self.preference {
            HostPreference::LowestId => ids.into_iter().next(),
            HostPreference::Local => Some(local.clone()),
            HostPreference::Remote => ids.into_iter().find(|id| id != local),
        }
    }

    async fn choose_gardens(&self, suggested: Vec<String>) -> Vec<String> {
        if self.gardens.is_empty() {
            suggested
        } else {
            self.gardens.clone()
        }
    }
}

/// Election result remembered for the lifetime of this run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionMemory {
    /// Host of the last session this device took part in
    pub sticky_host: Option<PeerId>,
    /// Gardens of that session
    pub gardens: Vec<String>,
}

impl SessionMemory {
    fn remember(&mut self, host: PeerId, gardens: &[String]) {
        self.sticky_host = Some(host);
        self.gardens = gardens.to_vec();
    }

    fn forget(&mut self) {
        *self = Self::default();
    }
}

/// Timer firings and decision results, fed back through the engine inbox
#[derive(Debug)]
pub enum LiveInput {
    /// The election timer started in `epoch` expired
    ElectionTimer {
        /// Election epoch
        epoch: u64,
    },
    /// The host-selection prompt answered
    HostDecision {
        /// Election epoch the prompt was opened in
        epoch: u64,
        /// Chosen host, if any
        chosen: Option<PeerId>,
    },
    /// The garden-selection prompt answered
    GardenDecision {
        /// Election epoch the prompt was opened in
        epoch: u64,
        /// Gardens to sync live
        gardens: Vec<String>,
    },
    /// A debounced document save is due
    SaveDue {
        /// Document
        key: DocKey,
        /// Save generation
        epoch: u64,
    },
}

/// Snapshot of the live-sync session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveStatus {
    /// Current state
    pub state: LiveState,
    /// Session host
    pub host_id: Option<PeerId>,
    /// Peers still in the election
    pub pending_peers: Vec<PeerInfo>,
    /// Peers in the running session
    pub active_peers: Vec<PeerInfo>,
    /// Gardens synced live
    pub syncable_gardens: Vec<String>,
    /// Whether replicas are running
    pub replicas_active: bool,
    /// Documents open locally
    pub open_documents: Vec<DocKey>,
}

/// Runs host election and owns the live document replicas
pub struct LiveSyncCoordinator<S: ContentStore, U: SyncUi> {
    router: MessageRouter,
    local: PeerInfo,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    inputs: mpsc::UnboundedSender<EngineInput>,
    ui: Arc<U>,

    state: LiveState,
    host_id: Option<PeerId>,
    pending_peers: BTreeMap<PeerId, PeerInfo>,
    active_peers: BTreeMap<PeerId, PeerInfo>,
    syncable_gardens: Vec<String>,
    memory: SessionMemory,

    epoch: u64,
    timer: Option<AbortHandle>,
    host_choice: Option<(PeerId, PeerId)>,
    session_started: bool,
    awaiting_snapshot: bool,
    probing_sticky: bool,

    replicas: ReplicaSet<S>,
}

impl<S: ContentStore, U: SyncUi> LiveSyncCoordinator<S, U> {
    pub(crate) fn new(
        router: MessageRouter,
        local: PeerInfo,
        store: Arc<S>,
        config: SyncConfig,
        events: broadcast::Sender<SyncEvent>,
        inputs: mpsc::UnboundedSender<EngineInput>,
        ui: Arc<U>,
    ) -> Self {
        let replicas = ReplicaSet::new(
            router.clone(),
            store,
            events.clone(),
            inputs.clone(),
            config.save_debounce,
        );
        Self {
            router,
            local,
            config,
            events,
            inputs,
            ui,
            state: LiveState::Disabled,
            host_id: None,
            pending_peers: BTreeMap::new(),
            active_peers: BTreeMap::new(),
            syncable_gardens: Vec::new(),
            memory: SessionMemory::default(),
            epoch: 0,
            timer: None,
            host_choice: None,
            session_started: false,
            awaiting_snapshot: false,
            probing_sticky: false,
            replicas,
        }
    }

    /// Current state
    pub fn state(&self) -> LiveState {
        self.state
    }

    /// Session host, if known
    pub fn host_id(&self) -> Option<&PeerId> {
        self.host_id.as_ref()
    }

    /// Sticky host and gardens of this run
    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    /// Full status snapshot
    pub fn status(&self) -> LiveStatus {
        LiveStatus {
            state: self.state,
            host_id: self.host_id.clone(),
            pending_peers: self.pending_peers.values().cloned().collect(),
            active_peers: self.active_peers.values().cloned().collect(),
            syncable_gardens: self.syncable_gardens.clone(),
            replicas_active: self.replicas.is_active(),
            open_documents: self.replicas.open_documents(),
        }
    }

    fn local_id(&self) -> &PeerId {
        &self.local.id
    }

    fn live_peer(&self) -> LivePeer {
        LivePeer {
            info: self.local.clone(),
            state: self.state,
            host_id: self.host_id.clone(),
            syncable_gardens: self.syncable_gardens.clone(),
        }
    }

    fn peer_info(&self, id: &PeerId) -> PeerInfo {
        self.router
            .registry()
            .get(id)
            .map(|p| p.info())
            .unwrap_or_else(|| PeerInfo::new(id.clone(), id.to_string()))
    }

    fn set_state(&mut self, state: LiveState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, host = ?self.host_id.as_ref().map(|h| h.short().to_string()), "Live sync state changed");
        self.state = state;
        let _ = self.events.send(SyncEvent::LiveStateChanged {
            state,
            host_id: self.host_id.clone(),
        });
    }

    fn progress(&self, progress: Progress) {
        let _ = self.events.send(SyncEvent::Progress(progress));
    }

    /// Start a new election epoch, cancelling the running timer
    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.epoch
    }

    fn start_timer(&mut self) {
        let epoch = self.epoch;
        let timeout = self.config.election_timeout;
        let inputs = self.inputs.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = inputs.send(EngineInput::Live(LiveInput::ElectionTimer { epoch }));
        });
        self.timer = Some(handle.abort_handle());
    }

    fn reset_session(&mut self) {
        self.host_id = None;
        self.pending_peers.clear();
        self.active_peers.clear();
        self.syncable_gardens.clear();
        self.host_choice = None;
        self.session_started = false;
        self.awaiting_snapshot = false;
        self.probing_sticky = false;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════════════════════════════════

    /// Join or start a live session
    pub async fn enable(&mut self) {
        if self.state.in_session() {
            debug!("Live sync already running");
            return;
        }
        self.next_epoch();
        self.reset_session();
        self.pending_peers
            .insert(self.local.id.clone(), self.local.clone());

        if self.memory.sticky_host.as_ref() == Some(&self.local.id) {
            self.resume_as_host().await;
            return;
        }

        self.probing_sticky = self.memory.sticky_host.is_some();
        self.set_state(LiveState::Pending);
        self.router.send(
            Message::LiveSyncAnnounce {
                peer: self.live_peer(),
            },
            None,
            None,
            true,
        );
        self.start_timer();
        self.progress(Progress::info("Looking for a live session"));
    }

    /// Leave live sync and forget the sticky host
    pub async fn disable(&mut self) {
        self.shutdown(true, true).await;
    }

    /// Stop without telling peers or forgetting the sticky host.
    ///
    /// Used when every peer is gone; the next `enable` re-validates the
    /// remembered session.
    pub async fn suspend(&mut self) {
        self.shutdown(false, false).await;
    }

    /// Ask every peer to run a fresh election
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidOperation` if live sync is disabled.
    pub async fn reelect(&mut self) -> SyncResult<()> {
        if self.state == LiveState::Disabled {
            return Err(SyncError::InvalidOperation("live sync is disabled".into()));
        }
        info!("Requesting re-election");
        self.router.send(Message::LiveSyncReelect, None, None, true);
        self.restart(true).await;
        Ok(())
    }

    async fn shutdown(&mut self, announce: bool, forget: bool) {
        if forget {
            self.memory.forget();
        }
        if self.state == LiveState::Disabled {
            return;
        }
        self.next_epoch();
        self.replicas.teardown().await;
        self.reset_session();
        if announce {
            self.router.send(
                Message::LiveSyncDisable {
                    peer_id: self.local.id.clone(),
                },
                None,
                None,
                true,
            );
        }
        self.set_state(LiveState::Disabled);
    }

    async fn restart(&mut self, forget: bool) {
        self.shutdown(true, forget).await;
        self.enable().await;
    }

    async fn resume_as_host(&mut self) {
        let gardens = self.memory.gardens.clone();
        info!(gardens = ?gardens, "Resuming remembered session as host");
        self.host_id = Some(self.local.id.clone());
        self.syncable_gardens = gardens.clone();
        self.session_started = true;
        self.set_state(LiveState::Host);
        self.router.send(
            Message::LiveSyncSessionStart {
                syncable_gardens: gardens.clone(),
            },
            None,
            None,
            true,
        );
        self.replicas.activate(ReplicaRole::Host, gardens).await;
    }

    /// Open a document pane
    pub async fn open_document(&mut self, key: DocKey) {
        self.replicas.open(key).await;
    }

    /// Close a document pane
    pub async fn close_document(&mut self, key: &DocKey) -> SyncResult<()> {
        self.replicas.close(key).await
    }

    /// Replace a live document's text
    pub fn edit_document(&mut self, key: &DocKey, text: &str) -> SyncResult<()> {
        self.replicas.edit(key, text)
    }

    /// Read a live document's text
    pub fn document_text(&self, key: &DocKey) -> SyncResult<String> {
        self.replicas.text(key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inputs
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a timer firing or decision result
    pub async fn handle_input(&mut self, input: LiveInput) {
        match input {
            LiveInput::ElectionTimer { epoch } => self.on_timer(epoch).await,
            LiveInput::HostDecision { epoch, chosen } => self.on_host_decision(epoch, chosen).await,
            LiveInput::GardenDecision { epoch, gardens } => {
                self.on_garden_decision(epoch, gardens).await
            }
            LiveInput::SaveDue { key, epoch } => self.replicas.on_save_due(key, epoch).await,
        }
    }

    /// A receive session passed its completion barrier
    pub async fn on_snapshot_complete(&mut self, finished: &ReceiveFinished) {
        if !self.awaiting_snapshot || self.state != LiveState::Follower {
            return;
        }
        let Some(host) = self.host_id.clone() else {
            return;
        };
        if !finished.sources.contains(&host) {
            return;
        }
        self.awaiting_snapshot = false;
        self.activate_follower(host).await;
    }

    /// A peer's channel closed
    pub async fn on_peer_left(&mut self, peer: &PeerId) {
        self.pending_peers.remove(peer);
        self.active_peers.remove(peer);
        if self.state != LiveState::Disabled
            && peer != self.local_id()
            && self.host_id.as_ref() == Some(peer)
        {
            warn!(host = %peer.short(), "Live sync host lost, re-electing");
            self.progress(Progress::error(format!(
                "Lost live sync host {}",
                peer.short()
            )));
            self.restart(false).await;
        }
    }

    async fn on_timer(&mut self, epoch: u64) {
        if epoch != self.epoch || self.state != LiveState::Pending {
            debug!(epoch, current = self.epoch, "Stale election timer");
            return;
        }
        self.timer = None;

        if self.probing_sticky {
            info!("Remembered host did not answer, starting a fresh election");
            self.memory.forget();
            self.probing_sticky = false;
            self.next_epoch();
            self.router.send(
                Message::LiveSyncAnnounce {
                    peer: self.live_peer(),
                },
                None,
                None,
                true,
            );
            self.start_timer();
            return;
        }

        if self.pending_peers.len() < 2 {
            info!("No other peer announced, waiting");
            self.progress(Progress::info("Waiting for another peer to enable live sync"));
            return;
        }

        let candidates: Vec<PeerInfo> = self.pending_peers.values().cloned().collect();
        debug!(epoch, candidates = candidates.len(), "Presenting host selection");
        let ui = Arc::clone(&self.ui);
        let inputs = self.inputs.clone();
        let local = self.local.id.clone();
        tokio::spawn(async move {
            let chosen = ui.choose_host(&local, candidates).await;
            let _ = inputs.send(EngineInput::Live(LiveInput::HostDecision { epoch, chosen }));
        });
    }

    async fn on_host_decision(&mut self, epoch: u64, chosen: Option<PeerId>) {
        if epoch != self.epoch || self.state != LiveState::Pending {
            debug!(epoch, "Stale host decision");
            return;
        }
        let Some(chosen) = chosen else {
            info!("Host selection dismissed");
            return;
        };
        self.router.send(
            Message::LiveSyncHostChosen {
                chosen_host_id: chosen.clone(),
                chosen_by: self.local.id.clone(),
            },
            None,
            None,
            true,
        );
        let chooser = self.local.id.clone();
        self.process_host_selection(chosen, chooser);
    }

    async fn on_garden_decision(&mut self, epoch: u64, mut gardens: Vec<String>) {
        if epoch != self.epoch || self.state != LiveState::Host || self.session_started {
            debug!(epoch, "Stale garden decision");
            return;
        }
        gardens.sort();
        gardens.dedup();
        info!(gardens = ?gardens, "Starting live session as host");
        self.syncable_gardens = gardens.clone();
        self.session_started = true;
        self.memory.remember(self.local.id.clone(), &gardens);
        self.router.send(
            Message::LiveSyncSessionStart {
                syncable_gardens: gardens.clone(),
            },
            None,
            None,
            true,
        );
        self.progress(Progress::complete(format!(
            "Hosting live sync for {}",
            gardens.join(", ")
        )));
        self.replicas.activate(ReplicaRole::Host, gardens).await;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Messages
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a `LiveSync*` message
    pub async fn handle_message(&mut self, from: &PeerId, message: Message) {
        match message {
            Message::LiveSyncAnnounce { peer } => self.on_announce(peer, true).await,
            Message::LiveSyncAnnounceReply { peer } => self.on_announce(peer, false).await,
            Message::LiveSyncSessionInfo {
                host_id,
                syncable_gardens,
            } => self.on_session_info(host_id, syncable_gardens).await,
            Message::LiveSyncHostChosen {
                chosen_host_id,
                chosen_by,
            } => self.on_host_chosen(chosen_host_id, chosen_by),
            Message::LiveSyncSessionStart { syncable_gardens } => {
                self.on_session_start(from, syncable_gardens).await
            }
            Message::LiveSyncRequestDocState { garden, path } => {
                if self.state == LiveState::Host {
                    self.replicas
                        .handle_request_doc_state(from, DocKey::new(garden, path))
                        .await;
                }
            }
            Message::LiveSyncDocState {
                garden,
                path,
                state,
            } => self
                .replicas
                .handle_doc_state(from, DocKey::new(garden, path), &state),
            Message::LiveSyncYjsUpdate {
                garden,
                path,
                update,
            } => self
                .replicas
                .handle_update(from, DocKey::new(garden, path), &update)
                .await,
            Message::LiveSyncDisable { peer_id } => self.on_peer_disabled(peer_id).await,
            Message::LiveSyncReelect => {
                if self.state != LiveState::Disabled {
                    info!(peer = %from.short(), "Re-election requested");
                    self.restart(true).await;
                }
            }
            other => warn!(kind = other.kind(), "Message is not for live sync"),
        }
    }

    async fn on_announce(&mut self, peer: LivePeer, reply: bool) {
        let id = peer.info.id.clone();
        if &id == self.local_id() {
            return;
        }
        match self.state {
            LiveState::Disabled => {}
            LiveState::Pending => {
                if peer.state.in_session() {
                    if let Some(host) = peer.host_id {
                        self.adopt(host, peer.syncable_gardens).await;
                        return;
                    }
                }
                debug!(peer = %id.short(), "Peer joined the election");
                self.pending_peers.insert(id.clone(), peer.info);
                if reply {
                    self.router.send(
                        Message::LiveSyncAnnounceReply {
                            peer: self.live_peer(),
                        },
                        Some(&id),
                        None,
                        false,
                    );
                }
            }
            LiveState::Host | LiveState::Follower => {
                let Some(host) = self.host_id.clone() else {
                    return;
                };
                if peer.state.in_session() {
                    if peer.host_id.as_ref() != Some(&host) {
                        warn!(peer = %id.short(), "Peer belongs to another session");
                    }
                    return;
                }
                debug!(peer = %id.short(), "Telling late joiner about the session");
                self.router.send(
                    Message::LiveSyncSessionInfo {
                        host_id: host,
                        syncable_gardens: self.syncable_gardens.clone(),
                    },
                    Some(&id),
                    None,
                    false,
                );
                if self.state == LiveState::Host {
                    self.active_peers.insert(id, peer.info);
                }
            }
        }
    }

    async fn on_session_info(&mut self, host: PeerId, gardens: Vec<String>) {
        if self.state != LiveState::Pending || &host == self.local_id() {
            debug!(host = %host.short(), "Ignoring session info");
            return;
        }
        self.adopt(host, gardens).await;
    }

    /// Join an already-running session as a follower
    async fn adopt(&mut self, host: PeerId, gardens: Vec<String>) {
        if &host == self.local_id() {
            return;
        }
        info!(host = %host.short(), gardens = ?gardens, "Joining existing live session");
        self.next_epoch();
        self.probing_sticky = false;
        self.host_choice = None;
        self.move_pending_to_active();
        self.active_peers.insert(host.clone(), self.peer_info(&host));
        self.host_id = Some(host.clone());
        self.syncable_gardens = gardens;
        self.session_started = true;
        self.memory.remember(host, &self.syncable_gardens);
        self.set_state(LiveState::Follower);
        self.request_snapshot().await;
    }

    fn move_pending_to_active(&mut self) {
        let local = self.local.id.clone();
        for (id, info) in std::mem::take(&mut self.pending_peers) {
            if id != local {
                self.active_peers.insert(id, info);
            }
        }
    }

    fn on_host_chosen(&mut self, chosen: PeerId, chooser: PeerId) {
        match self.state {
            LiveState::Disabled => return,
            LiveState::Pending => {}
            LiveState::Host | LiveState::Follower => {
                if self.session_started {
                    debug!(chooser = %chooser.short(), "Session already started, ignoring host choice");
                    return;
                }
            }
        }
        if let Some((current, _)) = &self.host_choice {
            if &chooser >= current {
                debug!(chooser = %chooser.short(), current = %current.short(), "Host choice outranked");
                return;
            }
        }
        self.process_host_selection(chosen, chooser);
    }

    fn process_host_selection(&mut self, chosen: PeerId, chooser: PeerId) {
        let epoch = self.next_epoch();
        self.probing_sticky = false;
        info!(host = %chosen.short(), by = %chooser.short(), "Host selected");
        self.host_choice = Some((chooser, chosen.clone()));
        self.move_pending_to_active();
        self.host_id = Some(chosen.clone());

        if &chosen == self.local_id() {
            self.active_peers.remove(&chosen);
            self.set_state(LiveState::Host);
            let ui = Arc::clone(&self.ui);
            let inputs = self.inputs.clone();
            let suggested = self.memory.gardens.clone();
            tokio::spawn(async move {
                let gardens = ui.choose_gardens(suggested).await;
                let _ = inputs.send(EngineInput::Live(LiveInput::GardenDecision { epoch, gardens }));
            });
        } else {
            if !self.active_peers.contains_key(&chosen) {
                let info = self.peer_info(&chosen);
                self.active_peers.insert(chosen, info);
            }
            self.set_state(LiveState::Follower);
        }
    }

    async fn on_session_start(&mut self, from: &PeerId, gardens: Vec<String>) {
        if from == self.local_id() {
            return;
        }
        match self.state {
            LiveState::Disabled => {}
            LiveState::Follower if self.host_id.as_ref() == Some(from) => {
                if self.session_started {
                    return;
                }
                info!(host = %from.short(), gardens = ?gardens, "Live session started");
                self.syncable_gardens = gardens;
                self.session_started = true;
                self.memory.remember(from.clone(), &self.syncable_gardens);
                self.request_snapshot().await;
            }
            _ if !self.session_started => self.adopt(from.clone(), gardens).await,
            _ => warn!(peer = %from.short(), "Second session start ignored"),
        }
    }

    async fn on_peer_disabled(&mut self, peer: PeerId) {
        self.pending_peers.remove(&peer);
        self.active_peers.remove(&peer);
        if self.state != LiveState::Disabled && self.host_id.as_ref() == Some(&peer) {
            info!(host = %peer.short(), "Host left live sync, re-electing");
            self.restart(true).await;
        }
    }

    async fn request_snapshot(&mut self) {
        let Some(host) = self.host_id.clone() else {
            return;
        };
        if self.syncable_gardens.is_empty() {
            self.activate_follower(host).await;
            return;
        }
        self.awaiting_snapshot = true;
        self.progress(Progress::info(format!(
            "Fetching {} from host {}",
            self.syncable_gardens.join(", "),
            host.short()
        )));
        self.router.send(
            Message::RequestGardens {
                gardens: self.syncable_gardens.clone(),
            },
            Some(&host),
            None,
            false,
        );
    }

    async fn activate_follower(&mut self, host: PeerId) {
        self.progress(Progress::complete("Live sync active"));
        self.replicas
            .activate(ReplicaRole::Follower { host }, self.syncable_gardens.clone())
            .await;
    }
}

//! CRDT document replicas for live sync
//!
//! Each open document in a syncable garden gets one [`DocumentReplica`]
//! wrapping an Automerge document whose root holds a single `content` text
//! object.
//!
//! - On the host, a replica is seeded from the content store.
//! - On a follower, it starts empty and asks the host for a full
//!   `DocState`; creating the text object locally would fork the document.
//! - The host keeps a replica until the session ends, even after its own
//!   last pane closes, since followers may still be editing it. Reseeding
//!   would create a second text object and the two sides would stop
//!   converging.
//!
//! Local edits produce incremental updates that are broadcast directly (not
//! gossiped) as `YjsUpdate`. Both local and remote changes feed a debounced
//! save; only local ones are broadcast, which keeps updates from echoing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use automerge::{transaction::Transactable, AutoCommit, ObjId, ObjType, ReadDoc, Value, ROOT};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::engine::EngineInput;
use crate::error::{SyncError, SyncResult};
use crate::live::LiveInput;
use crate::store::ContentStore;
use crate::sync::events::{Progress, SyncEvent};
use crate::sync::protocol::Message;
use crate::sync::router::MessageRouter;
use crate::types::{DocKey, PeerId};

const CONTENT_KEY: &str = "content";

/// Where a change to a replica came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// Typed on this device: broadcast and save
    Local,
    /// Received from a peer: save only
    Remote,
}

/// One CRDT-backed replica of a live document
pub struct DocumentReplica {
    key: DocKey,
    doc: AutoCommit,
    content: Option<ObjId>,
}

impl std::fmt::Debug for DocumentReplica {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentReplica")
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl DocumentReplica {
    /// Host-side replica seeded with the stored text
    pub fn seeded(key: DocKey, text: &str) -> SyncResult<Self> {
        let mut doc = AutoCommit::new();
        let content = doc.put_object(ROOT, CONTENT_KEY, ObjType::Text)?;
        doc.splice_text(&content, 0, 0, text)?;
        // The seed travels in DocState snapshots, never as an update.
        let _ = doc.save_incremental();
        Ok(Self {
            key,
            doc,
            content: Some(content),
        })
    }

    /// Follower-side replica waiting for the host's snapshot
    pub fn empty(key: DocKey) -> Self {
        Self {
            key,
            doc: AutoCommit::new(),
            content: None,
        }
    }

    /// Document key
    pub fn key(&self) -> &DocKey {
        &self.key
    }

    /// Whether the text object exists (seeded or bootstrapped)
    pub fn is_ready(&self) -> bool {
        self.content.is_some()
    }

    /// Current text; empty until bootstrapped
    pub fn text(&self) -> SyncResult<String> {
        match &self.content {
            Some(content) => Ok(self.doc.text(content)?),
            None => Ok(String::new()),
        }
    }

    /// Replace the text with `text` and return the update to broadcast.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidOperation` before the replica is ready.
    pub fn replace_text(&mut self, text: &str) -> SyncResult<Vec<u8>> {
        let content = self.content.clone().ok_or_else(|| {
            SyncError::InvalidOperation(format!("{} is waiting for the host's state", self.key))
        })?;
        self.doc.update_text(&content, text)?;
        Ok(self.doc.save_incremental())
    }

    /// Apply a remote update or a full snapshot
    pub fn apply(&mut self, update: &[u8]) -> SyncResult<()> {
        self.doc.load_incremental(update)?;
        // Move the incremental cursor past remote changes so they are not
        // re-broadcast with the next local edit.
        let _ = self.doc.save_incremental();
        if self.content.is_none() {
            if let Some((Value::Object(ObjType::Text), id)) = self.doc.get(ROOT, CONTENT_KEY)? {
                self.content = Some(id);
            }
        }
        Ok(())
    }

    /// Full document state for a `DocState` reply
    pub fn snapshot(&mut self) -> Vec<u8> {
        self.doc.save()
    }
}

/// Which side of the session this device's replicas are on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaRole {
    /// Replicas seed from the store and answer `RequestDocState`
    Host,
    /// Replicas bootstrap from the host
    Follower {
        /// The session host
        host: PeerId,
    },
}

/// Live documents of this device, keyed by `garden#path`
pub struct ReplicaSet<S: ContentStore> {
    router: MessageRouter,
    store: Arc<S>,
    events: broadcast::Sender<SyncEvent>,
    inputs: mpsc::UnboundedSender<EngineInput>,
    debounce: Duration,
    role: Option<ReplicaRole>,
    gardens: HashSet<String>,
    panes: HashMap<DocKey, usize>,
    replicas: HashMap<DocKey, DocumentReplica>,
    dirty: HashSet<DocKey>,
    save_epochs: HashMap<DocKey, u64>,
    next_epoch: u64,
}

impl<S: ContentStore> ReplicaSet<S> {
    pub(crate) fn new(
        router: MessageRouter,
        store: Arc<S>,
        events: broadcast::Sender<SyncEvent>,
        inputs: mpsc::UnboundedSender<EngineInput>,
        debounce: Duration,
    ) -> Self {
        Self {
            router,
            store,
            events,
            inputs,
            debounce,
            role: None,
            gardens: HashSet::new(),
            panes: HashMap::new(),
            replicas: HashMap::new(),
            dirty: HashSet::new(),
            save_epochs: HashMap::new(),
            next_epoch: 1,
        }
    }

    /// Whether replicas are running
    pub fn is_active(&self) -> bool {
        self.role.is_some()
    }

    /// Role replicas were activated with
    pub fn role(&self) -> Option<&ReplicaRole> {
        self.role.as_ref()
    }

    /// Keys with at least one open pane, sorted
    pub fn open_documents(&self) -> Vec<DocKey> {
        let mut keys: Vec<DocKey> = self.panes.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether a replica exists for `key`
    pub fn has_replica(&self, key: &DocKey) -> bool {
        self.replicas.contains_key(key)
    }

    fn is_syncable(&self, key: &DocKey) -> bool {
        self.gardens.contains(&key.garden)
    }

    /// Start replicating the open documents of `gardens`
    pub async fn activate(&mut self, role: ReplicaRole, gardens: impl IntoIterator<Item = String>) {
        self.gardens = gardens.into_iter().collect();
        info!(role = ?role, gardens = ?self.gardens, "Activating live replicas");
        self.role = Some(role);
        for key in self.open_documents() {
            if self.is_syncable(&key) {
                self.create(key).await;
            }
        }
    }

    /// Save unsaved replicas and drop them all
    pub async fn teardown(&mut self) {
        let dirty: Vec<DocKey> = self.dirty.iter().cloned().collect();
        for key in dirty {
            self.save(&key).await;
        }
        if !self.replicas.is_empty() {
            info!(count = self.replicas.len(), "Tearing down live replicas");
        }
        self.replicas.clear();
        self.save_epochs.clear();
        self.gardens.clear();
        self.role = None;
    }

    async fn create(&mut self, key: DocKey) {
        let replica = match self.role.clone() {
            Some(ReplicaRole::Host) => {
                let text = match self.store.read_file(&key.garden, &key.path).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(SyncError::NotFound(_)) => String::new(),
                    Err(e) => {
                        warn!(%key, error = %e, "Cannot seed replica");
                        return;
                    }
                };
                match DocumentReplica::seeded(key.clone(), &text) {
                    Ok(replica) => replica,
                    Err(e) => {
                        warn!(%key, error = %e, "Cannot seed replica");
                        return;
                    }
                }
            }
            Some(ReplicaRole::Follower { host }) => {
                self.router.send(
                    Message::LiveSyncRequestDocState {
                        garden: key.garden.clone(),
                        path: key.path.clone(),
                    },
                    Some(&host),
                    None,
                    false,
                );
                DocumentReplica::empty(key.clone())
            }
            None => return,
        };
        debug!(%key, ready = replica.is_ready(), "Replica created");
        self.replicas.insert(key, replica);
    }

    /// A pane opened `key`
    pub async fn open(&mut self, key: DocKey) {
        let panes = self.panes.entry(key.clone()).or_insert(0);
        *panes += 1;
        debug!(%key, panes = *panes, "Document opened");
        if self.is_active() && self.is_syncable(&key) && !self.replicas.contains_key(&key) {
            self.create(key).await;
        }
    }

    /// A pane closed `key`.
    ///
    /// A follower drops its replica with the last pane; the host keeps it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidOperation` if `key` is not open.
    pub async fn close(&mut self, key: &DocKey) -> SyncResult<()> {
        let panes = self
            .panes
            .get_mut(key)
            .ok_or_else(|| SyncError::InvalidOperation(format!("{} is not open", key)))?;
        *panes -= 1;
        if *panes > 0 {
            debug!(%key, panes = *panes, "Pane closed, replica kept");
            return Ok(());
        }
        self.panes.remove(key);
        if self.dirty.contains(key) {
            self.save(key).await;
        }
        if self.role == Some(ReplicaRole::Host) && self.replicas.contains_key(key) {
            debug!(%key, "Last pane closed, host replica kept");
            return Ok(());
        }
        self.save_epochs.remove(key);
        if self.replicas.remove(key).is_some() {
            debug!(%key, "Replica dropped");
        }
        Ok(())
    }

    /// Replace a document's text locally
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidOperation` if the document is not live or
    /// is still waiting for the host's state.
    pub fn edit(&mut self, key: &DocKey, text: &str) -> SyncResult<()> {
        let replica = self
            .replicas
            .get_mut(key)
            .ok_or_else(|| SyncError::InvalidOperation(format!("{} is not a live document", key)))?;
        let update = replica.replace_text(text)?;
        self.changed(key.clone(), update, UpdateOrigin::Local);
        Ok(())
    }

    /// Current text of a live document
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if no replica exists for `key`.
    pub fn text(&self, key: &DocKey) -> SyncResult<String> {
        self.replicas
            .get(key)
            .ok_or_else(|| SyncError::NotFound(format!("live document {}", key)))?
            .text()
    }

    /// Apply a peer's `YjsUpdate`
    ///
    /// The host creates the replica on demand so no follower edit is lost.
    pub async fn handle_update(&mut self, from: &PeerId, key: DocKey, update: &[u8]) {
        if self.role == Some(ReplicaRole::Host)
            && self.is_syncable(&key)
            && !self.replicas.contains_key(&key)
        {
            self.create(key.clone()).await;
        }
        let Some(replica) = self.replicas.get_mut(&key) else {
            trace!(%key, peer = %from.short(), "Update for a document not open here");
            return;
        };
        match replica.apply(update) {
            Ok(()) => self.changed(key, Vec::new(), UpdateOrigin::Remote),
            Err(e) => warn!(%key, peer = %from.short(), error = %e, "Discarding bad update"),
        }
    }

    /// Host: answer a follower's `RequestDocState`
    pub async fn handle_request_doc_state(&mut self, from: &PeerId, key: DocKey) {
        if self.role != Some(ReplicaRole::Host) || !self.is_syncable(&key) {
            debug!(%key, peer = %from.short(), "Ignoring doc state request");
            return;
        }
        if !self.replicas.contains_key(&key) {
            self.create(key.clone()).await;
        }
        let Some(replica) = self.replicas.get_mut(&key) else {
            return;
        };
        let state = replica.snapshot();
        debug!(%key, peer = %from.short(), bytes = state.len(), "Serving doc state");
        self.router.send(
            Message::LiveSyncDocState {
                garden: key.garden,
                path: key.path,
                state,
            },
            Some(from),
            None,
            false,
        );
    }

    /// Follower: bootstrap from the host's `DocState`
    pub fn handle_doc_state(&mut self, from: &PeerId, key: DocKey, state: &[u8]) {
        let Some(replica) = self.replicas.get_mut(&key) else {
            debug!(%key, "Doc state for a closed document");
            return;
        };
        match replica.apply(state) {
            Ok(()) => {
                debug!(%key, peer = %from.short(), "Replica bootstrapped");
                let _ = self.events.send(SyncEvent::DocumentChanged { key });
            }
            Err(e) => warn!(%key, error = %e, "Discarding bad doc state"),
        }
    }

    fn changed(&mut self, key: DocKey, update: Vec<u8>, origin: UpdateOrigin) {
        match origin {
            UpdateOrigin::Local => {
                self.router.send(
                    Message::LiveSyncYjsUpdate {
                        garden: key.garden.clone(),
                        path: key.path.clone(),
                        update,
                    },
                    None,
                    None,
                    false,
                );
            }
            UpdateOrigin::Remote => {
                let _ = self.events.send(SyncEvent::DocumentChanged { key: key.clone() });
            }
        }
        self.dirty.insert(key.clone());
        self.schedule_save(key);
    }

    fn schedule_save(&mut self, key: DocKey) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.save_epochs.insert(key.clone(), epoch);

        let inputs = self.inputs.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = inputs.send(EngineInput::Live(LiveInput::SaveDue { key, epoch }));
        });
    }

    /// Debounce timer fired; saves only if no newer change rescheduled it
    pub async fn on_save_due(&mut self, key: DocKey, epoch: u64) {
        if self.save_epochs.get(&key) != Some(&epoch) {
            trace!(%key, epoch, "Superseded save timer");
            return;
        }
        self.save_epochs.remove(&key);
        self.save(&key).await;
    }

    async fn save(&mut self, key: &DocKey) {
        self.dirty.remove(key);
        let Some(replica) = self.replicas.get(key) else {
            return;
        };
        if !replica.is_ready() {
            return;
        }
        let text = match replica.text() {
            Ok(text) => text,
            Err(e) => {
                warn!(%key, error = %e, "Cannot read replica text");
                return;
            }
        };
        match self
            .store
            .write_file(&key.garden, &key.path, text.as_bytes())
            .await
        {
            Ok(()) => debug!(%key, bytes = text.len(), "Live document saved"),
            Err(e) => {
                warn!(%key, error = %e, "Saving live document failed");
                let _ = self.events.send(SyncEvent::Progress(Progress::error(format!(
                    "Failed to save {}: {}",
                    key, e
                ))));
            }
        }
    }
}

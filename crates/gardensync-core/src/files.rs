//! Bulk garden transfer and incremental file updates
//!
//! ## Send side
//!
//! [`FileSyncCoordinator::send_gardens`] announces the transfer with
//! `SendInitiation`, then spawns a task that, per garden, compresses every
//! file (history included) into one archive and streams it as fixed-size
//! `GardenZipChunk`s. Before each chunk the task waits for the target's
//! channel to drain below the high-water mark. Cancellation is checked
//! before every garden and every chunk.
//!
//! ## Receive side
//!
//! ```text
//! SendInitiation ──► Receiving ──► chunks buffered by index
//!                        │
//!   GardenZipComplete ───┤──► count mismatch: abandon transfer, error event
//!                        └──► archive queued for the writer task
//!                             (history wiped once per garden per session)
//!
//! barrier: FullSyncComplete seen for every initiated transfer
//!          && no pending writes && no active transfers
//!          && session neither failed nor cancelled
//! ```
//!
//! The barrier is re-checked after every write completion and every
//! transfer completion. When it passes the session resets to `Idle`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::engine::EngineInput;
use crate::error::{SyncError, SyncResult};
use crate::store::{embedded_timestamp, ContentStore, MISSING_TIMESTAMP};
use crate::sync::events::{Progress, SyncEvent};
use crate::sync::protocol::Message;
use crate::sync::router::MessageRouter;
use crate::types::{PeerId, TransferId};

/// Upper bound on `total_chunks` accepted from a peer
pub const MAX_TOTAL_CHUNKS: u32 = 1 << 20;

/// Split an archive into chunks of at most `chunk_size` bytes.
///
/// An empty archive still yields one (empty) chunk so every garden sends at
/// least one `GardenZipChunk`.
pub fn split_chunks(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![data];
    }
    data.chunks(chunk_size.max(1)).collect()
}

/// Index-addressed buffer for one garden transfer
#[derive(Debug, Clone)]
pub struct ChunkAssembly {
    chunks: Vec<Option<Vec<u8>>>,
    received: u32,
    zip_size: u64,
}

impl ChunkAssembly {
    /// Create an empty buffer expecting `total_chunks` slices
    pub fn new(total_chunks: u32, zip_size: u64) -> Self {
        Self {
            chunks: vec![None; total_chunks as usize],
            received: 0,
            zip_size,
        }
    }

    /// Number of slices the sender announced
    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    /// Number of distinct slices buffered
    pub fn received(&self) -> u32 {
        self.received
    }

    /// Announced size of the whole archive
    pub fn zip_size(&self) -> u64 {
        self.zip_size
    }

    /// Whether every slice has arrived
    pub fn is_complete(&self) -> bool {
        self.received == self.total_chunks()
    }

    /// Buffer one slice. Returns `true` if the index was new.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Protocol` if `index` is out of range.
    pub fn insert(&mut self, index: u32, data: Vec<u8>) -> SyncResult<bool> {
        let total = self.chunks.len();
        let slot = self.chunks.get_mut(index as usize).ok_or_else(|| {
            SyncError::Protocol(format!(
                "chunk index {} out of range (total {})",
                index, total
            ))
        })?;
        let fresh = slot.is_none();
        *slot = Some(data);
        if fresh {
            self.received += 1;
        }
        Ok(fresh)
    }

    /// Concatenate the slices in index order, if all are present
    pub fn assemble(self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        // Sized from what arrived; the announced zip_size is peer input.
        let len = self.chunks.iter().flatten().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk?);
        }
        Some(out)
    }
}

/// How an outgoing transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Every garden reached at least one target
    Completed,
    /// Stopped by a local or remote cancel
    Cancelled,
}

/// State of the receive session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Nothing being received
    Idle,
    /// A bulk receive is in progress
    Receiving,
    /// A critical error occurred; only a resend recovers
    Failed,
    /// The sender or the local user cancelled
    Cancelled,
}

/// Completion barrier result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveFinished {
    /// Gardens written during the session, sorted
    pub gardens: Vec<String>,
    /// Peers that sent data during the session, sorted
    pub sources: Vec<PeerId>,
}

/// Results of background work, fed back through the engine inbox
#[derive(Debug)]
pub enum FileSyncInput {
    /// The writer task finished extracting one garden archive
    WriteFinished {
        /// Receive session the write belongs to
        generation: u64,
        /// Garden written
        garden: String,
        /// Transfer that carried the archive
        transfer_id: TransferId,
        /// Paths written, or the failure
        result: SyncResult<Vec<String>>,
    },
    /// An outgoing transfer task ended
    SendFinished {
        /// The transfer
        transfer_id: TransferId,
        /// How it ended
        result: SyncResult<SendOutcome>,
    },
}

struct OutgoingTransfer {
    targets: Vec<PeerId>,
    cancel: CancellationToken,
}

struct WriteJob {
    generation: u64,
    garden: String,
    transfer_id: TransferId,
    archive: Vec<u8>,
    wipe_history: bool,
}

struct ReceiveSession {
    generation: u64,
    status: ReceiveStatus,
    initiated: HashMap<TransferId, PeerId>,
    completed: HashSet<TransferId>,
    transfers: HashMap<(String, TransferId), ChunkAssembly>,
    pending_writes: usize,
    wiped: HashSet<String>,
    written: BTreeSet<String>,
}

impl ReceiveSession {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            status: ReceiveStatus::Idle,
            initiated: HashMap::new(),
            completed: HashSet::new(),
            transfers: HashMap::new(),
            pending_writes: 0,
            wiped: HashSet::new(),
            written: BTreeSet::new(),
        }
    }

    fn full_sync_complete(&self) -> bool {
        !self.initiated.is_empty() && self.initiated.keys().all(|t| self.completed.contains(t))
    }

    fn barrier_open(&self) -> bool {
        self.status == ReceiveStatus::Receiving
            && self.full_sync_complete()
            && self.pending_writes == 0
            && self.transfers.is_empty()
    }
}

/// Orchestrates bulk garden sends/receives and incremental file updates
pub struct FileSyncCoordinator<S: ContentStore> {
    router: MessageRouter,
    store: Arc<S>,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    inputs: mpsc::UnboundedSender<EngineInput>,
    outgoing: HashMap<TransferId, OutgoingTransfer>,
    session: ReceiveSession,
    next_generation: u64,
    writer: Option<mpsc::UnboundedSender<WriteJob>>,
}

impl<S: ContentStore> FileSyncCoordinator<S> {
    /// Create a coordinator; background results are posted to `inputs`
    pub(crate) fn new(
        router: MessageRouter,
        store: Arc<S>,
        config: SyncConfig,
        events: broadcast::Sender<SyncEvent>,
        inputs: mpsc::UnboundedSender<EngineInput>,
    ) -> Self {
        Self {
            router,
            store,
            config,
            events,
            inputs,
            outgoing: HashMap::new(),
            session: ReceiveSession::new(0),
            next_generation: 1,
            writer: None,
        }
    }

    /// Current receive session state
    pub fn receive_status(&self) -> ReceiveStatus {
        self.session.status
    }

    /// Number of outgoing transfers still running
    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn progress(&self, progress: Progress) {
        self.emit(SyncEvent::Progress(progress));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Send side
    // ═══════════════════════════════════════════════════════════════════════

    /// Start a bulk send of `gardens` to `targets` (every open peer if empty)
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidOperation` if there is nothing to send or
    /// nobody to send it to.
    pub fn send_gardens(
        &mut self,
        gardens: Vec<String>,
        targets: Vec<PeerId>,
    ) -> SyncResult<TransferId> {
        if gardens.is_empty() {
            return Err(SyncError::InvalidOperation("no gardens selected".into()));
        }
        let targets = if targets.is_empty() {
            self.router.registry().open_peers()
        } else {
            targets
        };
        if targets.is_empty() {
            return Err(SyncError::InvalidOperation("no connected peers".into()));
        }

        let transfer_id = TransferId::new();
        for target in &targets {
            self.router.send(
                Message::SendInitiation {
                    gardens: gardens.clone(),
                    transfer_id,
                },
                Some(target),
                None,
                false,
            );
        }

        info!(%transfer_id, gardens = ?gardens, peers = targets.len(), "Starting bulk send");
        self.progress(
            Progress::info(format!(
                "Sending {} garden(s) to {} peer(s)",
                gardens.len(),
                targets.len()
            ))
            .for_transfer(transfer_id),
        );

        let cancel = CancellationToken::new();
        let task = SendTask {
            router: self.router.clone(),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            events: self.events.clone(),
            gardens,
            targets: targets.clone(),
            transfer_id,
            cancel: cancel.clone(),
        };
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = task.run().await;
            let _ = inputs.send(EngineInput::Files(FileSyncInput::SendFinished {
                transfer_id,
                result,
            }));
        });

        self.outgoing
            .insert(transfer_id, OutgoingTransfer { targets, cancel });
        Ok(transfer_id)
    }

    /// Ask `from` to bulk-send `gardens` to us
    pub fn request_gardens(&self, gardens: Vec<String>, from: &PeerId) {
        info!(peer = %from.short(), gardens = ?gardens, "Requesting gardens");
        self.progress(Progress::info(format!(
            "Requesting {} garden(s) from {}",
            gardens.len(),
            from.short()
        )));
        self.router
            .send(Message::RequestGardens { gardens }, Some(from), None, false);
    }

    /// Cancel a transfer in either direction and tell the other side
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if no such transfer is running.
    pub fn cancel_transfer(&mut self, transfer_id: TransferId) -> SyncResult<()> {
        if let Some(outgoing) = self.outgoing.get(&transfer_id) {
            outgoing.cancel.cancel();
            for target in &outgoing.targets {
                self.router
                    .send(Message::SyncCancel { transfer_id }, Some(target), None, false);
            }
            info!(%transfer_id, "Outgoing transfer cancel requested");
            return Ok(());
        }

        if self.session.status == ReceiveStatus::Receiving {
            if let Some(source) = self.session.initiated.get(&transfer_id).cloned() {
                self.router
                    .send(Message::SyncCancel { transfer_id }, Some(&source), None, false);
                self.cancel_receive(transfer_id);
                return Ok(());
            }
        }

        Err(SyncError::NotFound(format!("transfer {}", transfer_id)))
    }

    /// Broadcast an incremental file update (gossiped, LWW on receipt)
    pub fn send_file_update(&self, garden: String, path: String, content: Vec<u8>, timestamp: i64) {
        debug!(garden = %garden, path = %path, timestamp, "Broadcasting file update");
        self.router.send(
            Message::FileUpdate {
                garden,
                path,
                content,
                timestamp,
            },
            None,
            None,
            true,
        );
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Dispatch
    // ═══════════════════════════════════════════════════════════════════════

    /// Handle a file-sync message; returns the barrier result if it passed
    pub async fn handle_message(&mut self, from: &PeerId, message: Message) -> Option<ReceiveFinished> {
        match message {
            Message::RequestGardens { gardens } => {
                if let Err(e) = self.send_gardens(gardens, vec![from.clone()]) {
                    warn!(peer = %from.short(), error = %e, "Cannot serve garden request");
                    self.progress(Progress::error(format!("Cannot serve garden request: {}", e)));
                }
                None
            }
            Message::SendInitiation {
                gardens,
                transfer_id,
            } => {
                self.handle_send_initiation(from, gardens, transfer_id);
                None
            }
            Message::GardenZipChunk {
                garden,
                transfer_id,
                chunk_index,
                total_chunks,
                data,
                zip_size,
            } => {
                self.handle_chunk(from, garden, transfer_id, chunk_index, total_chunks, data, zip_size);
                None
            }
            Message::GardenZipComplete {
                garden,
                transfer_id,
            } => self.handle_zip_complete(garden, transfer_id),
            Message::FullSyncComplete { transfer_id } => {
                self.handle_full_sync_complete(from, transfer_id)
            }
            Message::SyncCancel { transfer_id } => {
                self.handle_cancel(from, transfer_id);
                None
            }
            Message::FileUpdate {
                garden,
                path,
                content,
                timestamp,
            } => {
                if let Err(e) = self.handle_file_update(&garden, &path, &content, timestamp).await {
                    error!(garden = %garden, path = %path, error = %e, "File update failed");
                    let err = SyncError::Handler(format!(
                        "applying update to {}/{}: {}",
                        garden, path, e
                    ));
                    if self.session.status == ReceiveStatus::Receiving {
                        self.fail_session(err);
                    } else {
                        self.progress(Progress::error(err.to_string()));
                    }
                }
                None
            }
            other => {
                warn!(kind = other.kind(), "Message is not for file sync");
                None
            }
        }
    }

    /// Handle a background result; returns the barrier result if it passed
    pub fn handle_input(&mut self, input: FileSyncInput) -> Option<ReceiveFinished> {
        match input {
            FileSyncInput::WriteFinished {
                generation,
                garden,
                transfer_id,
                result,
            } => self.on_write_finished(generation, garden, transfer_id, result),
            FileSyncInput::SendFinished {
                transfer_id,
                result,
            } => {
                self.on_send_finished(transfer_id, result);
                None
            }
        }
    }

    /// React to a peer leaving: a receive still waiting on it fails
    pub fn on_peer_left(&mut self, peer: &PeerId) {
        if self.session.status != ReceiveStatus::Receiving {
            return;
        }
        let abandoned = self
            .session
            .initiated
            .iter()
            .any(|(t, p)| p == peer && !self.session.completed.contains(t));
        if abandoned {
            self.fail_session(SyncError::Transport(format!(
                "sender {} disconnected mid-transfer",
                peer.short()
            )));
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Receive side
    // ═══════════════════════════════════════════════════════════════════════

    fn start_session(&mut self) {
        self.session = ReceiveSession::new(self.next_generation);
        self.next_generation += 1;
        self.session.status = ReceiveStatus::Receiving;
        debug!(generation = self.session.generation, "Receive session started");
    }

    fn handle_send_initiation(&mut self, from: &PeerId, gardens: Vec<String>, transfer_id: TransferId) {
        if self.session.status != ReceiveStatus::Receiving {
            self.start_session();
        }
        self.session.initiated.insert(transfer_id, from.clone());
        info!(%transfer_id, peer = %from.short(), gardens = ?gardens, "Incoming bulk send");
        self.progress(
            Progress::info(format!(
                "Receiving {} from {}",
                gardens.join(", "),
                from.short()
            ))
            .for_transfer(transfer_id),
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_chunk(
        &mut self,
        from: &PeerId,
        garden: String,
        transfer_id: TransferId,
        chunk_index: u32,
        total_chunks: u32,
        data: Vec<u8>,
        zip_size: u64,
    ) {
        if self.session.status != ReceiveStatus::Receiving {
            if self.session.initiated.contains_key(&transfer_id) {
                debug!(%transfer_id, status = ?self.session.status, "Dropping chunk for stopped session");
                return;
            }
            self.start_session();
        }
        self.session
            .initiated
            .entry(transfer_id)
            .or_insert_with(|| from.clone());

        if total_chunks == 0 || total_chunks > MAX_TOTAL_CHUNKS {
            warn!(%transfer_id, total_chunks, "Discarding chunk with invalid total");
            return;
        }

        let assembly = self
            .session
            .transfers
            .entry((garden.clone(), transfer_id))
            .or_insert_with(|| ChunkAssembly::new(total_chunks, zip_size));
        if assembly.total_chunks() != total_chunks {
            warn!(%transfer_id, garden = %garden, total_chunks, "Discarding chunk with inconsistent total");
            return;
        }
        match assembly.insert(chunk_index, data) {
            Ok(true) if assembly.received() == 1 => {
                let message = format!(
                    "Receiving garden {} ({} chunk(s), {} bytes)",
                    garden, total_chunks, zip_size
                );
                self.progress(Progress::info(message).for_transfer(transfer_id));
            }
            Ok(_) => {}
            Err(e) => warn!(%transfer_id, garden = %garden, error = %e, "Discarding chunk"),
        }
    }

    fn handle_zip_complete(&mut self, garden: String, transfer_id: TransferId) -> Option<ReceiveFinished> {
        if self.session.status != ReceiveStatus::Receiving {
            debug!(%transfer_id, garden = %garden, "Ignoring completion for stopped session");
            return None;
        }

        let Some(assembly) = self.session.transfers.remove(&(garden.clone(), transfer_id)) else {
            warn!(%transfer_id, garden = %garden, "Completion for unknown transfer");
            self.progress(
                Progress::error(format!("Garden {} completed without any chunks", garden))
                    .for_transfer(transfer_id),
            );
            return self.check_barrier();
        };

        let expected = assembly.total_chunks();
        let received = assembly.received();
        let Some(archive) = assembly.assemble() else {
            let err = SyncError::TransferIntegrity {
                garden,
                transfer_id,
                expected,
                received,
            };
            warn!(error = %err, "Abandoning transfer");
            self.progress(Progress::error(err.to_string()).for_transfer(transfer_id));
            return self.check_barrier();
        };

        let wipe_history = self.session.wiped.insert(garden.clone());
        self.session.pending_writes += 1;
        let job = WriteJob {
            generation: self.session.generation,
            garden: garden.clone(),
            transfer_id,
            archive,
            wipe_history,
        };
        if self.writer().send(job).is_err() {
            self.session.pending_writes -= 1;
            self.fail_session(SyncError::Handler(format!(
                "writer stopped before garden {} was written",
                garden
            )));
        }
        self.check_barrier()
    }

    fn handle_full_sync_complete(&mut self, from: &PeerId, transfer_id: TransferId) -> Option<ReceiveFinished> {
        if self.session.status != ReceiveStatus::Receiving {
            debug!(%transfer_id, "Ignoring full-sync completion for stopped session");
            return None;
        }
        self.session
            .initiated
            .entry(transfer_id)
            .or_insert_with(|| from.clone());
        self.session.completed.insert(transfer_id);
        debug!(%transfer_id, pending_writes = self.session.pending_writes, "Sender finished");
        self.check_barrier()
    }

    fn handle_cancel(&mut self, from: &PeerId, transfer_id: TransferId) {
        if let Some(outgoing) = self.outgoing.get(&transfer_id) {
            info!(%transfer_id, peer = %from.short(), "Receiver cancelled our transfer");
            outgoing.cancel.cancel();
            return;
        }
        if self.session.status == ReceiveStatus::Receiving
            && self.session.initiated.contains_key(&transfer_id)
        {
            self.cancel_receive(transfer_id);
        }
    }

    fn cancel_receive(&mut self, transfer_id: TransferId) {
        info!(%transfer_id, "Receive session cancelled");
        self.session.status = ReceiveStatus::Cancelled;
        self.session.transfers.clear();
        self.progress(Progress::cancelled("Transfer cancelled").for_transfer(transfer_id));
    }

    /// Mark the session failed; its barrier never passes
    fn fail_session(&mut self, err: SyncError) {
        error!(generation = self.session.generation, error = %err, "Receive session failed");
        self.session.status = ReceiveStatus::Failed;
        self.session.transfers.clear();
        self.progress(Progress::error(format!("Sync failed: {}", err)));
    }

    fn on_write_finished(
        &mut self,
        generation: u64,
        garden: String,
        transfer_id: TransferId,
        result: SyncResult<Vec<String>>,
    ) -> Option<ReceiveFinished> {
        if generation != self.session.generation {
            debug!(generation, "Ignoring write from an earlier session");
            return None;
        }
        self.session.pending_writes = self.session.pending_writes.saturating_sub(1);

        match result {
            Ok(paths) => {
                info!(%transfer_id, garden = %garden, files = paths.len(), "Garden written");
                self.progress(
                    Progress::info(format!("Wrote {} file(s) to {}", paths.len(), garden))
                        .for_transfer(transfer_id),
                );
                self.session.written.insert(garden);
            }
            Err(e) => {
                if self.session.status == ReceiveStatus::Receiving {
                    self.fail_session(SyncError::Handler(format!(
                        "writing garden {} failed: {}",
                        garden, e
                    )));
                }
            }
        }
        self.check_barrier()
    }

    fn check_barrier(&mut self) -> Option<ReceiveFinished> {
        if !self.session.barrier_open() {
            return None;
        }
        let gardens: Vec<String> = self.session.written.iter().cloned().collect();
        let mut sources: Vec<PeerId> = self.session.initiated.values().cloned().collect();
        sources.sort();
        sources.dedup();

        info!(gardens = ?gardens, "Full sync finished");
        self.emit(SyncEvent::FullSyncFinished {
            gardens: gardens.clone(),
        });
        self.progress(Progress::complete(format!(
            "Sync complete: {} garden(s) updated",
            gardens.len()
        )));

        self.session = ReceiveSession::new(self.next_generation);
        self.next_generation += 1;
        Some(ReceiveFinished { gardens, sources })
    }

    fn writer(&mut self) -> &mpsc::UnboundedSender<WriteJob> {
        let store = Arc::clone(&self.store);
        let inputs = self.inputs.clone();
        self.writer.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_writer(store, rx, inputs));
            tx
        })
    }

    /// Apply an incremental update if it is not older than the local copy.
    ///
    /// Returns whether the content was written.
    async fn handle_file_update(
        &self,
        garden: &str,
        path: &str,
        content: &[u8],
        timestamp: i64,
    ) -> SyncResult<bool> {
        let local = match self.store.read_file(garden, path).await {
            Ok(data) => embedded_timestamp(&data).unwrap_or(MISSING_TIMESTAMP),
            Err(SyncError::NotFound(_)) => MISSING_TIMESTAMP,
            Err(e) => return Err(e),
        };
        if timestamp < local {
            debug!(garden, path, timestamp, local, "Rejecting stale file update");
            return Ok(false);
        }
        self.store.write_file(garden, path, content).await?;
        debug!(garden, path, timestamp, "Applied file update");
        self.emit(SyncEvent::FileUpdated {
            garden: garden.to_string(),
            path: path.to_string(),
            timestamp,
        });
        Ok(true)
    }

    fn on_send_finished(&mut self, transfer_id: TransferId, result: SyncResult<SendOutcome>) {
        let targets = self
            .outgoing
            .remove(&transfer_id)
            .map(|o| o.targets.len())
            .unwrap_or(0);
        match result {
            Ok(SendOutcome::Completed) => {
                info!(%transfer_id, "Bulk send finished");
                self.progress(
                    Progress::complete(format!("Sent to {} peer(s)", targets))
                        .for_transfer(transfer_id),
                );
            }
            Ok(SendOutcome::Cancelled) => {
                info!(%transfer_id, "Bulk send cancelled");
                self.progress(Progress::cancelled("Transfer cancelled").for_transfer(transfer_id));
            }
            Err(e) => {
                error!(%transfer_id, error = %e, "Bulk send failed");
                self.progress(Progress::error(format!("Send failed: {}", e)).for_transfer(transfer_id));
            }
        }
    }
}

async fn run_writer<S: ContentStore>(
    store: Arc<S>,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
    inputs: mpsc::UnboundedSender<EngineInput>,
) {
    while let Some(job) = jobs.recv().await {
        let result = write_garden(store.as_ref(), &job).await;
        let finished = FileSyncInput::WriteFinished {
            generation: job.generation,
            garden: job.garden,
            transfer_id: job.transfer_id,
            result,
        };
        if inputs.send(EngineInput::Files(finished)).is_err() {
            break;
        }
    }
}

async fn write_garden<S: ContentStore>(store: &S, job: &WriteJob) -> SyncResult<Vec<String>> {
    if job.wipe_history {
        info!(garden = %job.garden, "Replacing garden history");
        store.delete_history(&job.garden).await?;
    }
    store.extract_and_write(&job.garden, &job.archive).await
}

struct SendTask<S: ContentStore> {
    router: MessageRouter,
    store: Arc<S>,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    gardens: Vec<String>,
    targets: Vec<PeerId>,
    transfer_id: TransferId,
    cancel: CancellationToken,
}

impl<S: ContentStore> SendTask<S> {
    async fn run(mut self) -> SyncResult<SendOutcome> {
        let gardens = std::mem::take(&mut self.gardens);
        for garden in gardens {
            if self.cancel.is_cancelled() {
                return Ok(SendOutcome::Cancelled);
            }

            let archive = self
                .store
                .read_all_files_compressed(&garden, self.config.compression_level)
                .await?;
            let zip_size = archive.len() as u64;
            let chunks = split_chunks(&archive, self.config.chunk_size);
            let total_chunks = chunks.len() as u32;
            debug!(transfer_id = %self.transfer_id, garden = %garden, total_chunks, zip_size, "Streaming garden");

            for (index, chunk) in chunks.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    return Ok(SendOutcome::Cancelled);
                }
                let message = Message::GardenZipChunk {
                    garden: garden.clone(),
                    transfer_id: self.transfer_id,
                    chunk_index: index as u32,
                    total_chunks,
                    data: chunk.to_vec(),
                    zip_size,
                };
                self.deliver(message).await?;
            }

            self.deliver(Message::GardenZipComplete {
                garden: garden.clone(),
                transfer_id: self.transfer_id,
            })
            .await?;
            let _ = self.events.send(SyncEvent::Progress(
                Progress::info(format!("Sent garden {}", garden)).for_transfer(self.transfer_id),
            ));
        }

        self.deliver(Message::FullSyncComplete {
            transfer_id: self.transfer_id,
        })
        .await?;
        Ok(SendOutcome::Completed)
    }

    /// Send to every remaining target once its channel is below the
    /// high-water mark, dropping targets whose channel died.
    async fn deliver(&mut self, message: Message) -> SyncResult<()> {
        let mut lost = Vec::new();
        for target in &self.targets {
            if let Err(e) = self
                .router
                .wait_for_capacity(
                    target,
                    self.config.high_water_mark,
                    self.config.backpressure_poll,
                )
                .await
            {
                lost.push((target.clone(), e));
                continue;
            }
            if let Err(e) = self.router.send_to(message.clone(), target) {
                lost.push((target.clone(), e));
            }
        }

        for (peer, e) in lost {
            warn!(transfer_id = %self.transfer_id, peer = %peer.short(), error = %e, "Lost transfer target");
            let _ = self.events.send(SyncEvent::Progress(
                Progress::error(format!("Lost connection to {}", peer.short()))
                    .for_transfer(self.transfer_id),
            ));
            self.targets.retain(|t| t != &peer);
        }

        if self.targets.is_empty() {
            return Err(SyncError::Transport("every transfer target disconnected".into()));
        }
        Ok(())
    }
}

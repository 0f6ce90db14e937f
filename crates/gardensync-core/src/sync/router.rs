//! Message router: envelopes, dedup, gossip forwarding
//!
//! The router is the only component that hands frames to the registry's
//! channels. Outgoing payloads are wrapped in an [`Envelope`]; incoming
//! frames are decoded, deduplicated against the [`SeenMessageCache`],
//! re-flooded when the sender asked for gossip, and returned to the caller
//! for dispatch by [`Message::route`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{SyncError, SyncResult};
use crate::peers::PeerRegistry;
use crate::sync::envelope::Envelope;
use crate::sync::protocol::Message;
use crate::sync::seen::SeenMessageCache;
use crate::types::{MessageId, PeerId};

/// Wraps, sends, dedups and forwards envelopes
///
/// Cheap to clone; clones share the dedup window and the registry.
#[derive(Clone)]
pub struct MessageRouter {
    local_id: PeerId,
    registry: PeerRegistry,
    seen: Arc<Mutex<SeenMessageCache>>,
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("local_id", &self.local_id)
            .field("seen", &self.seen.lock().len())
            .finish()
    }
}

impl MessageRouter {
    /// Create a router for the local peer
    pub fn new(local_id: PeerId, registry: PeerRegistry, seen_capacity: usize) -> Self {
        Self {
            local_id,
            registry,
            seen: Arc::new(Mutex::new(SeenMessageCache::new(seen_capacity))),
        }
    }

    /// Id of the local peer
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Registry this router delivers through
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Best-effort send.
    ///
    /// With a `target`, delivers only to that peer (dropped and logged if
    /// its channel is not open). Without one, delivers to every open peer.
    /// A `message_id` is minted unless given; the id is recorded as seen so
    /// our own gossip is not processed when it floods back.
    pub fn send(
        &self,
        payload: Message,
        target: Option<&PeerId>,
        message_id: Option<MessageId>,
        use_gossip: bool,
    ) -> MessageId {
        let kind = payload.kind();
        let envelope = Envelope::new(self.local_id.clone(), payload, message_id, use_gossip);
        let id = envelope.message_id;
        self.seen.lock().insert(id);

        let frame = match envelope.to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind, error = %e, "Dropping unencodable message");
                return id;
            }
        };

        match target {
            Some(peer) => {
                if let Err(e) = self.registry.send_to(peer, frame) {
                    warn!(kind, peer = %peer.short(), error = %e, "Dropping send to closed channel");
                }
            }
            None => self.flood(frame, kind),
        }
        id
    }

    /// Send to one peer, reporting delivery failure to the caller.
    ///
    /// Used by chunked transfers, which need to know a target went away.
    pub fn send_to(&self, payload: Message, target: &PeerId) -> SyncResult<MessageId> {
        let envelope = Envelope::new(self.local_id.clone(), payload, None, false);
        let id = envelope.message_id;
        self.seen.lock().insert(id);
        self.registry.send_to(target, envelope.to_bytes()?)?;
        Ok(id)
    }

    /// Accept an inbound frame.
    ///
    /// Returns the envelope when it should be dispatched: malformed frames
    /// are logged and discarded, duplicates are discarded silently.
    pub fn receive(&self, source: &PeerId, frame: Bytes) -> Option<Envelope> {
        let envelope = match Envelope::from_bytes(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(source = %source.short(), error = %e, "Discarding malformed envelope");
                return None;
            }
        };

        if !self.seen.lock().insert(envelope.message_id) {
            trace!(id = %envelope.message_id, "Duplicate envelope ignored");
            return None;
        }

        if envelope.use_gossip {
            // Forward the original frame so the message id is preserved.
            self.flood(frame, envelope.payload.kind());
        }

        debug!(
            kind = envelope.payload.kind(),
            from = %envelope.from.short(),
            via = %source.short(),
            "Envelope accepted"
        );
        Some(envelope)
    }

    /// Whether an id is inside the dedup window
    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.seen.lock().contains(id)
    }

    /// Wait until a peer's channel buffers less than `high_water_mark`.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Transport` as soon as the peer's channel is gone.
    pub async fn wait_for_capacity(
        &self,
        peer: &PeerId,
        high_water_mark: usize,
        poll: Duration,
    ) -> SyncResult<()> {
        loop {
            if !self.registry.is_open(peer) {
                return Err(SyncError::Transport(format!(
                    "channel to {} closed",
                    peer.short()
                )));
            }
            let buffered = self.registry.buffered_bytes(peer)?;
            if buffered < high_water_mark {
                return Ok(());
            }
            trace!(peer = %peer.short(), buffered, "Waiting for channel to drain");
            tokio::time::sleep(poll).await;
        }
    }

    fn flood(&self, frame: Bytes, kind: &'static str) {
        for peer in self.registry.open_peers() {
            if let Err(e) = self.registry.send_to(&peer, frame.clone()) {
                warn!(kind, peer = %peer.short(), error = %e, "Dropping send to closed channel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::peers::tests::RecordingChannel;
    use crate::sync::protocol::Route;
    use crate::types::TransferId;

    fn router_with_peers(ids: &[&str]) -> (MessageRouter, Vec<Arc<RecordingChannel>>) {
        let registry = PeerRegistry::new();
        let channels = ids
            .iter()
            .map(|id| {
                let ch = Arc::new(RecordingChannel::default());
                registry.add_peer(PeerId::new(*id), ch.clone());
                ch
            })
            .collect();
        (MessageRouter::new(PeerId::new("me"), registry, 500), channels)
    }

    fn frame(from: &str, payload: Message, gossip: bool) -> (Envelope, Bytes) {
        let env = Envelope::new(PeerId::new(from), payload, None, gossip);
        let bytes = env.to_bytes().unwrap();
        (env, bytes)
    }

    #[test]
    fn test_targeted_send_reaches_only_target() {
        let (router, channels) = router_with_peers(&["a", "b"]);
        router.send(Message::LiveSyncReelect, Some(&PeerId::new("b")), None, false);
        assert_eq!(channels[0].frames.lock().len(), 0);
        assert_eq!(channels[1].frames.lock().len(), 1);
    }

    #[test]
    fn test_broadcast_reaches_all_open_peers() {
        let (router, channels) = router_with_peers(&["a", "b", "c"]);
        channels[2].closed.store(true, Ordering::SeqCst);
        router.send(Message::LiveSyncReelect, None, None, false);
        assert_eq!(channels[0].frames.lock().len(), 1);
        assert_eq!(channels[1].frames.lock().len(), 1);
        assert_eq!(channels[2].frames.lock().len(), 0);
    }

    #[test]
    fn test_send_to_closed_target_is_dropped() {
        let (router, channels) = router_with_peers(&["a"]);
        channels[0].closed.store(true, Ordering::SeqCst);
        router.send(Message::LiveSyncReelect, Some(&PeerId::new("a")), None, false);
        assert!(channels[0].frames.lock().is_empty());
        assert!(router
            .send_to(Message::LiveSyncReelect, &PeerId::new("a"))
            .is_err());
    }

    #[test]
    fn test_duplicate_delivery_dispatches_once() {
        let (router, _) = router_with_peers(&["a"]);
        let (_, bytes) = frame("a", Message::LiveSyncReelect, false);
        let dispatched = (0..5)
            .filter_map(|_| router.receive(&PeerId::new("a"), bytes.clone()))
            .count();
        assert_eq!(dispatched, 1);
    }

    #[test]
    fn test_gossip_forwards_with_original_id() {
        let (router, channels) = router_with_peers(&["a", "b"]);
        let (env, bytes) = frame(
            "a",
            Message::FullSyncComplete {
                transfer_id: TransferId::new(),
            },
            true,
        );
        router.receive(&PeerId::new("a"), bytes.clone()).unwrap();

        // Flooded to every open peer, sender included
        for ch in &channels {
            let frames = ch.frames.lock();
            assert_eq!(frames.len(), 1);
            let forwarded = Envelope::from_bytes(&frames[0]).unwrap();
            assert_eq!(forwarded.message_id, env.message_id);
            assert_eq!(forwarded.from, PeerId::new("a"));
        }

        // Second delivery is neither dispatched nor forwarded again
        assert!(router.receive(&PeerId::new("b"), bytes).is_none());
        assert_eq!(channels[1].frames.lock().len(), 1);
    }

    #[test]
    fn test_non_gossip_is_not_forwarded() {
        let (router, channels) = router_with_peers(&["a", "b"]);
        let (_, bytes) = frame("a", Message::LiveSyncReelect, false);
        let env = router.receive(&PeerId::new("a"), bytes).unwrap();
        assert_eq!(env.payload.route(), Route::LiveSync);
        assert!(channels[1].frames.lock().is_empty());
    }

    #[test]
    fn test_own_gossip_echo_is_ignored() {
        let (router, channels) = router_with_peers(&["a"]);
        router.send(Message::LiveSyncReelect, None, None, true);
        let echoed = channels[0].frames.lock()[0].clone();
        assert!(router.receive(&PeerId::new("a"), echoed).is_none());
    }

    #[test]
    fn test_malformed_frame_is_discarded() {
        let (router, _) = router_with_peers(&["a"]);
        assert!(router
            .receive(&PeerId::new("a"), Bytes::from_static(b"\x07garbage"))
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_capacity_blocks_until_drained() {
        let (router, channels) = router_with_peers(&["a"]);
        channels[0].buffered.store(100, Ordering::SeqCst);

        let ch = channels[0].clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            ch.buffered.store(10, Ordering::SeqCst);
        });

        let start = tokio::time::Instant::now();
        router
            .wait_for_capacity(&PeerId::new("a"), 50, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_capacity_fails_when_channel_closes() {
        let (router, channels) = router_with_peers(&["a"]);
        channels[0].buffered.store(100, Ordering::SeqCst);
        channels[0].closed.store(true, Ordering::SeqCst);
        let result = router
            .wait_for_capacity(&PeerId::new("a"), 50, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(SyncError::Transport(_))));
    }
}

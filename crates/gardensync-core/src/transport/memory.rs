//! In-process transport
//!
//! [`MemoryHub`] is a rendezvous keyed by session name. Joining a session
//! opens a duplex channel to every member already there. Each direction is
//! drained by its own pump task, so `buffered_bytes` reflects frames that
//! were queued but not yet handed to the remote engine. An optional
//! bandwidth cap makes the pump pace itself, which is what the backpressure
//! path needs to see a non-zero buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::TransportSink;
use crate::error::{SyncError, SyncResult};
use crate::peers::TransportChannel;
use crate::types::{ConnectionState, PeerId};

struct Side {
    id: PeerId,
    sink: TransportSink,
}

/// Shared open flag of one peer pair
struct Link {
    open: AtomicBool,
    a: Side,
    b: Side,
}

impl Link {
    fn involves(&self, id: &PeerId) -> bool {
        &self.a.id == id || &self.b.id == id
    }

    fn connects(&self, x: &PeerId, y: &PeerId) -> bool {
        (&self.a.id == x && &self.b.id == y) || (&self.a.id == y && &self.b.id == x)
    }

    /// One side hung up: only the other side hears about it
    fn close_from(&self, closer: &PeerId) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let other = if closer == &self.a.id { &self.b } else { &self.a };
        other.sink.state(closer.clone(), ConnectionState::Closed);
    }

    /// The link itself failed: both sides hear about it
    fn sever(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.a.sink.state(self.b.id.clone(), ConnectionState::Closed);
        self.b.sink.state(self.a.id.clone(), ConnectionState::Closed);
    }
}

/// One direction of a memory link
pub struct MemoryChannel {
    local: PeerId,
    tx: mpsc::UnboundedSender<Bytes>,
    buffered: Arc<AtomicUsize>,
    link: Arc<Link>,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("local", &self.local)
            .field("buffered", &self.buffered.load(Ordering::Relaxed))
            .field("open", &self.link.open.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransportChannel for MemoryChannel {
    fn send(&self, frame: Bytes) -> SyncResult<()> {
        if !self.is_open() {
            return Err(SyncError::Transport("memory channel closed".into()));
        }
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.tx.send(frame).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            SyncError::Transport("memory channel pump stopped".into())
        })
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.link.close_from(&self.local);
    }

    fn is_open(&self) -> bool {
        self.link.open.load(Ordering::SeqCst)
    }
}

fn spawn_direction(
    link: &Arc<Link>,
    from: PeerId,
    to: TransportSink,
    bandwidth: Option<u64>,
) -> Arc<MemoryChannel> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let buffered = Arc::new(AtomicUsize::new(0));
    let channel = Arc::new(MemoryChannel {
        local: from.clone(),
        tx,
        buffered: buffered.clone(),
        link: link.clone(),
    });

    let link = link.clone();
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Some(bytes_per_sec) = bandwidth.filter(|b| *b > 0) {
                let secs = frame.len() as f64 / bytes_per_sec as f64;
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
            }
            buffered.fetch_sub(frame.len(), Ordering::SeqCst);
            if !link.open.load(Ordering::SeqCst) {
                break;
            }
            if !to.message(from.clone(), frame) {
                break;
            }
        }
        debug!(from = %from.short(), "Memory pump stopped");
    });
    channel
}

#[derive(Default)]
struct HubInner {
    members: HashMap<String, Vec<Side>>,
    links: HashMap<String, Vec<Arc<Link>>>,
}

/// In-process rendezvous service
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
    bandwidth: Option<u64>,
}

impl std::fmt::Debug for MemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHub")
            .field("sessions", &self.inner.lock().members.len())
            .field("bandwidth", &self.bandwidth)
            .finish()
    }
}

impl MemoryHub {
    /// Hub with unpaced channels
    pub fn new() -> Self {
        Self::default()
    }

    /// Pace every channel to `bytes_per_sec`
    pub fn with_bandwidth(mut self, bytes_per_sec: u64) -> Self {
        self.bandwidth = Some(bytes_per_sec);
        self
    }

    /// Join `session` as `id`, opening a channel to every current member
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidOperation` if `id` is already a member.
    pub fn join(
        &self,
        session: &str,
        id: PeerId,
        sink: TransportSink,
    ) -> SyncResult<MemoryMembership> {
        let mut inner = self.inner.lock();
        let HubInner { members, links } = &mut *inner;
        let members = members.entry(session.to_string()).or_default();
        if members.iter().any(|m| m.id == id) {
            return Err(SyncError::InvalidOperation(format!(
                "{} already joined {}",
                id.short(),
                session
            )));
        }

        let session_links = links.entry(session.to_string()).or_default();
        for member in members.iter() {
            let link = Arc::new(Link {
                open: AtomicBool::new(true),
                a: Side {
                    id: member.id.clone(),
                    sink: member.sink.clone(),
                },
                b: Side {
                    id: id.clone(),
                    sink: sink.clone(),
                },
            });
            let to_new = spawn_direction(&link, member.id.clone(), sink.clone(), self.bandwidth);
            let to_member =
                spawn_direction(&link, id.clone(), member.sink.clone(), self.bandwidth);
            member.sink.opened(id.clone(), to_new);
            sink.opened(member.id.clone(), to_member);
            session_links.push(link);
        }
        info!(session, peer = %id.short(), others = members.len(), "Joined memory session");
        members.push(Side {
            id: id.clone(),
            sink,
        });

        Ok(MemoryMembership {
            hub: self.clone(),
            session: session.to_string(),
            id,
        })
    }

    /// Break the link between two members, as a network failure would
    pub fn disconnect(&self, session: &str, a: &PeerId, b: &PeerId) -> bool {
        let inner = self.inner.lock();
        let Some(links) = inner.links.get(session) else {
            return false;
        };
        match links.iter().find(|l| l.connects(a, b)) {
            Some(link) => {
                link.sever();
                true
            }
            None => false,
        }
    }

    fn leave(&self, session: &str, id: &PeerId) {
        let mut inner = self.inner.lock();
        if let Some(members) = inner.members.get_mut(session) {
            members.retain(|m| &m.id != id);
        }
        if let Some(links) = inner.links.get_mut(session) {
            links.retain(|link| {
                if link.involves(id) {
                    link.sever();
                    false
                } else {
                    true
                }
            });
        }
        info!(session, peer = %id.short(), "Left memory session");
    }

    /// Members of `session`
    pub fn members(&self, session: &str) -> Vec<PeerId> {
        self.inner
            .lock()
            .members
            .get(session)
            .map(|m| m.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default()
    }
}

/// Membership in a memory session; leaving closes every link
#[derive(Debug)]
pub struct MemoryMembership {
    hub: MemoryHub,
    session: String,
    id: PeerId,
}

impl MemoryMembership {
    /// Leave the session
    pub fn leave(self) {
        self.hub.leave(&self.session, &self.id);
    }
}

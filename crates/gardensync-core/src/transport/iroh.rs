//! QUIC transport over iroh
//!
//! - Rendezvous: an iroh-gossip topic derived from the session name. Peers
//!   on the topic see each other as gossip neighbors; no payloads are sent
//!   through gossip itself.
//! - Channel: on `NeighborUp` the peer with the smaller id dials the other
//!   on [`PEER_ALPN`] and opens one bi-directional stream. Frames on that
//!   stream are u32 big-endian length prefixed.
//!
//! A writer task drains each channel's queue, which is what
//! `buffered_bytes` measures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use iroh::discovery::static_provider::StaticProvider;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::{Endpoint, EndpointAddr, EndpointId, SecretKey};
use iroh_gossip::api::GossipSender;
use iroh_gossip::net::{Gossip, GOSSIP_ALPN};
use iroh_gossip::proto::TopicId;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::TransportSink;
use crate::error::{SyncError, SyncResult};
use crate::peers::TransportChannel;
use crate::types::{ConnectionState, PeerId};

/// ALPN of the peer channel protocol
pub const PEER_ALPN: &[u8] = b"gardensync/peer/1";

/// Largest frame accepted from a peer: 16 MiB
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Gossip topic used as the rendezvous for `session`
pub fn session_topic(session: &str) -> TopicId {
    let hash = blake3::hash(format!("gardensync/{session}").as_bytes());
    TopicId::from_bytes(*hash.as_bytes())
}

/// Write one length-prefixed frame. Empty frames are keepalives.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> SyncResult<()> {
    let len = u32::try_from(frame.len())
        .map_err(|_| SyncError::Protocol(format!("frame of {} bytes too large", frame.len())))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    Ok(())
}

/// Read one length-prefixed frame; `None` on a clean end of stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> SyncResult<Option<Bytes>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(SyncError::Protocol(format!(
            "frame of {len} bytes exceeds {MAX_FRAME_SIZE}"
        )));
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

fn peer_id(id: &EndpointId) -> PeerId {
    PeerId::new(id.to_string())
}

/// Fresh random endpoint secret key
pub fn generate_secret_key() -> [u8; 32] {
    SecretKey::generate(&mut rand::rng()).to_bytes()
}

/// Peer id an endpoint bound with `secret_key` will have
pub fn peer_id_for_key(secret_key: &[u8; 32]) -> PeerId {
    peer_id(&SecretKey::from(*secret_key).public())
}

/// One QUIC stream to a remote peer
pub struct IrohChannel {
    tx: mpsc::UnboundedSender<Bytes>,
    buffered: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
    conn: Connection,
}

impl std::fmt::Debug for IrohChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrohChannel")
            .field("remote", &self.conn.remote_id())
            .field("buffered", &self.buffered.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransportChannel for IrohChannel {
    fn send(&self, frame: Bytes) -> SyncResult<()> {
        if !self.is_open() {
            return Err(SyncError::Transport("quic channel closed".into()));
        }
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        self.tx.send(frame).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            SyncError::Transport("quic writer stopped".into())
        })
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.conn.close(0u32.into(), b"closed");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Peers with a running channel, shared by the dialer and the acceptor
type Connected = Arc<Mutex<HashSet<EndpointId>>>;

/// Run a channel until the stream ends
///
/// Reports `Opened` first and `Closed` last, unless the local side closed
/// the channel itself.
async fn run_channel(
    sink: TransportSink,
    connected: Connected,
    conn: Connection,
    mut send: iroh::endpoint::SendStream,
    mut recv: iroh::endpoint::RecvStream,
) {
    let remote_key = conn.remote_id();
    let remote = peer_id(&remote_key);
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let buffered = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicBool::new(true));
    let channel = Arc::new(IrohChannel {
        tx,
        buffered: buffered.clone(),
        open: open.clone(),
        conn: conn.clone(),
    });

    let writer = tokio::spawn({
        let remote = remote.clone();
        async move {
            while let Some(frame) = rx.recv().await {
                let len = frame.len();
                let result = write_frame(&mut send, &frame).await;
                buffered.fetch_sub(len, Ordering::SeqCst);
                if let Err(e) = result {
                    debug!(peer = %remote.short(), error = %e, "Channel write failed");
                    break;
                }
            }
            let _ = send.finish();
        }
    });

    sink.opened(remote.clone(), channel);
    info!(peer = %remote.short(), "Peer channel open");

    loop {
        match read_frame(&mut recv).await {
            Ok(Some(frame)) if frame.is_empty() => continue,
            Ok(Some(frame)) => {
                if !sink.message(remote.clone(), frame) {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(peer = %remote.short(), error = %e, "Channel read ended");
                break;
            }
        }
    }

    writer.abort();
    connected.lock().remove(&remote_key);
    if open.swap(false, Ordering::SeqCst) {
        conn.close(0u32.into(), b"eof");
        sink.state(remote.clone(), ConnectionState::Closed);
    }
    info!(peer = %remote.short(), "Peer channel closed");
}

/// Accepts channels dialed by peers with a smaller id
#[derive(Clone)]
struct PeerProtocol {
    sink: TransportSink,
    connected: Connected,
}

impl std::fmt::Debug for PeerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerProtocol").finish_non_exhaustive()
    }
}

impl ProtocolHandler for PeerProtocol {
    fn accept(
        &self,
        conn: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let sink = self.sink.clone();
        let connected = self.connected.clone();
        async move {
            let remote = conn.remote_id();
            debug!(peer = %remote, "Accepting peer channel");
            let (send, recv) = conn.accept_bi().await.map_err(|e| {
                error!(error = ?e, "Failed to accept peer stream");
                AcceptError::from_err(e)
            })?;
            connected.lock().insert(remote);
            run_channel(sink, connected, conn, send, recv).await;
            Ok(())
        }
    }
}

async fn dial(
    endpoint: Endpoint,
    sink: TransportSink,
    connected: Connected,
    remote: EndpointId,
) -> SyncResult<()> {
    let conn = endpoint
        .connect(remote, PEER_ALPN)
        .await
        .map_err(|e| SyncError::Network(format!("Failed to dial {}: {}", remote, e)))?;
    let (mut send, recv) = conn
        .open_bi()
        .await
        .map_err(|e| SyncError::Network(format!("Failed to open stream: {}", e)))?;
    // The acceptor only sees the stream once something is written on it
    write_frame(&mut send, &[]).await?;
    run_channel(sink, connected, conn, send, recv).await;
    Ok(())
}

/// iroh endpoint, gossip rendezvous and peer channels
pub struct IrohTransport {
    endpoint: Endpoint,
    gossip: Gossip,
    router: Router,
    static_provider: StaticProvider,
    secret_key: SecretKey,
    sink: TransportSink,
    connected: Connected,
    sessions: Mutex<HashMap<String, GossipSender>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for IrohTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrohTransport")
            .field("id", &self.endpoint.id())
            .finish_non_exhaustive()
    }
}

impl IrohTransport {
    /// Bind an endpoint
    ///
    /// Pass the saved secret key to keep the same peer id across runs.
    pub async fn bind(secret_key: Option<[u8; 32]>, sink: TransportSink) -> SyncResult<Self> {
        let secret_key = match secret_key {
            Some(bytes) => SecretKey::from(bytes),
            None => SecretKey::generate(&mut rand::rng()),
        };
        let static_provider = StaticProvider::new();

        let endpoint = Endpoint::builder()
            .secret_key(secret_key.clone())
            .alpns(vec![GOSSIP_ALPN.to_vec(), PEER_ALPN.to_vec()])
            .discovery(static_provider.clone())
            .bind()
            .await
            .map_err(|e| SyncError::Network(format!("Failed to bind endpoint: {}", e)))?;
        info!(endpoint_id = %endpoint.id(), "Endpoint bound");

        let gossip = Gossip::builder().spawn(endpoint.clone());
        let connected: Connected = Arc::default();
        let router = Router::builder(endpoint.clone())
            .accept(GOSSIP_ALPN, gossip.clone())
            .accept(
                PEER_ALPN,
                PeerProtocol {
                    sink: sink.clone(),
                    connected: connected.clone(),
                },
            )
            .spawn();

        Ok(Self {
            endpoint,
            gossip,
            router,
            static_provider,
            secret_key,
            sink,
            connected,
            sessions: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// This device's peer id
    pub fn peer_id(&self) -> PeerId {
        peer_id(&self.endpoint.id())
    }

    /// Secret key bytes, for persisting the identity
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.secret_key.to_bytes()
    }

    /// Current address of this endpoint
    pub fn endpoint_addr(&self) -> EndpointAddr {
        self.endpoint.addr()
    }

    /// Address as a shareable JSON ticket
    pub fn ticket(&self) -> SyncResult<String> {
        serde_json::to_string(&self.endpoint.addr())
            .map_err(|e| SyncError::Serialization(e.to_string()))
    }

    /// Make a peer reachable without external discovery
    pub fn add_peer_addr(&self, addr: EndpointAddr) {
        info!(peer = %addr.id, "Adding peer address to static discovery");
        self.static_provider.add_endpoint_info(addr);
    }

    /// Parse a ticket from [`ticket`](Self::ticket) and add it
    pub fn add_peer_ticket(&self, ticket: &str) -> SyncResult<EndpointId> {
        let addr: EndpointAddr =
            serde_json::from_str(ticket).map_err(|e| SyncError::Serialization(e.to_string()))?;
        let id = addr.id;
        self.add_peer_addr(addr);
        Ok(id)
    }

    /// Join the rendezvous for `session`
    ///
    /// Channels open in the background as neighbors appear.
    pub async fn join(&self, session: &str, bootstrap: Vec<EndpointId>) -> SyncResult<()> {
        let topic_id = session_topic(session);
        info!(session, peers = bootstrap.len(), "Joining session topic");
        let topic = self
            .gossip
            .subscribe(topic_id, bootstrap)
            .await
            .map_err(|e| SyncError::Network(format!("Failed to subscribe: {}", e)))?;
        let (sender, mut receiver) = topic.split();
        self.sessions.lock().insert(session.to_string(), sender);

        let local = self.endpoint.id();
        let endpoint = self.endpoint.clone();
        let sink = self.sink.clone();
        let connected = self.connected.clone();
        let cancel = self.cancel.clone();
        let session = session.to_string();
        tokio::spawn(async move {
            use iroh_gossip::api::Event;
            use n0_future::StreamExt;

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.try_next() => event,
                };
                match event {
                    Ok(Some(Event::NeighborUp(remote))) => {
                        debug!(session = %session, peer = %remote, "Neighbor up");
                        if local.to_string() >= remote.to_string() {
                            continue;
                        }
                        if !connected.lock().insert(remote) {
                            continue;
                        }
                        let endpoint = endpoint.clone();
                        let sink = sink.clone();
                        let connected = connected.clone();
                        tokio::spawn(async move {
                            if let Err(e) = dial(endpoint, sink.clone(), connected.clone(), remote).await {
                                warn!(peer = %remote, error = %e, "Dial failed");
                                connected.lock().remove(&remote);
                                sink.state(peer_id(&remote), ConnectionState::Failed);
                            }
                        });
                    }
                    Ok(Some(Event::NeighborDown(remote))) => {
                        debug!(session = %session, peer = %remote, "Neighbor down");
                    }
                    Ok(Some(Event::Received(_))) => {}
                    Ok(Some(Event::Lagged)) => warn!(session = %session, "Lagged behind on topic"),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(session = %session, error = ?e, "Topic receive error");
                        break;
                    }
                }
            }
            debug!(session = %session, "Rendezvous listener stopped");
        });
        Ok(())
    }

    /// Leave every session and close the endpoint
    pub async fn shutdown(self) {
        info!("Shutting down iroh transport");
        self.cancel.cancel();
        self.sessions.lock().clear();
        if let Err(e) = self.router.shutdown().await {
            warn!(error = ?e, "Failed to shutdown router cleanly");
        }
        self.endpoint.close().await;
    }
}

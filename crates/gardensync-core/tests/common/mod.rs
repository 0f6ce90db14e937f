//! Shared harness for the multi-peer integration tests
//!
//! Every node runs a real `SyncEngine` over a `MemoryStore`, joined to one
//! `MemoryHub` session. Waiting is done by polling the engine handle with a
//! deadline so a broken protocol fails the test instead of hanging it.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gardensync_core::{
    AutoUi, LiveState, LiveStatus, MemoryHub, MemoryMembership, MemoryStore, Peer, PeerId,
    PeerInfo, SyncConfig, SyncEngine, SyncEvent, SyncHandle,
};
use tokio::sync::broadcast;

pub const SESSION: &str = "test-session";
pub const DEADLINE: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(20);

/// One peer in a test mesh
pub struct Node {
    pub id: PeerId,
    pub handle: SyncHandle,
    pub store: MemoryStore,
    pub events: broadcast::Receiver<SyncEvent>,
    pub membership: Option<MemoryMembership>,
}

impl Node {
    /// Leave the session, closing every channel to this node
    pub fn leave(&mut self) {
        if let Some(membership) = self.membership.take() {
            membership.leave();
        }
    }
}

/// Short timers so elections and saves settle quickly
pub fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_chunk_size(1024)
        .with_election_timeout(Duration::from_millis(200))
        .with_save_debounce(Duration::from_millis(50))
}

/// Start a node that is not yet joined to any session
pub fn start_node(id: &str, store: MemoryStore, gardens: &[&str]) -> Node {
    let ui = AutoUi::new(gardens.iter().map(|g| g.to_string()).collect());
    let (engine, handle) = SyncEngine::new(
        PeerInfo::new(id, format!("Device {}", id)),
        Arc::new(store.clone()),
        ui,
        fast_config(),
    );
    let events = handle.subscribe();
    engine.spawn();
    Node {
        id: PeerId::new(id),
        handle,
        store,
        events,
        membership: None,
    }
}

/// Join `node` to the shared test session
pub fn join(hub: &MemoryHub, node: &mut Node) {
    let membership = hub
        .join(SESSION, node.id.clone(), node.handle.transport_sink())
        .expect("join session");
    node.membership = Some(membership);
}

/// Start and join a fully connected mesh, waiting for every channel
pub async fn mesh(hub: &MemoryHub, nodes: Vec<(&str, MemoryStore)>, gardens: &[&str]) -> Vec<Node> {
    let mut started: Vec<Node> = nodes
        .into_iter()
        .map(|(id, store)| start_node(id, store, gardens))
        .collect();
    for node in started.iter_mut() {
        join(hub, node);
    }
    let expected = started.len() - 1;
    for node in &started {
        wait_for_peers(&node.handle, |peers| peers.len() == expected).await;
    }
    started
}

/// Poll the registry until `check` holds
pub async fn wait_for_peers<F>(handle: &SyncHandle, check: F)
where
    F: Fn(&[Peer]) -> bool,
{
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        let peers = handle.peers().await.expect("engine running");
        if check(&peers) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for peers on {}",
            handle.local_id()
        );
        tokio::time::sleep(POLL).await;
    }
}

/// Poll live status until `check` holds and return the matching status
pub async fn wait_for_live<F>(handle: &SyncHandle, check: F) -> LiveStatus
where
    F: Fn(&LiveStatus) -> bool,
{
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        let status = handle.live_status().await.expect("engine running");
        if check(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for live status on {}: last {:?}",
            handle.local_id(),
            status
        );
        tokio::time::sleep(POLL).await;
    }
}

/// Wait until `handle` is a running follower of `host`
pub async fn wait_for_follower(handle: &SyncHandle, host: &str) -> LiveStatus {
    wait_for_live(handle, |s| {
        s.state == LiveState::Follower
            && s.host_id.as_ref().map(|h| h.as_str()) == Some(host)
            && s.replicas_active
    })
    .await
}

/// Wait until `handle` is hosting with replicas running
pub async fn wait_for_host(handle: &SyncHandle) -> LiveStatus {
    wait_for_live(handle, |s| s.state == LiveState::Host && s.replicas_active).await
}

/// Poll an arbitrary async condition until it returns true
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        if check().await {
            return;
        }
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(POLL).await;
    }
}

/// Drain events until one matches `pick`
pub async fn next_event<T, F>(events: &mut broadcast::Receiver<SyncEvent>, mut pick: F) -> T
where
    F: FnMut(&SyncEvent) -> Option<T>,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(&event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(DEADLINE, wait)
        .await
        .expect("timed out waiting for event")
}

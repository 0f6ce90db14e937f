//! Bulk and incremental file sync across a three-peer mesh
//!
//! ## Test Scenarios
//!
//! 1. **Broadcast Full Sync**: one peer pushes a garden to everyone
//! 2. **Targeted Request**: a peer pulls a garden from a single source
//! 3. **File Update Flood**: a gossiped update reaches peers not directly addressed
//! 4. **Stale Update**: an older timestamp never overwrites newer content
//! 5. **Peer Departure**: leaving the session removes the peer everywhere

mod common;

use common::*;
use gardensync_core::{MemoryHub, MemoryStore, ReceiveStatus, SyncEvent};

// ============================================================================
// Test Utilities
// ============================================================================

fn note(ts: i64, body: &str) -> Vec<u8> {
    format!(r#"{{"timestamp": {}, "body": "{}"}}"#, ts, body).into_bytes()
}

/// A garden with a few notes, a history file and enough bytes for several chunks
fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("journal", "today.md", "# Today\nwatered the tomatoes");
    store.insert("journal", "ideas/compost.md", "x".repeat(5000));
    store.insert("journal", ".history/0001", "snapshot one");
    store
}

/// A peer that already has stale history of its own
fn stale_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("journal", ".history/old", "outdated snapshot");
    store.insert("journal", "local-only.md", "kept");
    store
}

// ============================================================================
// Full Sync Tests
// ============================================================================

/// Verifies:
/// - Every receiver ends with the sender's files
/// - Stale history is replaced, exactly once per receiver
/// - Files outside history are left alone
/// - Receivers report completion through `FullSyncFinished`
#[tokio::test]
async fn test_broadcast_full_sync() {
    let hub = MemoryHub::new();
    let mut nodes = mesh(
        &hub,
        vec![
            ("a", seeded_store()),
            ("b", stale_store()),
            ("c", MemoryStore::new()),
        ],
        &["journal"],
    )
    .await;

    nodes[0]
        .handle
        .send_gardens(vec!["journal".into()], vec![])
        .await
        .expect("send");

    for node in nodes.iter_mut().skip(1) {
        let gardens = next_event(&mut node.events, |e| match e {
            SyncEvent::FullSyncFinished { gardens } => Some(gardens.clone()),
            _ => None,
        })
        .await;
        assert_eq!(gardens, vec!["journal".to_string()]);

        assert_eq!(
            node.store.get("journal", "today.md").as_deref(),
            Some(b"# Today\nwatered the tomatoes".as_slice())
        );
        assert_eq!(
            node.store.get("journal", "ideas/compost.md").map(|d| d.len()),
            Some(5000)
        );
        assert!(node.store.get("journal", ".history/0001").is_some());
        assert_eq!(node.store.history_deletions("journal"), 1);
    }

    let b = &nodes[1].store;
    assert!(b.get("journal", ".history/old").is_none());
    assert_eq!(b.get("journal", "local-only.md").as_deref(), Some(b"kept".as_slice()));

    assert_eq!(nodes[0].store.history_deletions("journal"), 0);
    for node in &nodes {
        assert_eq!(node.handle.receive_status().await.expect("status"), ReceiveStatus::Idle);
    }
}

/// Verifies:
/// - `request_gardens` pulls from exactly the named peer
/// - Peers not involved see no transfer
#[tokio::test]
async fn test_targeted_request() {
    let hub = MemoryHub::new();
    let mut nodes = mesh(
        &hub,
        vec![
            ("a", seeded_store()),
            ("b", MemoryStore::new()),
            ("c", MemoryStore::new()),
        ],
        &["journal"],
    )
    .await;

    let source = nodes[0].id.clone();
    nodes[2]
        .handle
        .request_gardens(vec!["journal".into()], source)
        .await
        .expect("request");

    next_event(&mut nodes[2].events, |e| match e {
        SyncEvent::FullSyncFinished { .. } => Some(()),
        _ => None,
    })
    .await;
    assert!(nodes[2].store.get("journal", "today.md").is_some());

    assert!(nodes[1].store.snapshot("journal").is_empty());
    assert_eq!(nodes[1].store.history_deletions("journal"), 0);
}

// ============================================================================
// File Update Tests
// ============================================================================

/// Verifies:
/// - A gossiped update lands on every other peer
/// - `FileUpdated` carries the embedded timestamp
/// - A later update with an older timestamp is rejected everywhere
#[tokio::test]
async fn test_file_update_flood_and_stale_rejection() {
    let hub = MemoryHub::new();
    let mut nodes = mesh(
        &hub,
        vec![
            ("a", MemoryStore::new()),
            ("b", MemoryStore::new()),
            ("c", MemoryStore::new()),
        ],
        &["journal"],
    )
    .await;

    // the editor saves locally before broadcasting
    nodes[0].store.insert("journal", "todo.json", note(5, "fresh"));
    nodes[0]
        .handle
        .send_file_update("journal", "todo.json", note(5, "fresh"), 5)
        .await
        .expect("update");

    for node in nodes.iter_mut().skip(1) {
        let (path, timestamp) = next_event(&mut node.events, |e| match e {
            SyncEvent::FileUpdated {
                path, timestamp, ..
            } => Some((path.clone(), *timestamp)),
            _ => None,
        })
        .await;
        assert_eq!(path, "todo.json");
        assert_eq!(timestamp, 5);
        assert_eq!(node.store.get("journal", "todo.json"), Some(note(5, "fresh")));
    }

    // c replays an older edit; nobody may go backwards
    nodes[2]
        .handle
        .send_file_update("journal", "todo.json", note(3, "stale"), 3)
        .await
        .expect("update");
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    assert_eq!(nodes[0].store.get("journal", "todo.json"), Some(note(5, "fresh")));
    assert_eq!(nodes[1].store.get("journal", "todo.json"), Some(note(5, "fresh")));
    assert_eq!(nodes[2].store.get("journal", "todo.json"), Some(note(5, "fresh")));
}

// ============================================================================
// Membership Tests
// ============================================================================

/// Verifies:
/// - Leaving the session closes channels on both remaining peers
/// - `PeerLeft` names the departed peer
#[tokio::test]
async fn test_peer_departure() {
    let hub = MemoryHub::new();
    let mut nodes = mesh(
        &hub,
        vec![
            ("a", MemoryStore::new()),
            ("b", MemoryStore::new()),
            ("c", MemoryStore::new()),
        ],
        &[],
    )
    .await;

    nodes[2].leave();

    for node in nodes.iter_mut().take(2) {
        let left = next_event(&mut node.events, |e| match e {
            SyncEvent::PeerLeft { peer_id } => Some(peer_id.clone()),
            _ => None,
        })
        .await;
        assert_eq!(left.as_str(), "c");
        wait_for_peers(&node.handle, |peers| peers.len() == 1).await;
    }
}

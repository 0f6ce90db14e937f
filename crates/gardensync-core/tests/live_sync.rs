//! Host election and live document replication across real engines
//!
//! ## Test Scenarios
//!
//! 1. **Election Convergence**: three peers enable together and agree on one host
//! 2. **Document Replication**: an edit on a follower reaches every replica and is saved
//! 3. **Late Joiner**: a peer enabling after the session started adopts the host
//! 4. **Host Loss**: the remaining peers elect a new host when the old one leaves
//! 5. **Disable**: a follower turning live sync off leaves the session intact

mod common;

use common::*;
use gardensync_core::{DocKey, LiveState, MemoryHub, MemoryStore};

// ============================================================================
// Test Utilities
// ============================================================================

fn host_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("notes", "today.md", "# Today");
    store.insert("notes", ".history/0001", "first snapshot");
    store
}

fn today() -> DocKey {
    DocKey::new("notes", "today.md")
}

async fn enable_all(nodes: &[Node]) {
    for node in nodes {
        node.handle.enable_live_sync().await.expect("enable");
    }
}

async fn wait_for_text(node: &Node, expected: &str) {
    let handle = node.handle.clone();
    let expected = expected.to_string();
    eventually(&format!("text on {}", node.id), move || {
        let handle = handle.clone();
        let expected = expected.clone();
        async move { handle.document_text(today()).await.ok().as_deref() == Some(expected.as_str()) }
    })
    .await;
}

async fn wait_for_saved(node: &Node, expected: &str) {
    let store = node.store.clone();
    let expected = expected.as_bytes().to_vec();
    eventually(&format!("save on {}", node.id), move || {
        let saved = store.get("notes", "today.md");
        let expected = expected.clone();
        async move { saved == Some(expected) }
    })
    .await;
}

// ============================================================================
// Election Tests
// ============================================================================

/// Verifies:
/// - Exactly one peer becomes host
/// - Every follower records the same host and the chosen gardens
/// - Followers receive the host's garden before replicas start
#[tokio::test]
async fn test_three_peers_elect_one_host() {
    let hub = MemoryHub::new();
    let nodes = mesh(
        &hub,
        vec![
            ("a", host_store()),
            ("b", MemoryStore::new()),
            ("c", MemoryStore::new()),
        ],
        &["notes"],
    )
    .await;

    enable_all(&nodes).await;

    let host = wait_for_host(&nodes[0].handle).await;
    assert_eq!(host.syncable_gardens, vec!["notes".to_string()]);
    for node in &nodes[1..] {
        let status = wait_for_follower(&node.handle, "a").await;
        assert_eq!(status.syncable_gardens, vec!["notes".to_string()]);
        assert_eq!(node.store.get("notes", "today.md").as_deref(), Some(b"# Today".as_slice()));
    }

    let hosts = {
        let mut count = 0;
        for node in &nodes {
            if node.handle.live_status().await.expect("status").state == LiveState::Host {
                count += 1;
            }
        }
        count
    };
    assert_eq!(hosts, 1);

    let active = wait_for_live(&nodes[0].handle, |s| s.active_peers.len() == 2).await;
    let mut ids: Vec<_> = active.active_peers.iter().map(|p| p.id.as_str().to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec!["b", "c"]);
}

// ============================================================================
// Document Replication Tests
// ============================================================================

/// Verifies:
/// - Followers bootstrap from the host's seeded text
/// - A follower's edit converges on every replica
/// - Each peer saves the converged text after the debounce
#[tokio::test]
async fn test_document_edits_replicate_and_save() {
    let hub = MemoryHub::new();
    let nodes = mesh(
        &hub,
        vec![
            ("a", host_store()),
            ("b", MemoryStore::new()),
            ("c", MemoryStore::new()),
        ],
        &["notes"],
    )
    .await;
    enable_all(&nodes).await;
    wait_for_host(&nodes[0].handle).await;
    for node in &nodes[1..] {
        wait_for_follower(&node.handle, "a").await;
    }

    for node in &nodes {
        node.handle.open_document(today()).await.expect("open");
    }
    for node in &nodes {
        wait_for_text(node, "# Today").await;
    }

    nodes[1]
        .handle
        .edit_document(today(), "# Today\nplanted garlic")
        .await
        .expect("edit");

    for node in &nodes {
        wait_for_text(node, "# Today\nplanted garlic").await;
    }
    for node in &nodes {
        wait_for_saved(node, "# Today\nplanted garlic").await;
    }
}

/// Verifies:
/// - Closing a document stops it receiving further edits
#[tokio::test]
async fn test_closed_document_stops_replicating() {
    let hub = MemoryHub::new();
    let nodes = mesh(
        &hub,
        vec![("a", host_store()), ("b", MemoryStore::new())],
        &["notes"],
    )
    .await;
    enable_all(&nodes).await;
    wait_for_host(&nodes[0].handle).await;
    wait_for_follower(&nodes[1].handle, "a").await;

    for node in &nodes {
        node.handle.open_document(today()).await.expect("open");
    }
    wait_for_text(&nodes[1], "# Today").await;

    nodes[1].handle.close_document(today()).await.expect("close");
    nodes[0]
        .handle
        .edit_document(today(), "# Today\nhost only")
        .await
        .expect("edit");
    wait_for_text(&nodes[0], "# Today\nhost only").await;

    assert!(nodes[1].handle.document_text(today()).await.is_err());
    let status = nodes[1].handle.live_status().await.expect("status");
    assert!(status.open_documents.is_empty());
}

// ============================================================================
// Membership Change Tests
// ============================================================================

/// Verifies:
/// - A peer enabling into a running session follows the existing host
/// - It receives the garden snapshot from that host
#[tokio::test]
async fn test_late_joiner_adopts_running_session() {
    let hub = MemoryHub::new();
    let nodes = mesh(
        &hub,
        vec![("a", host_store()), ("b", MemoryStore::new())],
        &["notes"],
    )
    .await;
    enable_all(&nodes).await;
    wait_for_host(&nodes[0].handle).await;
    wait_for_follower(&nodes[1].handle, "a").await;

    let mut late = start_node("c", MemoryStore::new(), &["notes"]);
    join(&hub, &mut late);
    wait_for_peers(&late.handle, |peers| peers.len() == 2).await;
    late.handle.enable_live_sync().await.expect("enable");

    let status = wait_for_follower(&late.handle, "a").await;
    assert_eq!(status.syncable_gardens, vec!["notes".to_string()]);
    assert_eq!(late.store.get("notes", "today.md").as_deref(), Some(b"# Today".as_slice()));

    // the running session is undisturbed
    let host = nodes[0].handle.live_status().await.expect("status");
    assert_eq!(host.state, LiveState::Host);
}

/// Verifies:
/// - Losing the host sends the survivors back to an election
/// - The survivors converge on a new host and resume replication
#[tokio::test]
async fn test_host_departure_triggers_reelection() {
    let hub = MemoryHub::new();
    let mut nodes = mesh(
        &hub,
        vec![
            ("a", host_store()),
            ("b", MemoryStore::new()),
            ("c", MemoryStore::new()),
        ],
        &["notes"],
    )
    .await;
    enable_all(&nodes).await;
    wait_for_host(&nodes[0].handle).await;
    for node in &nodes[1..] {
        wait_for_follower(&node.handle, "a").await;
    }

    nodes[0].leave();

    let host = wait_for_host(&nodes[1].handle).await;
    assert_eq!(host.host_id.as_ref().map(|h| h.as_str()), Some("b"));
    wait_for_follower(&nodes[2].handle, "b").await;

    for node in &nodes[1..] {
        node.handle.open_document(today()).await.expect("open");
    }
    wait_for_text(&nodes[2], "# Today").await;
    nodes[2]
        .handle
        .edit_document(today(), "# Today\nafter failover")
        .await
        .expect("edit");
    wait_for_text(&nodes[1], "# Today\nafter failover").await;
}

/// Verifies:
/// - A follower disabling leaves the host running
/// - The host drops it from the active set
#[tokio::test]
async fn test_follower_disable_keeps_session() {
    let hub = MemoryHub::new();
    let nodes = mesh(
        &hub,
        vec![
            ("a", host_store()),
            ("b", MemoryStore::new()),
            ("c", MemoryStore::new()),
        ],
        &["notes"],
    )
    .await;
    enable_all(&nodes).await;
    wait_for_host(&nodes[0].handle).await;
    for node in &nodes[1..] {
        wait_for_follower(&node.handle, "a").await;
    }
    wait_for_live(&nodes[0].handle, |s| s.active_peers.len() == 2).await;

    nodes[2].handle.disable_live_sync().await.expect("disable");

    let disabled = nodes[2].handle.live_status().await.expect("status");
    assert_eq!(disabled.state, LiveState::Disabled);
    wait_for_live(&nodes[0].handle, |s| {
        s.state == LiveState::Host && s.active_peers.len() == 1
    })
    .await;
    let follower = nodes[1].handle.live_status().await.expect("status");
    assert_eq!(follower.state, LiveState::Follower);
}

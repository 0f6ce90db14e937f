//! Garden Sync CLI
//!
//! Headless front end to gardensync-core.
//!
//! ## Usage
//!
//! ```bash
//! # Show device information
//! gardensync info
//!
//! # Set the name other devices see
//! gardensync name "Kitchen Laptop"
//!
//! # Turn live sync on for future sessions
//! gardensync live on
//!
//! # Join a session and push a garden to every device that connects
//! gardensync join home --send journal
//!
//! # Join through a ticket printed by another device
//! gardensync join home --peer '<ticket>'
//!
//! # Run an in-process three device demo
//! gardensync demo files
//! gardensync demo live
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gardensync_core::{
    generate_secret_key, peer_id_for_key, AutoUi, DocKey, FsStore, HostPreference, IrohTransport,
    LiveState, MemoryHub, MemoryMembership, MemoryStore, PeerInfo, ProgressKind, Storage,
    SyncConfig, SyncEngine, SyncEvent, SyncHandle,
};
use tokio::sync::broadcast;
use tracing::info;

const DEMO_SESSION: &str = "demo";
const DEMO_DEADLINE: Duration = Duration::from_secs(15);

/// Garden Sync - peer-to-peer garden replication
#[derive(Parser)]
#[command(name = "gardensync")]
#[command(version = "0.1.0")]
#[command(about = "Garden Sync - peer-to-peer garden replication")]
#[command(
    long_about = "Moves note gardens between devices in a session and keeps open documents in sync live under an elected host."
)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Data directory (default: platform data dir/gardensync)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Bytes per garden chunk
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// How long to collect peers before electing a host
    #[arg(long, global = true)]
    election_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show device information
    Info,

    /// Set the display name other devices see
    Name {
        /// New display name
        name: String,
    },

    /// Turn live sync on or off for future sessions
    Live {
        #[command(subcommand)]
        action: LiveAction,
    },

    /// Join a session and stay connected until Ctrl+C
    Join {
        /// Session name shared by every device
        session: String,

        /// Ticket of a device already in the session (repeatable)
        #[arg(short, long)]
        peer: Vec<String>,

        /// Garden to push to every device that connects (repeatable)
        #[arg(short, long)]
        send: Vec<String>,

        /// Enable live sync once joined
        #[arg(long)]
        live: bool,

        /// Gardens to offer when this device hosts (default: all local gardens)
        #[arg(short, long)]
        garden: Vec<String>,

        /// Host election preference: lowest, local or remote
        #[arg(long, default_value = "lowest")]
        prefer_host: String,
    },

    /// Run an in-process demo with three devices
    Demo {
        #[command(subcommand)]
        scenario: DemoScenario,
    },
}

#[derive(Subcommand)]
enum LiveAction {
    /// Enable live sync
    On,
    /// Disable live sync
    Off,
    /// Show whether live sync is enabled
    Status,
}

#[derive(Subcommand)]
enum DemoScenario {
    /// Push a garden from one device to the others
    Files,
    /// Elect a host and edit one document from two devices
    Live,
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gardensync")
}

/// Parse a host preference from its flag value
fn parse_host_preference(s: &str) -> Result<HostPreference> {
    match s.to_lowercase().as_str() {
        "lowest" => Ok(HostPreference::LowestId),
        "local" => Ok(HostPreference::Local),
        "remote" => Ok(HostPreference::Remote),
        _ => anyhow::bail!(
            "Invalid host preference '{}'. Must be one of: lowest, local, remote",
            s
        ),
    }
}

fn build_config(cli: &Cli) -> SyncConfig {
    let mut config = SyncConfig::default();
    if let Some(size) = cli.chunk_size {
        config = config.with_chunk_size(size);
    }
    if let Some(ms) = cli.election_timeout_ms {
        config = config.with_election_timeout(Duration::from_millis(ms));
    }
    config
}

fn open_storage(data_dir: &Path) -> Result<Storage> {
    Storage::new(data_dir.join("gardensync.redb"))
        .with_context(|| format!("Failed to open storage in {}", data_dir.display()))
}

/// Load the endpoint key, creating and saving one on first use
fn load_or_create_key(storage: &Storage) -> Result<[u8; 32]> {
    if let Some(key) = storage.load_endpoint_secret_key()? {
        return Ok(key);
    }
    let key = generate_secret_key();
    storage.save_endpoint_secret_key(&key)?;
    Ok(key)
}

fn display_name(storage: &Storage) -> Result<String> {
    Ok(storage
        .display_name()?
        .unwrap_or_else(|| "Unnamed device".to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    gardensync_core::logging::init(cli.verbose);

    let config = build_config(&cli);
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);

    match cli.command {
        Commands::Info => {
            let storage = open_storage(&data_dir)?;
            let store = FsStore::new(data_dir.join("gardens"));
            let gardens = store.list_gardens().await?;

            println!("Garden Sync v0.1.0");
            println!();
            println!("Device:");
            println!("  Name: {}", display_name(&storage)?);
            match storage.load_endpoint_secret_key()? {
                Some(key) => println!("  ID: {}", peer_id_for_key(&key)),
                None => println!("  ID: (created on first join)"),
            }
            println!(
                "  Live sync: {}",
                if storage.live_sync_enabled()? { "on" } else { "off" }
            );
            println!();
            println!("Data directory: {}", data_dir.display());
            if gardens.is_empty() {
                println!("Gardens: none");
            } else {
                println!("Gardens ({}):", gardens.len());
                for garden in gardens {
                    println!("  {}", garden);
                }
            }
        }

        Commands::Name { name } => {
            let name = name.trim();
            if name.is_empty() {
                anyhow::bail!("Display name cannot be empty");
            }
            let storage = open_storage(&data_dir)?;
            storage.set_display_name(name)?;
            println!("Display name set: {}", name);
        }

        Commands::Live { action } => {
            let storage = open_storage(&data_dir)?;
            match action {
                LiveAction::On => {
                    storage.set_live_sync_enabled(true)?;
                    println!("Live sync enabled.");
                }
                LiveAction::Off => {
                    storage.set_live_sync_enabled(false)?;
                    println!("Live sync disabled.");
                }
                LiveAction::Status => {
                    let on = storage.live_sync_enabled()?;
                    println!("Live sync: {}", if on { "on" } else { "off" });
                }
            }
        }

        Commands::Join {
            session,
            peer,
            send,
            live,
            garden,
            prefer_host,
        } => {
            let preference = parse_host_preference(&prefer_host)?;
            run_join(data_dir, config, session, peer, send, live, garden, preference).await?;
        }

        Commands::Demo { scenario } => match scenario {
            DemoScenario::Files => demo_files(config).await?,
            DemoScenario::Live => demo_live(config).await?,
        },
    }

    Ok(())
}

// ============================================================================
// Join
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn run_join(
    data_dir: PathBuf,
    config: SyncConfig,
    session: String,
    tickets: Vec<String>,
    send: Vec<String>,
    live: bool,
    gardens: Vec<String>,
    preference: HostPreference,
) -> Result<()> {
    let storage = open_storage(&data_dir)?;
    let key = load_or_create_key(&storage)?;
    let local = PeerInfo::new(peer_id_for_key(&key), display_name(&storage)?);

    let store = FsStore::new(data_dir.join("gardens"));
    let offered = if gardens.is_empty() {
        store.list_gardens().await?
    } else {
        gardens
    };
    let ui = AutoUi::new(offered).with_preference(preference);

    let (engine, handle) = SyncEngine::new(local.clone(), Arc::new(store), ui, config);
    let engine = engine.with_storage(storage)?;
    let mut events = handle.subscribe();
    let engine_task = engine.spawn();

    let transport = IrohTransport::bind(Some(key), handle.transport_sink()).await?;
    let mut bootstrap = Vec::new();
    for ticket in &tickets {
        bootstrap.push(transport.add_peer_ticket(ticket)?);
    }
    transport.join(&session, bootstrap).await?;
    info!(session = %session, peer_id = %local.id, "Joined session");

    println!("Joined session: {}", session);
    println!("  Name: {}", local.display_name);
    println!("  ID: {}", local.id);
    println!("  Data directory: {}", data_dir.display());
    println!();
    println!("Ticket for other devices:");
    println!("{}", transport.ticket()?);
    println!();

    if live {
        handle.enable_live_sync().await?;
        println!("Live sync enabled.");
    }
    println!("Connected. Press Ctrl+C to stop.");
    println!();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Received shutdown signal...");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let SyncEvent::PeerJoined { peer } = &event {
                        if !send.is_empty() {
                            let transfer = handle
                                .send_gardens(send.clone(), vec![peer.id.clone()])
                                .await?;
                            println!("Sending {} to {} ({})", send.join(", "), peer.display_name, transfer);
                        }
                    }
                    print_event(&event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("(skipped {} events)", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await?;
    engine_task.await?;
    transport.shutdown().await;
    info!("Shut down cleanly");
    println!("Stopped.");
    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::PeerJoined { peer } => {
            println!("+ {} ({})", peer.display_name, peer.id.short());
        }
        SyncEvent::PeerLeft { peer_id } => println!("- {}", peer_id.short()),
        SyncEvent::Progress(progress) => match progress.kind {
            ProgressKind::Info => println!("  {}", progress.message),
            _ => println!("{}", progress),
        },
        SyncEvent::FullSyncFinished { gardens } => {
            println!("Received gardens: {}", gardens.join(", "));
        }
        SyncEvent::FileUpdated {
            garden,
            path,
            timestamp,
        } => println!("Updated {}/{} (timestamp {})", garden, path, timestamp),
        SyncEvent::LiveStateChanged { state, host_id } => match host_id {
            Some(host) => println!("Live sync: {:?}, host {}", state, host.short()),
            None => println!("Live sync: {:?}", state),
        },
        SyncEvent::DocumentChanged { key } => println!("Edited remotely: {}", key),
    }
}

// ============================================================================
// Demo
// ============================================================================

struct DemoDevice {
    name: &'static str,
    handle: SyncHandle,
    store: MemoryStore,
    _membership: MemoryMembership,
}

async fn start_demo(config: SyncConfig, seed: MemoryStore) -> Result<Vec<DemoDevice>> {
    let hub = MemoryHub::new();
    let mut devices = Vec::new();
    for (i, name) in ["alder", "birch", "cedar"].into_iter().enumerate() {
        let store = if i == 0 { seed.clone() } else { MemoryStore::new() };
        let (engine, handle) = SyncEngine::new(
            PeerInfo::new(name, name),
            Arc::new(store.clone()),
            AutoUi::new(vec!["journal".to_string()]),
            config.clone(),
        );
        engine.spawn();
        let membership = hub.join(DEMO_SESSION, handle.local_id().clone(), handle.transport_sink())?;
        devices.push(DemoDevice {
            name,
            handle,
            store,
            _membership: membership,
        });
    }
    for device in &devices {
        let handle = device.handle.clone();
        wait_until("every device to connect", || {
            let handle = handle.clone();
            async move { handle.peers().await.map(|p| p.len() == 2).unwrap_or(false) }
        })
        .await?;
    }
    Ok(devices)
}

async fn wait_until<F, Fut>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + DEMO_DEADLINE;
    while !check().await {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    Ok(())
}

fn demo_seed() -> MemoryStore {
    let store = MemoryStore::new();
    store.insert("journal", "today.md", "# Today\nRepotted the fig.");
    store.insert("journal", "seeds.md", "- basil\n- chard\n- sunflower");
    store.insert("journal", ".history/0001", "first snapshot");
    store
}

async fn demo_files(config: SyncConfig) -> Result<()> {
    let devices = start_demo(config, demo_seed()).await?;
    println!("Three devices connected: alder, birch, cedar");

    let transfer = devices[0]
        .handle
        .send_gardens(vec!["journal".to_string()], vec![])
        .await?;
    println!("alder is sending journal ({})", transfer);

    for device in &devices[1..] {
        let store = device.store.clone();
        wait_until(&format!("{} to receive journal", device.name), || {
            let store = store.clone();
            async move { store.snapshot("journal").len() == 3 }
        })
        .await?;
        let files = device.store.snapshot("journal");
        println!("{} received {} files:", device.name, files.len());
        for (path, data) in files {
            println!("  {} ({} bytes)", path, data.len());
        }
    }

    for device in &devices {
        device.handle.shutdown().await?;
    }
    println!("Demo complete.");
    Ok(())
}

async fn demo_live(config: SyncConfig) -> Result<()> {
    let config = config
        .with_election_timeout(Duration::from_millis(300))
        .with_save_debounce(Duration::from_millis(100));
    let devices = start_demo(config, demo_seed()).await?;
    println!("Three devices connected: alder, birch, cedar");

    for device in &devices {
        device.handle.enable_live_sync().await?;
    }
    for device in &devices {
        let handle = device.handle.clone();
        wait_until(&format!("{} to join the live session", device.name), || {
            let handle = handle.clone();
            async move {
                handle
                    .live_status()
                    .await
                    .map(|s| s.state != LiveState::Pending && s.replicas_active)
                    .unwrap_or(false)
            }
        })
        .await?;
    }
    let status = devices[0].handle.live_status().await?;
    let host = status
        .host_id
        .map(|h| h.to_string())
        .unwrap_or_else(|| "(none)".to_string());
    println!("Host elected: {}", host);

    let key = DocKey::new("journal", "today.md");
    for device in &devices {
        device.handle.open_document(key.clone()).await?;
    }
    let edited = "# Today\nRepotted the fig.\nBirch: watered the seedlings.";
    wait_for_text(&devices[1], &key, "# Today\nRepotted the fig.").await?;
    devices[1].handle.edit_document(key.clone(), edited).await?;
    println!("birch edited {}", key);

    for device in &devices {
        wait_for_text(device, &key, edited).await?;
        println!("{} sees:", device.name);
        for line in edited.lines() {
            println!("  | {}", line);
        }
    }

    for device in &devices {
        device.handle.shutdown().await?;
    }
    println!("Demo complete.");
    Ok(())
}

async fn wait_for_text(device: &DemoDevice, key: &DocKey, expected: &str) -> Result<()> {
    let handle = device.handle.clone();
    let key = key.clone();
    let expected = expected.to_string();
    wait_until(&format!("{} to see the edit", device.name), || {
        let handle = handle.clone();
        let key = key.clone();
        let expected = expected.clone();
        async move { handle.document_text(key).await.map(|t| t == expected).unwrap_or(false) }
    })
    .await
}

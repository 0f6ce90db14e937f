//! Tunables for the sync engine

use std::time::Duration;

/// Size of one `GardenZipChunk` payload: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Sender pauses while a peer channel buffers this many bytes: 10 MiB.
pub const DEFAULT_HIGH_WATER_MARK: usize = 10 * 1024 * 1024;

/// Capacity of the gossip dedup window.
pub const DEFAULT_SEEN_CACHE_CAPACITY: usize = 500;

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration for a [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bytes per garden archive chunk
    pub chunk_size: usize,
    /// Buffered-bytes level at which a chunk sender waits
    pub high_water_mark: usize,
    /// How often a waiting sender re-reads the buffered level
    pub backpressure_poll: Duration,
    /// Number of message ids remembered for dedup
    pub seen_cache_capacity: usize,
    /// How long `enable()` collects announces before resolving
    pub election_timeout: Duration,
    /// Quiet period before a live document is written back to the store
    pub save_debounce: Duration,
    /// Capacity of the `SyncEvent` broadcast channel
    pub event_capacity: usize,
    /// zstd level used for garden archives
    pub compression_level: i32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            backpressure_poll: Duration::from_millis(20),
            seen_cache_capacity: DEFAULT_SEEN_CACHE_CAPACITY,
            election_timeout: Duration::from_secs(3),
            save_debounce: Duration::from_secs(1),
            event_capacity: EVENT_CHANNEL_CAPACITY,
            compression_level: 3,
        }
    }
}

impl SyncConfig {
    /// Set the chunk size (clamped to at least one byte)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the backpressure high-water mark
    pub fn with_high_water_mark(mut self, bytes: usize) -> Self {
        self.high_water_mark = bytes;
        self
    }

    /// Set the election timeout
    pub fn with_election_timeout(mut self, timeout: Duration) -> Self {
        self.election_timeout = timeout;
        self
    }

    /// Set the save debounce
    pub fn with_save_debounce(mut self, debounce: Duration) -> Self {
        self.save_debounce = debounce;
        self
    }

    /// Set the dedup window size
    pub fn with_seen_cache_capacity(mut self, capacity: usize) -> Self {
        self.seen_cache_capacity = capacity.max(1);
        self
    }
}

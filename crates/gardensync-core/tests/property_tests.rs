//! Property-based tests for the transfer and dedup building blocks
//!
//! ## Properties
//!
//! 1. **Dedup Window**: the seen cache never exceeds capacity and rejects
//!    every id still inside the window
//! 2. **Chunk Reassembly**: slices delivered in any order, with duplicates,
//!    rebuild the original archive
//! 3. **Archive Codec**: packing then unpacking preserves every entry
//! 4. **Envelope Decoding**: arbitrary bytes never panic the decoder
//! 5. **Embedded Timestamps**: the timestamp a note carries is the one read back

use gardensync_core::files::{split_chunks, ChunkAssembly};
use gardensync_core::store::archive::{pack, unpack, ArchiveEntry};
use gardensync_core::store::embedded_timestamp;
use gardensync_core::sync::SeenMessageCache;
use gardensync_core::{Envelope, MessageId};
use proptest::prelude::*;

// ============================================================================
// Strategy Generators
// ============================================================================

fn arb_archive() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..4096)
}

fn arb_entries() -> impl Strategy<Value = Vec<ArchiveEntry>> {
    prop::collection::vec(
        ("[a-z]{1,8}(/[a-z]{1,8}){0,2}\\.md", prop::collection::vec(any::<u8>(), 0..512))
            .prop_map(|(path, data)| ArchiveEntry { path, data }),
        0..16,
    )
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// The window is bounded and remembers exactly the newest ids
    #[test]
    fn prop_seen_cache_bounded(capacity in 1usize..64, count in 0usize..200) {
        let mut cache = SeenMessageCache::new(capacity);
        let ids: Vec<MessageId> = (0..count).map(|_| MessageId::new()).collect();

        for id in &ids {
            prop_assert!(cache.insert(*id));
            prop_assert!(cache.len() <= capacity);
        }

        let window_start = count.saturating_sub(capacity);
        for (i, id) in ids.iter().enumerate() {
            prop_assert_eq!(cache.contains(id), i >= window_start);
        }
        for id in &ids[window_start..] {
            prop_assert!(!cache.insert(*id));
        }
    }

    /// Any delivery order rebuilds the archive byte for byte
    #[test]
    fn prop_chunks_reassemble_in_any_order(
        data in arb_archive(),
        chunk_size in 1usize..512,
        seed in any::<u64>(),
    ) {
        let chunks = split_chunks(&data, chunk_size);
        prop_assert!(!chunks.is_empty());

        let mut order: Vec<usize> = (0..chunks.len()).collect();
        // deterministic shuffle from the seed, then replay the first slice
        let mut state = seed | 1;
        for i in (1..order.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            order.swap(i, (state % (i as u64 + 1)) as usize);
        }
        order.push(order[0]);

        let mut assembly = ChunkAssembly::new(chunks.len() as u32, data.len() as u64);
        let mut fresh = 0;
        for index in order {
            if assembly.insert(index as u32, chunks[index].to_vec()).unwrap() {
                fresh += 1;
            }
        }

        prop_assert_eq!(fresh, chunks.len());
        prop_assert!(assembly.is_complete());
        prop_assert_eq!(assembly.assemble(), Some(data));
    }

    /// Missing any slice means no archive
    #[test]
    fn prop_incomplete_assembly_yields_nothing(
        data in prop::collection::vec(any::<u8>(), 2..2048),
        chunk_size in 1usize..256,
        skip in any::<prop::sample::Index>(),
    ) {
        let chunks = split_chunks(&data, chunk_size);
        prop_assume!(chunks.len() > 1);
        let skipped = skip.index(chunks.len());

        let mut assembly = ChunkAssembly::new(chunks.len() as u32, data.len() as u64);
        for (i, chunk) in chunks.iter().enumerate() {
            if i != skipped {
                assembly.insert(i as u32, chunk.to_vec()).unwrap();
            }
        }
        prop_assert!(!assembly.is_complete());
        prop_assert_eq!(assembly.assemble(), None);
    }

    #[test]
    fn prop_archive_preserves_entries(entries in arb_entries(), level in 1i32..6) {
        let packed = pack(&entries, level).unwrap();
        prop_assert_eq!(unpack(&packed).unwrap(), entries);
    }

    #[test]
    fn prop_envelope_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = Envelope::from_bytes(&bytes);
    }

    #[test]
    fn prop_embedded_timestamp_read_back(ts in any::<i64>(), body in "[a-zA-Z0-9 ]{0,40}") {
        let note = serde_json::json!({ "timestamp": ts, "body": body }).to_string();
        prop_assert_eq!(embedded_timestamp(note.as_bytes()), Some(ts));
    }
}

//! Bounded FIFO set of message ids used for gossip dedup.

use std::collections::{HashSet, VecDeque};

use crate::types::MessageId;

/// Remembers the last `capacity` message ids in insertion order.
///
/// Membership is the only dedup mechanism: a message is processed at most
/// once while its id is inside the window. Inserting past capacity evicts
/// the oldest id.
#[derive(Debug, Clone)]
pub struct SeenMessageCache {
    order: VecDeque<MessageId>,
    members: HashSet<MessageId>,
    capacity: usize,
}

impl SeenMessageCache {
    /// Create an empty cache holding at most `capacity` ids
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Whether `id` is inside the current window
    pub fn contains(&self, id: &MessageId) -> bool {
        self.members.contains(id)
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        true
    }

    /// Number of ids currently remembered
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no ids are remembered
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Window size
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

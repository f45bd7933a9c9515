//! LRU read cache
//!
//! A slab of nodes linked by index into a doubly linked recency list,
//! plus an `FxHashMap` from record index to slab slot. Every operation is
//! O(1); capacity is fixed at construction.

use bytes::Bytes;
use rustc_hash::FxHashMap;

const NIL: usize = usize::MAX;

struct Node {
    record: u32,
    version: u64,
    value: Bytes,
    prev: usize,
    next: usize,
}

/// Per-worker cache of decoded values, validated by record version
pub struct ReadCache {
    map: FxHashMap<u32, usize>,
    nodes: Vec<Node>,
    /// Slab slots released by invalidation
    free: Vec<usize>,
    /// Most recently used
    head: usize,
    /// Least recently used
    tail: usize,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl ReadCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            map: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Cached value of `record`, if it was cached at `version`
    ///
    /// An entry cached at any other version is dropped.
    pub fn get(&mut self, record: u32, version: u64) -> Option<Bytes> {
        let Some(&slot) = self.map.get(&record) else {
            self.misses += 1;
            return None;
        };

        if self.nodes[slot].version != version {
            self.invalidate_slot(slot);
            self.misses += 1;
            return None;
        }

        self.detach(slot);
        self.attach_front(slot);
        self.hits += 1;
        Some(self.nodes[slot].value.clone())
    }

    /// Insert or refresh `record`, evicting the least recently used entry
    /// when full
    pub fn put(&mut self, record: u32, version: u64, value: Bytes) {
        if self.capacity == 0 {
            return;
        }

        if let Some(&slot) = self.map.get(&record) {
            let node = &mut self.nodes[slot];
            node.version = version;
            node.value = value;
            self.detach(slot);
            self.attach_front(slot);
            return;
        }

        let node = Node {
            record,
            version,
            value,
            prev: NIL,
            next: NIL,
        };

        let slot = if let Some(slot) = self.free.pop() {
            self.nodes[slot] = node;
            slot
        } else if self.nodes.len() < self.capacity {
            self.nodes.push(node);
            self.nodes.len() - 1
        } else {
            let victim = self.tail;
            self.detach(victim);
            self.map.remove(&self.nodes[victim].record);
            self.nodes[victim] = node;
            victim
        };

        self.attach_front(slot);
        self.map.insert(record, slot);
    }

    /// Drop `record` from the cache
    pub fn invalidate(&mut self, record: u32) {
        if let Some(&slot) = self.map.get(&record) {
            self.invalidate_slot(slot);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Record indices from most to least recently used
    pub fn recency(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.head;
        while cur != NIL {
            out.push(self.nodes[cur].record);
            cur = self.nodes[cur].next;
        }
        out
    }

    fn invalidate_slot(&mut self, slot: usize) {
        self.detach(slot);
        self.map.remove(&self.nodes[slot].record);
        self.nodes[slot].value = Bytes::new();
        self.free.push(slot);
    }

    fn detach(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = NIL;
    }

    fn attach_front(&mut self, slot: usize) {
        self.nodes[slot].prev = NIL;
        self.nodes[slot].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }
}

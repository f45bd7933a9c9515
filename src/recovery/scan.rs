//! Per-shard recovery scan

use crate::error::Result;
use crate::index::{hash_key, key_prefix, ExistenceFilter, HashIndex};
use crate::pmem::{BackingStore, Layout, RecordView, MAX_VALUE_LEN};

/// What one scanning task learned about its shard
#[derive(Debug)]
pub(crate) struct ShardScan {
    pub shard: usize,
    /// Live records found (the shard's dense prefix)
    pub records: u32,
    /// Per arena shard: highest unit end referenced by an active block set
    pub max_end: Vec<Option<u32>>,
}

/// Walk `shard`'s record range until the first non-live record,
/// indexing every live key on the way
pub(crate) fn scan_shard(
    store: &BackingStore,
    layout: &Layout,
    index: &HashIndex,
    filter: &ExistenceFilter,
    shard: usize,
) -> Result<ShardScan> {
    let mut scan = ShardScan {
        shard,
        records: 0,
        max_end: vec![None; layout.shard_count],
    };

    for record in layout.shard_records(shard) {
        let view = RecordView::new(store, layout, record);
        let header = view.header();
        if !header.live {
            break;
        }

        let key = view.key();
        let hash = hash_key(&key);
        index.insert(hash, key_prefix(&key), record)?;
        filter.set(hash);

        scan.records += 1;

        // Indexed either way; reads of a damaged record report corruption.
        let set = view.block_set(header.active);
        let len = header.len as usize;
        let damaged = len > MAX_VALUE_LEN
            || set
                .blocks(len)
                .any(|(id, size)| !layout.contains_block(id, size.units()));
        if damaged {
            tracing::warn!(shard, record, len, "live record names blocks outside the arena");
            continue;
        }
        for (id, size) in set.blocks(len) {
            let end = id.saturating_add(size.units());
            let owner = layout.arena_shard_of(id);
            let max = &mut scan.max_end[owner];
            *max = Some(max.map_or(end, |m| m.max(end)));
        }
    }

    tracing::debug!(shard, records = scan.records, "shard scan complete");
    Ok(scan)
}

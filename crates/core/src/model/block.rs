use memprof_protocol::BlockRecord;
use serde::{Deserialize, Serialize};

/// One live allocation recorded in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBlock {
    /// Allocation sequence number, unique within one process run.
    pub order_no: u32,
    /// Bytes requested by the application.
    pub alloc_by_app: u32,
    /// Bytes including allocator overhead.
    pub alloc_total: u32,
    pub bktrace_hash: u32,
    /// Pool membership as a bit mask.
    pub pool: u32,
    pub tags: u32,
}

impl MemoryBlock {
    /// Whether the block belongs to any pool in `mask`.
    pub fn in_pools(&self, mask: u32) -> bool {
        self.pool & mask != 0
    }

    pub fn has_tags(&self, mask: u32) -> bool {
        self.tags & mask != 0
    }
}

impl From<BlockRecord> for MemoryBlock {
    /// Pool indices are stored on disk; analysis works with masks.
    fn from(r: BlockRecord) -> Self {
        Self {
            order_no: r.order_no,
            alloc_by_app: r.alloc_by_app,
            alloc_total: r.alloc_total,
            bktrace_hash: r.bktrace_hash,
            pool: 1u32.checked_shl(r.pool).unwrap_or(0),
            tags: r.tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_index_becomes_mask() {
        let block = MemoryBlock::from(BlockRecord {
            pool: 3,
            ..Default::default()
        });
        assert_eq!(block.pool, 0b1000);
        assert!(block.in_pools(0b1010));
        assert!(!block.in_pools(0b0001));
    }

    #[test]
    fn out_of_range_pool_has_no_membership() {
        let block = MemoryBlock::from(BlockRecord {
            pool: 40,
            ..Default::default()
        });
        assert_eq!(block.pool, 0);
    }
}

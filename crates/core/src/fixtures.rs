//! Builders for snapshot buffers used by unit tests.

use memprof_protocol::{BacktraceRecord, BlockRecord, SnapshotFile, SymbolRecord};

use crate::snapshot::Snapshot;
use crate::symbol_table::SymbolTable;

/// Encode a snapshot.
///
/// `blocks` are `(order_no, alloc_by_app, bktrace_hash)`, all placed in pool 1.
/// Each backtrace is given as a call path, outermost frame first. Frame
/// addresses are derived from the name, so the same name maps to the same
/// address across fixtures sharing a symbol table.
pub(crate) fn snapshot_bytes(
    timestamp: u64,
    blocks: &[(u32, u32, u32)],
    bktraces: &[(u32, &[&str])],
) -> Vec<u8> {
    let mut names: Vec<&str> = Vec::new();
    for (_, stack) in bktraces {
        for name in *stack {
            if !names.contains(name) {
                names.push(*name);
            }
        }
    }
    let addr_of = |name: &str| {
        let hash = name.bytes().fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x100_0000_01b3)
        });
        (hash & 0xffff_ffff_ffff_0000) | 0x8000
    };

    let depth = bktraces.iter().map(|(_, s)| s.len()).max().unwrap_or(1).max(1) as u32;
    let symbols = names
        .iter()
        .map(|&name| SymbolRecord::new(addr_of(name), name))
        .collect();
    let records = bktraces
        .iter()
        .map(|(hash, stack)| {
            let frames = stack.iter().rev().map(|&name| addr_of(name)).collect();
            BacktraceRecord::new(*hash, frames)
        })
        .collect();
    let blocks = blocks
        .iter()
        .map(|&(order_no, alloc_by_app, bktrace_hash)| BlockRecord {
            order_no,
            alloc_by_app,
            alloc_total: alloc_by_app + 16,
            bktrace_hash,
            pool: 1,
            tags: 0,
        })
        .collect();

    SnapshotFile::new(timestamp, depth, blocks, symbols, records).to_bytes()
}

pub(crate) fn load_snapshot(
    table: &mut SymbolTable,
    blocks: &[(u32, u32, u32)],
    bktraces: &[(u32, &[&str])],
) -> Snapshot {
    let bytes = snapshot_bytes(100, blocks, bktraces);
    Snapshot::from_bytes("fixture.snapshot", &bytes, table).unwrap()
}

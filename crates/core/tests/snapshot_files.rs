//! Integration test: snapshot files written with the protocol writers load
//! back through `Snapshot::open` + `load` with the same blocks and names.

use std::fs;

use memprof_core::{Snapshot, SnapshotError, SymbolTable};
use memprof_protocol::{BacktraceRecord, BlockRecord, SnapshotFile, SymbolRecord};

fn block(order_no: u32, alloc_by_app: u32, bktrace_hash: u32) -> BlockRecord {
    BlockRecord {
        order_no,
        alloc_by_app,
        alloc_total: alloc_by_app,
        bktrace_hash,
        pool: 2,
        tags: 0b101,
    }
}

#[test]
fn written_snapshot_loads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("01.snapshot");
    let file = SnapshotFile::new(
        777,
        8,
        vec![block(9, 64, 5), block(4, 32, 5)],
        vec![
            SymbolRecord::new(0x7000_0000, "render_frame"),
            SymbolRecord::new(0x7000_1000, "upload_mesh"),
        ],
        vec![BacktraceRecord::new(5, vec![0x7000_1000, 0x7000_0000])],
    );
    fs::write(&path, file.to_bytes()).expect("write");

    let mut snapshot = Snapshot::open(&path).expect("open");
    assert!(!snapshot.is_loaded());
    assert_eq!(snapshot.timestamp(), 777);
    assert_eq!(snapshot.block_count(), 2);
    assert_eq!(snapshot.total_size(), fs::metadata(&path).expect("stat").len());

    let mut table = SymbolTable::new();
    snapshot.load(&mut table).expect("load");
    snapshot.load(&mut table).expect("second load is a no-op");
    let blocks = snapshot.memory_blocks();
    assert_eq!(blocks.len(), 2);
    assert!(blocks.windows(2).all(|w| w[0].order_no < w[1].order_no));
    assert_eq!(blocks[0].order_no, 4);
    assert_eq!(blocks[0].pool, 0b100);
    assert!(blocks[0].has_tags(0b100));

    let names: Vec<&str> = table
        .backtrace_symbols(5)
        .expect("backtrace")
        .iter()
        .map(|s| s.as_str())
        .collect();
    assert_eq!(names, ["upload_mesh", "render_frame"]);
    assert_eq!(snapshot.blocks_for_backtrace(5), &[0, 1]);
}

#[test]
fn colliding_hash_across_snapshots_keeps_first_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let symbols = || {
        vec![
            SymbolRecord::new(0x5000, "draw"),
            SymbolRecord::new(0x6000, "update"),
        ]
    };
    let first = dir.path().join("01.snapshot");
    let second = dir.path().join("02.snapshot");
    let write = |path: &std::path::Path, frame: u64| {
        let file = SnapshotFile::new(
            1,
            1,
            vec![block(1, 8, 42)],
            symbols(),
            vec![BacktraceRecord::new(42, vec![frame])],
        );
        fs::write(path, file.to_bytes()).expect("write");
    };
    write(&first, 0x5000);
    write(&second, 0x6000);

    let mut table = SymbolTable::new();
    Snapshot::open(&first).and_then(|mut s| s.load(&mut table)).expect("first");
    Snapshot::open(&second).and_then(|mut s| s.load(&mut table)).expect("second");
    assert_eq!(table.collision_count(), 1);
    assert_eq!(table.backtrace_symbols(42).expect("frames")[0], "draw");
}

#[test]
fn size_mismatch_is_rejected_on_open() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.snapshot");
    let mut bytes = SnapshotFile::new(
        1,
        1,
        vec![block(1, 8, 1)],
        vec![],
        vec![BacktraceRecord::new(1, vec![0x5000])],
    )
    .to_bytes();
    bytes.extend_from_slice(&[0; 8]);
    fs::write(&path, bytes).expect("write");

    assert!(matches!(
        Snapshot::open(&path),
        Err(SnapshotError::Format { .. })
    ));
}

//! # Database Handle Integration Tests
//!
//! End-to-end coverage of the page-memory subsystem through the handle:
//!
//! 1. Creation and reopen: meta pages written, validated, and picked by
//!    transaction id
//! 2. Meta recovery: a torn primary meta falls back to the backup copy
//! 3. Map growth: ensure_mapped walks the sizer's levels and surfaces the
//!    too-large error with context
//! 4. File growth: alloc_size chunking
//! 5. Read-only mode: growth and writes refused

use std::io::{Seek, SeekFrom, Write};

use tempfile::tempdir;

use burrowdb::config::DEFAULT_PAGE_SIZE;
use burrowdb::{Db, MmapTooLarge, Options};

const PAGE: u64 = DEFAULT_PAGE_SIZE as u64;

// ============================================================================
// Creation and reopen
// ============================================================================

#[test]
fn test_create_then_reopen_round_trips_metadata() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    {
        let db = Db::open(&path, Options::default()).unwrap();
        let meta = db.meta().unwrap();

        assert_eq!(meta.page_size() as usize, DEFAULT_PAGE_SIZE);
        assert_eq!(meta.txid(), 1);
        db.sync().unwrap();
    }

    let db = Db::open(&path, Options::default()).unwrap();
    let meta = db.meta().unwrap();

    assert_eq!(meta.txid(), 1);
    assert_eq!(meta.pgid(), 2);
    assert_eq!(db.file_len(), 2 * PAGE);
}

#[test]
fn test_torn_primary_meta_falls_back_to_backup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    {
        Db::open(&path, Options::default()).unwrap();
    }

    // Tear meta 0 on disk.
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&[0xFF; 32]).unwrap();
    file.sync_all().unwrap();

    let db = Db::open(&path, Options::default()).unwrap();
    let meta = db.meta().unwrap();

    assert_eq!(meta.txid(), 1, "the intact backup meta must win");
}

#[test]
fn test_both_metas_torn_fails_to_open() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    {
        Db::open(&path, Options::default()).unwrap();
    }

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap();
    for offset in [0, PAGE] {
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(&[0xFF; 32]).unwrap();
    }
    file.sync_all().unwrap();

    assert!(Db::open(&path, Options::default()).is_err());
}

// ============================================================================
// Map growth
// ============================================================================

#[test]
fn test_ensure_mapped_walks_the_level_table() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    let db = Db::open(&path, Options::default()).unwrap();
    assert_eq!(db.mapped_len(), 1 << 15);

    // Covered request: no growth.
    assert_eq!(db.ensure_mapped(1 << 14).unwrap(), 1 << 15);

    // One byte past the current level: next level.
    assert_eq!(db.ensure_mapped((1 << 15) + 1).unwrap(), 1 << 16);

    // Jump several levels at once.
    assert_eq!(db.ensure_mapped(1 << 20).unwrap(), 1 << 20);
    assert_eq!(db.mapped_len(), 1 << 20);
}

#[test]
fn test_ensure_mapped_past_max_surfaces_typed_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    let db = Db::open(&path, Options::default()).unwrap();
    let err = db.ensure_mapped(u64::MAX).unwrap_err();

    // The typed error survives the context chain.
    let too_large = err
        .downcast_ref::<MmapTooLarge>()
        .expect("error chain must carry MmapTooLarge");
    assert_eq!(too_large.requested, u64::MAX);

    // And the context names the file.
    assert!(err.to_string().contains("kv.db"));
}

#[test]
fn test_initial_mmap_size_is_honored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    let options = Options {
        initial_mmap_size: 1 << 22,
        ..Options::default()
    };

    let db = Db::open(&path, options).unwrap();

    assert_eq!(db.mapped_len(), 1 << 22);
    assert_eq!(db.file_len(), 2 * PAGE, "file stays small; only the map is large");
}

// ============================================================================
// File growth
// ============================================================================

#[test]
fn test_grow_data_file_rounds_to_alloc_chunks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    let options = Options {
        alloc_size: 1 << 16, // 64 KiB chunks for the test
        ..Options::default()
    };

    let db = Db::open(&path, options).unwrap();

    // Growing to 3 pages rounds up to one full chunk.
    let new_len = db.grow_data_file(3 * PAGE).unwrap();
    assert_eq!(new_len, 1 << 16);
    assert_eq!(db.file_len(), 1 << 16);

    // Already covered: no further growth.
    assert_eq!(db.grow_data_file(4 * PAGE).unwrap(), 1 << 16);
}

#[test]
fn test_no_grow_sync_still_grows() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    let options = Options {
        no_grow_sync: true,
        ..Options::default()
    };

    let db = Db::open(&path, options).unwrap();

    db.grow_data_file(4 * PAGE).unwrap();
    assert!(db.file_len() >= 4 * PAGE);
    db.ensure_mapped(1 << 16).unwrap();
    assert_eq!(db.mapped_len(), 1 << 16);
}

// ============================================================================
// Read-only mode
// ============================================================================

#[test]
fn test_read_only_refuses_growth() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    {
        Db::open(&path, Options::default()).unwrap();
    }

    let options = Options {
        read_only: true,
        ..Options::default()
    };

    let db = Db::open(&path, options).unwrap();

    assert!(db.meta().is_ok());
    assert!(db.ensure_mapped(1 << 20).is_err());
    assert!(db.grow_data_file(16 * PAGE).is_err());
}

// ============================================================================
// Buffers
// ============================================================================

#[test]
fn test_buffers_from_the_handle_are_reused() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("kv.db");

    let db = Db::open(&path, Options::default()).unwrap();

    let buffer = db.allocate_buffer();
    let addr = buffer.as_ptr();
    drop(buffer);

    let buffer = db.allocate_buffer();
    assert_eq!(buffer.as_ptr(), addr);
    assert_eq!(db.pool().allocated_pages(), 1);
}

//! # burrowdb - Page Memory for an Embedded CoW KV Engine
//!
//! burrowdb is the page-memory subsystem of an embedded, memory-mapped,
//! copy-on-write B+Tree key-value storage engine. Everything the engine
//! persists (tree nodes, freelists, metadata) lives in fixed-size pages,
//! and this crate supplies those pages:
//!
//! - **Zero-contention allocation**: a per-thread cache backed by a
//!   lock-free shared free-list; the common get/put touches no lock, no
//!   atomic, and no heap
//! - **Rare remaps**: a deterministic growth policy hands out coarse,
//!   reusable map sizes so the expensive remap happens O(log n) times over
//!   a database's life
//! - **Crash-safe metadata**: dual checksummed meta pages, higher
//!   transaction id wins
//!
//! ## Quick Start
//!
//! ```ignore
//! use burrowdb::{Db, Options};
//!
//! let db = Db::open("./data.db", Options::default())?;
//!
//! let mut page = db.allocate_buffer();   // uninitialized 4 KiB, aligned
//! build_node(&mut page);
//! db.ensure_mapped(required_bytes)?;     // grows map through the sizer
//! drop(page);                            // returns to the pool
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Database Handle (Db)             │
//! │   options · meta pick · growth lock      │
//! ├─────────────────┬───────────────────────┤
//! │  Page Pool      │  Mmap Sizer            │
//! │  thread cache   │  level table           │
//! │  victim list    │  step growth           │
//! │  heap fallback  │  max clamp             │
//! ├─────────────────┴───────────────────────┤
//! │     Mmap Storage (memmap2)               │
//! │   page slices · grow · remap · sync      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The pool and the sizer are standalone engines with no dependency on the
//! handle or on each other; both are independently testable.
//!
//! ## Module Overview
//!
//! - [`memory`]: the concurrent page-buffer pool
//! - [`storage`]: memory-mapped storage, growth sizing, meta pages
//! - [`database`]: the database handle and its options
//! - [`config`]: centralized constants
//! - [`align`]: the power-of-two rounding primitive

pub mod align;
pub mod config;
pub mod database;
pub mod memory;
pub mod storage;

pub use database::{Db, Options};
pub use memory::{PageBuf, PagePool, PoolConfig};
pub use storage::{MmapSizer, MmapTooLarge};

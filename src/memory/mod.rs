//! # Page Memory
//!
//! Process-wide supply of fixed-size, cache-line-aligned page buffers.
//!
//! Every higher-level structure in the engine (tree nodes, freelist
//! trunks, metadata) is built inside a page buffer obtained here. The pool
//! is tuned for the copy-on-write write path, where a transaction grabs a
//! handful of scratch pages, fills them, and hands them back: the common
//! case must not touch a lock, an atomic, or the heap.
//!
//! ## Architecture
//!
//! ```text
//! get() / put()
//!   │
//!   ├─ 1. thread-local cache (bounded stack, no synchronization)
//!   │
//!   ├─ 2. shared victim list (lock-free Treiber stack, CAS on head)
//!   │
//!   └─ 3. aligned heap allocation (get) / spill to victim list (put)
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`]: the allocator (`PagePool`), its buffer handle (`PageBuf`),
//!   and construction-time tuning (`PoolConfig`)

mod pool;

pub use pool::{PageBuf, PagePool, PoolConfig, ResetFn};

//! # Storage Layer
//!
//! Memory-mapped page storage and the policies that size it.
//!
//! ## Architecture Overview
//!
//! The database file is mapped into the process address space and accessed
//! as fixed-size pages. Three concerns live here:
//!
//! - [`mmap`]: the map itself (`MmapStorage`): creation, bounds-checked
//!   page access, file growth, and remapping, with the borrow checker
//!   ruling out page references that survive a remap.
//! - [`sizer`]: the pure growth policy (`MmapSizer`) deciding how large the
//!   next map should be, in coarse reusable increments.
//! - [`meta`]: the dual metadata pages (`Meta`) at the front of the file:
//!   the engine's recovery anchor, validated by magic, version, and
//!   checksum, with the higher transaction id winning.
//!
//! ## Growth Protocol
//!
//! ```text
//! need page beyond map
//!   │
//!   ├─ MmapSizer::compute_mmap_size(min)   pure, may refuse (too large)
//!   │
//!   ├─ MmapStorage::grow_file(..)          alloc_size chunks, fsync policy
//!   │
//!   └─ MmapStorage::remap(..)              flush, drop old map, map anew
//! ```
//!
//! The map may exceed the file (over-mapping), so frequent, cheap file
//! growth does not force a remap. Accesses are bounded by the file extent.

pub mod meta;
pub mod mmap;
pub mod sizer;

pub use meta::{Meta, META_SIZE};
pub use mmap::MmapStorage;
pub use sizer::{MmapSizer, MmapTooLarge};

//! # Configuration Constants
//!
//! All tunable values for the page pool, the mmap sizer, and the database
//! handle. Constants that depend on each other are co-located and the
//! dependencies are spelled out below.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> must be >= size_of::<usize>()
//!       │     A free page stores the next-free pointer in its first
//!       │     machine word. A page smaller than a word cannot be linked.
//!       │
//!       └─> must be a multiple of PAGE_ALIGN
//!             Aligned allocation requires the layout size to round evenly,
//!             and direct-I/O paths expect both start and length aligned.
//!
//! PAGE_ALIGN (64 bytes, one cache line)
//!       │
//!       └─> must be a power of two (Layout requirement)
//!
//! DEFAULT_MAX_MMAP_STEP (1 GiB)
//!       │
//!       └─> must be a power of two
//!             The growth path rounds requested sizes up to a step boundary
//!             with the bitwise align_to primitive, which is only defined
//!             for power-of-two alignments.
//!
//! DEFAULT_MAX_MMAP_SIZE (2^48 - 1 bytes)
//!       │
//!       └─> must be >= the largest sizer level (1 GiB)
//!             Otherwise the leveled path could hand out sizes past the cap.
//! ```

/// Size of a single page buffer in bytes.
///
/// Matches the common OS page size. Engines that need larger pages
/// configure the pool and sizer explicitly instead of editing this.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Alignment of every page buffer: one cache line.
///
/// Keeps concurrently-owned pages off each other's cache lines and
/// satisfies direct-I/O alignment requirements.
pub const PAGE_ALIGN: usize = 64;

/// Capacity of each thread-local free-page cache.
///
/// Pages beyond this spill to the shared victim list. Larger values trade
/// per-thread memory for fewer trips to the shared list.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Largest memory map the sizer will ever return (256 TiB - 1).
///
/// Matches the usable 48-bit virtual address range on x86-64.
pub const DEFAULT_MAX_MMAP_SIZE: u64 = 0xFFFF_FFFF_FFFF;

/// Growth quantum once a requested map size exceeds the level table (1 GiB).
pub const DEFAULT_MAX_MMAP_STEP: u64 = 1 << 30;

/// File-growth chunk: how much the data file is extended at a time (16 MiB).
///
/// Amortizes truncate/fsync cost when the database allocates new pages.
pub const DEFAULT_ALLOC_SIZE: u64 = 1 << 24;

/// Default maximum number of writes coalesced into one batch.
///
/// Zero disables batching.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Default maximum delay before a pending batch is started, in milliseconds.
pub const DEFAULT_MAX_BATCH_DELAY_MS: u64 = 10;

// Compile-time enforcement of the dependency graph above.
const _: () = assert!(DEFAULT_PAGE_SIZE >= std::mem::size_of::<usize>());
const _: () = assert!(PAGE_ALIGN.is_power_of_two());
const _: () = assert!(DEFAULT_PAGE_SIZE % PAGE_ALIGN == 0);
const _: () = assert!(DEFAULT_MAX_MMAP_STEP.is_power_of_two());
const _: () = assert!(DEFAULT_MAX_MMAP_SIZE >= 1 << 30);
const _: () = assert!(DEFAULT_CACHE_CAPACITY > 0);

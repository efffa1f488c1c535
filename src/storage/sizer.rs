//! # Mmap Growth Sizing
//!
//! Pure policy deciding how large the memory map must grow to satisfy a
//! requested size. Growing a map is expensive (the file is flushed, the
//! region remapped, and on some platforms every cached translation is
//! dropped), so the sizer hands out coarse, reusable sizes instead of exact
//! fits:
//!
//! - Small and medium requests snap to a predefined level table of powers
//!   of two, 32 KiB through 1 GiB. Repeated growth within a level costs no
//!   remap at all.
//! - Requests past the table grow in steps of `max_step` (default 1 GiB),
//!   re-rounded to page size, so even a huge database remaps at most once
//!   per gigabyte of growth.
//! - Nothing ever exceeds `max_size` (default 2^48 - 1, the usable x86-64
//!   address range); a request beyond it is the subsystem's one recoverable
//!   error.
//!
//! The sizer performs no I/O and grows no map. It computes the target size;
//! the storage layer applies it.

use crate::align::align_to;
use crate::config::{DEFAULT_MAX_MMAP_SIZE, DEFAULT_MAX_MMAP_STEP};

/// Predefined map sizes for small and medium databases: powers of two from
/// 32 KiB to 1 GiB. Kept ascending; the lookup is a lower bound.
const MMAP_SIZE_LEVELS: [u64; 16] = [
    1 << 15,
    1 << 16,
    1 << 17,
    1 << 18,
    1 << 19,
    1 << 20,
    1 << 21,
    1 << 22,
    1 << 23,
    1 << 24,
    1 << 25,
    1 << 26,
    1 << 27,
    1 << 28,
    1 << 29,
    1 << 30,
];

/// Error returned when a requested map size exceeds the configured maximum.
///
/// The single recoverable condition in the page-memory subsystem. Callers
/// decide whether to retry with a smaller request; the sizer never retries
/// internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapTooLarge {
    pub requested: u64,
    pub max_size: u64,
}

impl std::fmt::Display for MmapTooLarge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requested mmap size {} exceeds maximum allowed size {}",
            self.requested, self.max_size
        )
    }
}

impl std::error::Error for MmapTooLarge {}

/// Deterministic map-size policy. Immutable after construction; every
/// computation is a pure function of the request and this configuration.
#[derive(Debug, Clone, Copy)]
pub struct MmapSizer {
    page_size: u64,
    max_size: u64,
    max_step: u64,
}

impl MmapSizer {
    /// Creates a sizer with the default limits: 256 TiB maximum map size,
    /// 1 GiB growth step.
    pub fn new(page_size: u64) -> Self {
        Self::with_limits(page_size, DEFAULT_MAX_MMAP_SIZE, DEFAULT_MAX_MMAP_STEP)
    }

    /// Creates a sizer with explicit limits.
    ///
    /// `max_step` must be a power of two (it feeds the bitwise rounding
    /// primitive); checked in debug builds.
    pub fn with_limits(page_size: u64, max_size: u64, max_step: u64) -> Self {
        debug_assert!(page_size > 0);
        debug_assert!(max_step.is_power_of_two());

        Self {
            page_size,
            max_size,
            max_step,
        }
    }

    /// Computes the map size to request from the OS for `requested` bytes.
    ///
    /// Level-table sizes are returned exactly as listed. Past the table,
    /// the request is rounded up to a `max_step` boundary, re-rounded to
    /// page size, and clamped to `max_size`.
    pub fn compute_mmap_size(&self, requested: u64) -> Result<u64, MmapTooLarge> {
        if requested > self.max_size {
            return Err(MmapTooLarge {
                requested,
                max_size: self.max_size,
            });
        }

        let level = MMAP_SIZE_LEVELS.partition_point(|&size| size < requested);
        if let Some(&size) = MMAP_SIZE_LEVELS.get(level) {
            return Ok(size);
        }

        // Past the level table: grow in max_step increments, then realign
        // to page size.
        let new_size = align_to(requested, self.max_step);
        let new_size = align_to(new_size, self.page_size);

        Ok(new_size.min(self.max_size))
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn max_step(&self) -> u64 {
        self.max_step
    }
}

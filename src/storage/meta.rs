//! # Metadata Pages
//!
//! The first two pages of a database file each hold a `Meta` record: the
//! engine's recovery anchor. A committing transaction writes the meta page
//! its transaction id selects (txid mod 2), so a torn write can corrupt at
//! most one of the two copies. On open, both are validated and the valid
//! meta with the greater txid wins.
//!
//! ## Layout (72 bytes at offset 0 of pages 0 and 1)
//!
//! ```text
//! Offset  Size  Field       Description
//! ------  ----  ----------  ----------------------------------------
//! 0       16    magic       File format identifier
//! 16      4     version     Format version (currently 1)
//! 20      4     page_size   Page size this file was created with
//! 24      4     flags       Feature flags (none defined yet)
//! 28      4     reserved    Zero
//! 32      8     root        Page id of the B+Tree root (0 = empty)
//! 40      8     freelist    Page id of the freelist head (0 = none)
//! 48      8     pgid        High-water mark: one past the last used page
//! 56      8     txid        Transaction id that wrote this meta
//! 64      8     checksum    CRC-64 of bytes 0..64
//! ```
//!
//! All fields are little-endian; `zerocopy` reads them in place from the
//! mmap without copying.

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const META_MAGIC: &[u8; 16] = b"burrowdb v1\x00\x00\x00\x00\x00";
pub const META_VERSION: u32 = 1;

/// Serialized size of a meta record.
pub const META_SIZE: usize = 72;

/// Number of meta pages at the front of every database file.
pub const META_PAGE_COUNT: u64 = 2;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Meta {
    magic: [u8; 16],
    version: U32,
    page_size: U32,
    flags: U32,
    reserved: U32,
    root: U64,
    freelist: U64,
    pgid: U64,
    txid: U64,
    checksum: U64,
}

const _: () = assert!(std::mem::size_of::<Meta>() == META_SIZE);

impl Meta {
    /// Creates a sealed meta for a fresh database: no root, no freelist,
    /// high-water mark just past the meta pages.
    pub fn new(page_size: u32, txid: u64) -> Self {
        let mut meta = Self {
            magic: *META_MAGIC,
            version: U32::new(META_VERSION),
            page_size: U32::new(page_size),
            flags: U32::new(0),
            reserved: U32::new(0),
            root: U64::new(0),
            freelist: U64::new(0),
            pgid: U64::new(META_PAGE_COUNT),
            txid: U64::new(txid),
            checksum: U64::new(0),
        };

        meta.seal();
        meta
    }

    /// Parses and validates a meta record from the front of a page.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        ensure!(
            bytes.len() >= META_SIZE,
            "buffer too small for meta record: {} < {}",
            bytes.len(),
            META_SIZE
        );

        let meta = Self::ref_from_bytes(&bytes[..META_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse meta record: {:?}", e))?;

        meta.validate()?;
        Ok(meta)
    }

    /// Checks magic, version, and checksum.
    pub fn validate(&self) -> Result<()> {
        ensure!(&self.magic == META_MAGIC, "invalid magic bytes in meta record");

        ensure!(
            self.version.get() == META_VERSION,
            "unsupported meta version: {} (expected {})",
            self.version.get(),
            META_VERSION
        );

        ensure!(
            self.checksum.get() == self.compute_checksum(),
            "meta record checksum mismatch (txid {})",
            self.txid.get()
        );

        Ok(())
    }

    /// Recomputes and stores the checksum. Call after any field change and
    /// before writing the record out.
    pub fn seal(&mut self) {
        self.checksum = U64::new(self.compute_checksum());
    }

    /// Copies the record into the front of `page`.
    pub fn write_to(&self, page: &mut [u8]) -> Result<()> {
        ensure!(
            page.len() >= META_SIZE,
            "page too small for meta record: {} < {}",
            page.len(),
            META_SIZE
        );

        page[..META_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    fn compute_checksum(&self) -> u64 {
        CRC64.checksum(&self.as_bytes()[..META_SIZE - 8])
    }

    /// Of two validation results, the valid meta with the greater txid.
    pub fn prefer<'a>(a: Option<&'a Meta>, b: Option<&'a Meta>) -> Option<&'a Meta> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if a.txid() >= b.txid() { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn version(&self) -> u32 {
        self.version.get()
    }

    pub fn root(&self) -> u64 {
        self.root.get()
    }

    pub fn set_root(&mut self, page_id: u64) {
        self.root = U64::new(page_id);
    }

    pub fn freelist(&self) -> u64 {
        self.freelist.get()
    }

    pub fn set_freelist(&mut self, page_id: u64) {
        self.freelist = U64::new(page_id);
    }

    /// High-water mark: one past the last page in use.
    pub fn pgid(&self) -> u64 {
        self.pgid.get()
    }

    pub fn set_pgid(&mut self, pgid: u64) {
        self.pgid = U64::new(pgid);
    }

    pub fn txid(&self) -> u64 {
        self.txid.get()
    }

    pub fn set_txid(&mut self, txid: u64) {
        self.txid = U64::new(txid);
    }
}

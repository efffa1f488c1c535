//! # Database Handle
//!
//! Thin owner of the page-memory subsystem: the mapped file, the two
//! metadata pages at its front, the growth sizer, and the page-buffer pool
//! used to build new pages.
//!
//! The handle deliberately stops at page memory. Trees, cursors, and
//! transactions are built on top of it; all they get from here is a
//! validated metadata snapshot, a map that is guaranteed to cover the pages
//! they were promised, and uninitialized page buffers to fill.
//!
//! ## Growth Discipline
//!
//! All map growth funnels through [`Db::ensure_mapped`], serialized by one
//! mutex. The sizer decides the target size (coarse levels, then 1 GiB
//! steps), so concurrent writers asking for slightly different minimums
//! collapse into the same remap. The data file itself grows separately in
//! `alloc_size` chunks via [`Db::grow_data_file`], which amortizes
//! truncate/fsync cost without forcing a remap.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{ensure, eyre, Result, WrapErr};
use parking_lot::Mutex;

use crate::config::{
    DEFAULT_ALLOC_SIZE, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_BATCH_DELAY_MS,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_PAGE_SIZE,
};
use crate::memory::{PageBuf, PagePool, PoolConfig};
use crate::storage::meta::META_PAGE_COUNT;
use crate::storage::{Meta, MmapSizer, MmapStorage, META_SIZE};

/// Open-time tuning for a [`Db`].
#[derive(Debug, Clone)]
pub struct Options {
    /// How long to wait for the file lock. Zero waits indefinitely.
    pub lock_timeout: Duration,
    /// Skip the flush performed before growing the file or remapping.
    /// Faster, at the cost of potential data loss on power failure.
    pub no_grow_sync: bool,
    /// Open the database read-only: writes and growth are refused.
    pub read_only: bool,
    /// Initial size of the memory map in bytes. A map large enough for the
    /// database's expected growth means readers never wait on a remap.
    pub initial_mmap_size: u64,
    /// Maximum number of writes coalesced into one batch. Zero disables
    /// batching.
    pub max_batch_size: usize,
    /// Maximum delay before a pending batch starts.
    pub max_batch_delay: Duration,
    /// File-growth chunk in bytes: how much the data file is extended at a
    /// time.
    pub alloc_size: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::ZERO,
            no_grow_sync: false,
            read_only: false,
            initial_mmap_size: 0,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_delay: Duration::from_millis(DEFAULT_MAX_BATCH_DELAY_MS),
            alloc_size: DEFAULT_ALLOC_SIZE,
        }
    }
}

/// Handle to one database file: mapped storage, metadata, sizer, and the
/// page-buffer pool.
pub struct Db {
    path: PathBuf,
    options: Options,
    sizer: MmapSizer,
    pool: PagePool,
    /// Also serves as the map-growth lock: every remap happens while this
    /// mutex is held.
    storage: Mutex<MmapStorage>,
}

impl Db {
    /// Opens the database at `path`, creating it if absent (unless
    /// read-only).
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        ensure!(options.alloc_size > 0, "alloc_size must be nonzero");

        let exists = path
            .try_exists()
            .wrap_err_with(|| format!("failed to probe '{}'", path.display()))?;

        if !exists {
            ensure!(
                !options.read_only,
                "cannot create '{}' in read-only mode",
                path.display()
            );

            Self::init_file(&path, DEFAULT_PAGE_SIZE)?;
        }

        let page_size = sniff_page_size(&path)
            .wrap_err_with(|| format!("failed to read metadata from '{}'", path.display()))?;

        let mut storage = MmapStorage::open(&path, page_size, options.read_only)?;
        storage.set_grow_sync(!options.no_grow_sync);

        let sizer = MmapSizer::new(page_size as u64);

        // Map at least the whole file, and at least the configured initial
        // size, rounded up by the sizer so early growth stays remap-free.
        let target = storage.file_len().max(options.initial_mmap_size);
        let map_len = sizer
            .compute_mmap_size(target)
            .wrap_err_with(|| format!("cannot map '{}'", path.display()))?;
        storage.remap(map_len)?;

        let pool = PagePool::with_config(PoolConfig {
            page_size,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            reset: None,
        });

        let db = Self {
            path,
            options,
            sizer,
            pool,
            storage: Mutex::new(storage),
        };

        // Fail now, not on first use, if the metadata is unusable.
        db.meta()?;

        Ok(db)
    }

    /// Writes a fresh database file: two sealed meta pages, txids 0 and 1.
    fn init_file(path: &Path, page_size: usize) -> Result<()> {
        let mut storage =
            MmapStorage::create(path, page_size, META_PAGE_COUNT * page_size as u64)?;

        for page_no in 0..META_PAGE_COUNT {
            let meta = Meta::new(page_size as u32, page_no);
            meta.write_to(storage.page_mut(page_no)?)?;
        }

        storage.sync()
    }

    /// The current metadata snapshot: the valid meta page with the greater
    /// transaction id. Errors when both copies are invalid.
    pub fn meta(&self) -> Result<Meta> {
        let storage = self.storage.lock();

        let meta0 = storage.page(0).ok().and_then(|p| Meta::from_bytes(p).ok());
        let meta1 = storage.page(1).ok().and_then(|p| Meta::from_bytes(p).ok());

        let meta = Meta::prefer(meta0, meta1)
            .copied()
            .ok_or_else(|| eyre!("both meta pages of '{}' are invalid", self.path.display()))?;

        ensure!(
            meta.page_size() as usize == storage.page_size(),
            "meta page size {} does not match storage page size {}",
            meta.page_size(),
            storage.page_size()
        );

        Ok(meta)
    }

    /// Ensures the memory map covers at least `min_size` bytes, remapping
    /// through the sizer when it does not. Returns the resulting map
    /// length.
    pub fn ensure_mapped(&self, min_size: u64) -> Result<u64> {
        let mut storage = self.storage.lock();

        if min_size <= storage.map_len() {
            return Ok(storage.map_len());
        }

        ensure!(
            !self.options.read_only,
            "cannot grow the map of read-only database '{}'",
            self.path.display()
        );

        let target = self
            .sizer
            .compute_mmap_size(min_size)
            .wrap_err_with(|| {
                format!(
                    "cannot grow memory map of '{}' to at least {} bytes",
                    self.path.display(),
                    min_size
                )
            })?;

        storage.remap(target)?;
        Ok(target)
    }

    /// Ensures the data file holds at least `min_len` bytes, extending it
    /// in `alloc_size` chunks. Returns the resulting file length.
    pub fn grow_data_file(&self, min_len: u64) -> Result<u64> {
        let mut storage = self.storage.lock();

        if min_len <= storage.file_len() {
            return Ok(storage.file_len());
        }

        ensure!(
            !self.options.read_only,
            "cannot grow read-only database '{}'",
            self.path.display()
        );

        let chunked = min_len
            .next_multiple_of(self.options.alloc_size)
            .next_multiple_of(storage.page_size() as u64);

        storage.grow_file(chunked)?;
        Ok(chunked)
    }

    /// Takes an uninitialized page buffer from the pool.
    pub fn allocate_buffer(&self) -> PageBuf {
        self.pool.get()
    }

    /// The pool handing out this database's page buffers.
    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    /// Flushes the map to disk.
    pub fn sync(&self) -> Result<()> {
        self.storage.lock().sync()
    }

    pub fn page_size(&self) -> usize {
        self.pool.page_size()
    }

    pub fn mapped_len(&self) -> u64 {
        self.storage.lock().map_len()
    }

    pub fn file_len(&self) -> u64 {
        self.storage.lock().file_len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.path)
            .field("page_size", &self.page_size())
            .field("read_only", &self.options.read_only)
            .finish()
    }
}

/// Determines the file's page size from its meta pages. Tries meta 0 at
/// offset zero; a torn meta 0 falls back to meta 1 at the default page
/// size.
fn sniff_page_size(path: &Path) -> Result<usize> {
    let mut file = File::open(path)
        .wrap_err_with(|| format!("failed to open '{}'", path.display()))?;

    let mut buf = [0u8; META_SIZE];

    if file.read_exact(&mut buf).is_ok() {
        if let Ok(meta) = Meta::from_bytes(&buf) {
            return Ok(meta.page_size() as usize);
        }
    }

    file.seek(SeekFrom::Start(DEFAULT_PAGE_SIZE as u64))
        .wrap_err("failed to seek to backup meta page")?;
    file.read_exact(&mut buf)
        .wrap_err("failed to read backup meta page")?;

    let meta = Meta::from_bytes(&buf).wrap_err("both meta pages are invalid")?;
    Ok(meta.page_size() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_a_fresh_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Db::open(&path, Options::default()).unwrap();

        assert_eq!(db.page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(db.file_len(), META_PAGE_COUNT * DEFAULT_PAGE_SIZE as u64);

        let meta = db.meta().unwrap();
        assert_eq!(meta.txid(), 1, "meta 1 has the greater txid on creation");
        assert_eq!(meta.pgid(), META_PAGE_COUNT);
    }

    #[test]
    fn initial_map_is_sized_by_the_sizer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Db::open(&path, Options::default()).unwrap();

        // Two 4 KiB pages of file round up to the smallest level, 32 KiB.
        assert_eq!(db.mapped_len(), 1 << 15);
    }

    #[test]
    fn reopen_finds_the_same_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            Db::open(&path, Options::default()).unwrap();
        }

        let db = Db::open(&path, Options::default()).unwrap();
        assert_eq!(db.meta().unwrap().txid(), 1);
    }

    #[test]
    fn read_only_cannot_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.db");

        let options = Options {
            read_only: true,
            ..Options::default()
        };

        assert!(Db::open(&path, options).is_err());
    }

    #[test]
    fn allocate_buffer_matches_page_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Db::open(&path, Options::default()).unwrap();
        let buffer = db.allocate_buffer();

        assert_eq!(buffer.len(), db.page_size());
    }
}

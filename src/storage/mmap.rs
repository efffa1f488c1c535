//! # Memory-Mapped Storage
//!
//! File-backed page storage for the database handle. The whole file is
//! mapped into the process address space; page access is pointer arithmetic
//! into the map, with no buffer copies and no syscalls on the hot path.
//!
//! ## Map Geometry
//!
//! The map and the file grow independently:
//!
//! - The **file** grows in modest chunks (`Options::alloc_size`) as pages
//!   are allocated, amortizing truncate/fsync cost.
//! - The **map** grows in the coarse increments computed by the sizer, so
//!   remapping, the expensive operation, happens rarely. The map may
//!   exceed the file (over-mapping); page accesses are bounds-checked
//!   against the *file* length, which keeps reads and writes inside the
//!   backed region.
//!
//! ## Safety Model
//!
//! A remap invalidates every slice handed out from the old map. Instead of
//! hazard pointers or epoch tracking, the borrow checker enforces safety at
//! compile time: `page()` borrows `&self`, `page_mut()` and `remap()` take
//! `&mut self`, so no page reference can be live across a remap.
//!
//! ## Read-Only Mode
//!
//! A storage opened read-only maps the file with `PROT_READ`; `page_mut`,
//! `grow_file`, and `remap` to a larger size refuse with an error rather
//! than faulting.

use std::fs::{File, OpenOptions};
use std::path::Path;

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::{Mmap, MmapMut, MmapOptions};

enum MapInner {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl MapInner {
    fn as_slice(&self) -> &[u8] {
        match self {
            MapInner::ReadWrite(map) => map,
            MapInner::ReadOnly(map) => map,
        }
    }
}

pub struct MmapStorage {
    file: File,
    map: MapInner,
    map_len: u64,
    file_len: u64,
    page_size: usize,
    grow_sync: bool,
}

impl MmapStorage {
    /// Creates a new storage file of `initial_len` bytes and maps it
    /// read-write.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize, initial_len: u64) -> Result<Self> {
        let path = path.as_ref();

        ensure!(page_size > 0, "page size must be nonzero");
        ensure!(
            initial_len > 0 && initial_len % page_size as u64 == 0,
            "initial length {} is not a positive multiple of page size {}",
            initial_len,
            page_size
        );

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create database file '{}'", path.display()))?;

        file.set_len(initial_len)
            .wrap_err_with(|| format!("failed to set file size to {} bytes", initial_len))?;

        let map = Self::map_range(&file, initial_len, false)?;

        Ok(Self {
            file,
            map,
            map_len: initial_len,
            file_len: initial_len,
            page_size,
            grow_sync: true,
        })
    }

    /// Opens an existing storage file and maps its current length.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize, read_only: bool) -> Result<Self> {
        let path = path.as_ref();

        ensure!(page_size > 0, "page size must be nonzero");

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(path)
            .wrap_err_with(|| format!("failed to open database file '{}'", path.display()))?;

        let file_len = file
            .metadata()
            .wrap_err_with(|| format!("failed to stat '{}'", path.display()))?
            .len();

        ensure!(
            file_len > 0,
            "cannot open empty database file '{}'",
            path.display()
        );

        ensure!(
            file_len % page_size as u64 == 0,
            "database file '{}' size {} is not a multiple of page size {}",
            path.display(),
            file_len,
            page_size
        );

        let map = Self::map_range(&file, file_len, read_only)?;

        Ok(Self {
            file,
            map,
            map_len: file_len,
            file_len,
            page_size,
            grow_sync: true,
        })
    }

    /// Disables the flush performed before file growth and remapping.
    /// Faster, at the cost of potential data loss on power failure.
    pub fn set_grow_sync(&mut self, grow_sync: bool) {
        self.grow_sync = grow_sync;
    }

    fn map_range(file: &File, len: u64, read_only: bool) -> Result<MapInner> {
        ensure!(len > 0, "cannot map zero bytes");

        let len_usize = usize::try_from(len).wrap_err("map length exceeds address space")?;

        // SAFETY: mapping a file is unsafe because external processes could
        // mutate it underneath us. This is safe because:
        // 1. Database files are owned by one process; concurrent external
        //    modification is outside the supported contract.
        // 2. The map's lifetime is tied to MmapStorage, preventing
        //    use-after-unmap.
        // 3. All access goes through page()/page_mut(), which bounds-check
        //    against the file length, so an over-map never faults.
        unsafe {
            let map = if read_only {
                MapInner::ReadOnly(
                    MmapOptions::new()
                        .len(len_usize)
                        .map(file)
                        .wrap_err("failed to memory-map file read-only")?,
                )
            } else {
                MapInner::ReadWrite(
                    MmapOptions::new()
                        .len(len_usize)
                        .map_mut(file)
                        .wrap_err("failed to memory-map file")?,
                )
            };

            Ok(map)
        }
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.map, MapInner::ReadOnly(_))
    }

    pub fn map_len(&self) -> u64 {
        self.map_len
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.file_len / self.page_size as u64
    }

    /// Pages that are both file-backed and inside the current map.
    fn accessible_pages(&self) -> u64 {
        self.file_len.min(self.map_len) / self.page_size as u64
    }

    /// Borrows page `page_no` immutably.
    pub fn page(&self, page_no: u64) -> Result<&[u8]> {
        ensure!(
            page_no < self.accessible_pages(),
            "page {} out of bounds (accessible pages={})",
            page_no,
            self.accessible_pages()
        );

        let offset = page_no as usize * self.page_size;
        Ok(&self.map.as_slice()[offset..offset + self.page_size])
    }

    /// Borrows page `page_no` mutably. Refused on read-only storage.
    pub fn page_mut(&mut self, page_no: u64) -> Result<&mut [u8]> {
        ensure!(
            page_no < self.accessible_pages(),
            "page {} out of bounds (accessible pages={})",
            page_no,
            self.accessible_pages()
        );

        let offset = page_no as usize * self.page_size;

        match &mut self.map {
            MapInner::ReadWrite(map) => Ok(&mut map[offset..offset + self.page_size]),
            MapInner::ReadOnly(_) => bail!("cannot write page {} to read-only storage", page_no),
        }
    }

    /// Extends the file to `new_len` bytes. No-op when the file is already
    /// that large. Does not touch the map; callers remap separately when
    /// the map must also grow.
    pub fn grow_file(&mut self, new_len: u64) -> Result<()> {
        if new_len <= self.file_len {
            return Ok(());
        }

        ensure!(
            !self.is_read_only(),
            "cannot grow read-only storage to {} bytes",
            new_len
        );

        ensure!(
            new_len % self.page_size as u64 == 0,
            "new file length {} is not a multiple of page size {}",
            new_len,
            self.page_size
        );

        if self.grow_sync {
            self.flush().wrap_err("failed to flush before file growth")?;
        }

        self.file
            .set_len(new_len)
            .wrap_err_with(|| format!("failed to extend file to {} bytes", new_len))?;

        if self.grow_sync {
            self.file
                .sync_all()
                .wrap_err("failed to sync file metadata after growth")?;
        }

        self.file_len = new_len;
        Ok(())
    }

    /// Replaces the map with one of `new_map_len` bytes.
    ///
    /// The new map may exceed the file length (over-mapping). Requires
    /// `&mut self`, so the borrow checker guarantees no page slice from the
    /// old map survives the remap.
    pub fn remap(&mut self, new_map_len: u64) -> Result<()> {
        if new_map_len == self.map_len {
            return Ok(());
        }

        if self.grow_sync && !self.is_read_only() {
            self.flush().wrap_err("failed to flush before remap")?;
        }

        let read_only = self.is_read_only();

        // The old map is dropped when the new one is assigned.
        self.map = Self::map_range(&self.file, new_map_len, read_only)?;
        self.map_len = new_map_len;

        Ok(())
    }

    /// Flushes map contents to disk. No-op on read-only storage.
    pub fn sync(&self) -> Result<()> {
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        match &self.map {
            MapInner::ReadWrite(map) => map.flush().wrap_err("failed to flush mmap to disk"),
            MapInner::ReadOnly(_) => Ok(()),
        }
    }

    /// Hints the kernel to fault in `count` pages starting at `start_page`.
    pub fn prefetch_pages(&self, start_page: u64, count: u64) {
        if start_page >= self.accessible_pages() {
            return;
        }

        let end_page = (start_page + count).min(self.accessible_pages());
        let start_offset = start_page as usize * self.page_size;
        let len = (end_page - start_page) as usize * self.page_size;

        #[cfg(unix)]
        // SAFETY: madvise with MADV_WILLNEED is advisory. The range is
        // bounds-checked above: start_offset + len is at most file_len,
        // which is within the map.
        unsafe {
            libc::madvise(
                self.map.as_slice().as_ptr().add(start_offset) as *mut libc::c_void,
                len,
                libc::MADV_WILLNEED,
            );
        }

        #[cfg(not(unix))]
        let _ = (start_offset, len);
    }
}

impl std::fmt::Debug for MmapStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapStorage")
            .field("file_len", &self.file_len)
            .field("map_len", &self.map_len)
            .field("page_size", &self.page_size)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

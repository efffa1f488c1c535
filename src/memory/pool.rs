//! # Page Buffer Pool
//!
//! Concurrent allocator for fixed-size, cache-line-aligned page buffers.
//!
//! ## Design
//!
//! Three tiers, fastest first:
//!
//! 1. **Thread-local cache**: a bounded stack of free pages owned by one
//!    thread. Pop and push are plain vector operations; no atomics.
//! 2. **Victim list**: an unbounded lock-free stack (Treiber stack) shared
//!    by every thread, used when a local cache runs empty or full. The only
//!    synchronization in the pool is the compare-and-swap loop on its head.
//! 3. **Heap**: when both tiers miss, a fresh page is allocated with the
//!    pool's aligned layout. `get` therefore never fails; heap exhaustion
//!    aborts through the global allocator's error hook.
//!
//! A free page on the victim list carries the stack's next-link in its own
//! first machine word. The payload is dead while the page is free, so the
//! link needs no side allocation.
//!
//! ## Ownership
//!
//! Exactly one place owns a page at any time: a [`PageBuf`] handle on loan
//! to a consumer, one slot of one thread's local cache, or the victim list.
//! `PageBuf` is a move-only handle that returns its page on drop, so the
//! "return to pool" step cannot be forgotten or done twice.
//!
//! ## Teardown
//!
//! Dropping the last handle to the pool detaches the victim list with one
//! atomic exchange and frees every node on it. A thread's local cache is
//! freed directly to the OS when the thread exits; its pages are not
//! migrated to the shared list.
//!
//! ## Ordering
//!
//! The victim head is loaded with `Acquire` (a steal must observe the link
//! written by the push it races with) and published with `Release`. A
//! failed compare-exchange retries from the freshly observed head. No
//! operation blocks; contention costs retries, never waits.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::{Arc, Weak};

#[cfg(not(loom))]
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use smallvec::SmallVec;

use crate::config::{DEFAULT_CACHE_CAPACITY, DEFAULT_PAGE_SIZE, PAGE_ALIGN};

/// Reset hook run on a page every time it is returned to the pool, before
/// the page becomes visible to any other thread.
///
/// The default is no reset: pages come back out of `get` with whatever
/// bytes their last owner left in them. A pool holding sensitive data can
/// install a hook that zeroes (part of) the buffer. The hook must not
/// block, allocate, or retain the slice.
pub type ResetFn = fn(&mut [u8]);

/// Construction-time tuning for a [`PagePool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Size of every page buffer in bytes. Must be at least one machine
    /// word (the free-list link lives in the first word of a free page).
    pub page_size: usize,
    /// Capacity of each thread-local cache. Puts beyond this spill to the
    /// shared victim list.
    pub cache_capacity: usize,
    /// Optional per-put reset hook.
    pub reset: Option<ResetFn>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            reset: None,
        }
    }
}

/// Monotonic pool identity, used to key thread-local caches so pages from
/// independent pools never mix.
static NEXT_POOL_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

thread_local! {
    /// Per-thread registry of local caches, keyed by pool id. One pool per
    /// process is the expected case, hence the inline capacity of one.
    static LOCAL_CACHES: RefCell<SmallVec<[(u64, LocalCache); 1]>> =
        RefCell::new(SmallVec::new());
}

// ============================================================================
// Victim list
// ============================================================================

/// The shared overflow stack: an unbounded, lock-free, multi-producer
/// multi-consumer singly linked stack of free pages.
///
/// # Invariants
///
/// - A page is reachable from `head` if and only if it is free and owned by
///   no thread-local cache and no `PageBuf`.
/// - The first machine word of a linked page holds the pointer to the next
///   linked page (null terminates the list). The word is written while the
///   pushing thread still owns the page exclusively and read only after an
///   `Acquire` load of the head that observed the `Release` publish.
/// - Pages are recycled, never deallocated while the pool is live, so a
///   page popped by one thread cannot be observed as free by another.
struct VictimList {
    head: CachePadded<AtomicPtr<u8>>,
}

impl VictimList {
    fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    /// Pushes a free page onto the stack.
    ///
    /// # Safety
    ///
    /// `page` must point to a live allocation of at least one machine word,
    /// exclusively owned by the caller, with no live payload.
    unsafe fn push(&self, page: NonNull<u8>) {
        let mut head = self.head.load(Ordering::Acquire);

        loop {
            // The page is still exclusively ours until the CAS below
            // publishes it, so this plain store cannot race with a reader.
            ptr::write(page.as_ptr().cast::<*mut u8>(), head);

            match self.head.compare_exchange_weak(
                head,
                page.as_ptr(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }

    /// Steals one page from the stack. Returns `None` when the stack is
    /// observed empty.
    fn steal(&self) -> Option<NonNull<u8>> {
        let mut head = self.head.load(Ordering::Acquire);

        while !head.is_null() {
            // SAFETY: a non-null head was published by push() with Release
            // ordering, and our Acquire load observed it, so the first word
            // of the node holds a valid next-link.
            let next = unsafe { ptr::read(head.cast::<*mut u8>().cast_const()) };

            match self.head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return NonNull::new(head),
                Err(observed) => head = observed,
            }
        }

        None
    }

    /// Detaches the entire stack, returning the old head for a sequential
    /// walk. Used at teardown and by [`PagePool::purge`], where no further
    /// contention on the detached chain is possible.
    fn take_all(&self) -> *mut u8 {
        self.head.swap(ptr::null_mut(), Ordering::Acquire)
    }
}

// ============================================================================
// Thread-local cache
// ============================================================================

/// Bounded per-thread stack of free pages. Touched by exactly one thread
/// for its entire lifetime, so no synchronization is needed.
struct LocalCache {
    pages: Vec<NonNull<u8>>,
    capacity: usize,
    layout: Layout,
    /// Back-reference for the freed-pages counter; weak so a cache never
    /// keeps a dropped pool's shared state alive.
    pool: Weak<PoolShared>,
}

impl LocalCache {
    fn new(capacity: usize, layout: Layout, pool: Weak<PoolShared>) -> Self {
        Self {
            pages: Vec::with_capacity(capacity),
            capacity,
            layout,
            pool,
        }
    }

    fn try_pop(&mut self) -> Option<NonNull<u8>> {
        self.pages.pop()
    }

    fn try_push(&mut self, page: NonNull<u8>) -> bool {
        if self.pages.len() >= self.capacity {
            return false;
        }

        self.pages.push(page);
        true
    }
}

impl Drop for LocalCache {
    /// Thread-exit drain: pages go straight back to the OS. They are not
    /// migrated to the shared victim list.
    fn drop(&mut self) {
        let drained = self.pages.len();

        for page in self.pages.drain(..) {
            // SAFETY: every page in the cache was allocated with
            // self.layout and is owned by this cache alone.
            unsafe { dealloc(page.as_ptr(), self.layout) };
        }

        if let Some(shared) = self.pool.upgrade() {
            shared.freed.fetch_add(drained, Ordering::Relaxed);
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

struct PoolShared {
    id: u64,
    layout: Layout,
    cache_capacity: usize,
    reset: Option<ResetFn>,
    victims: VictimList,
    /// Pages obtained from the heap over the pool's lifetime.
    allocated: AtomicUsize,
    /// Pages returned to the heap (purge, teardown, thread-exit drains).
    freed: AtomicUsize,
}

impl PoolShared {
    fn page_size(&self) -> usize {
        self.layout.size()
    }

    fn alloc_page(&self) -> NonNull<u8> {
        // SAFETY: the layout has nonzero size, checked at construction.
        let raw = unsafe { alloc(self.layout) };

        let Some(page) = NonNull::new(raw) else {
            handle_alloc_error(self.layout)
        };

        self.allocated.fetch_add(1, Ordering::Relaxed);
        page
    }

    /// Frees every page currently parked on the victim list. Returns the
    /// number of pages freed.
    fn drain_victims(&self) -> usize {
        let mut head = self.victims.take_all();
        let mut drained = 0;

        while !head.is_null() {
            // SAFETY: the chain was detached by a single atomic exchange,
            // so every node on it is exclusively ours; the first word of
            // each node is the next-link written when it was pushed.
            let next = unsafe { ptr::read(head.cast::<*mut u8>().cast_const()) };

            // SAFETY: the node was allocated with self.layout and is no
            // longer reachable from the list.
            unsafe { dealloc(head, self.layout) };

            head = next;
            drained += 1;
        }

        self.freed.fetch_add(drained, Ordering::Relaxed);
        drained
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        self.drain_victims();
    }
}

/// Runs the reset hook and hands `page` back to the pool: thread-local
/// cache first, victim list when the cache is full or the thread's local
/// storage is already gone (thread teardown).
fn release(shared: &Arc<PoolShared>, page: NonNull<u8>) {
    if let Some(reset) = shared.reset {
        // SAFETY: the page is exclusively ours and spans page_size() bytes.
        reset(unsafe { slice::from_raw_parts_mut(page.as_ptr(), shared.page_size()) });
    }

    let cached = with_local_cache(shared, |cache| cache.try_push(page)).unwrap_or(false);

    if cached {
        return;
    }

    // SAFETY: the page is exclusively ours with no live payload, and every
    // page is at least one machine word (checked at construction).
    unsafe { shared.victims.push(page) };
}

/// Looks up (or creates) this thread's local cache for `shared`'s pool and
/// runs `f` on it. Returns `None` when thread-local storage is being torn
/// down.
fn with_local_cache<R>(shared: &Arc<PoolShared>, f: impl FnOnce(&mut LocalCache) -> R) -> Option<R> {
    LOCAL_CACHES
        .try_with(|caches| {
            let mut caches = caches.borrow_mut();

            let idx = match caches.iter().position(|(id, _)| *id == shared.id) {
                Some(idx) => idx,
                None => {
                    caches.push((
                        shared.id,
                        LocalCache::new(
                            shared.cache_capacity,
                            shared.layout,
                            Arc::downgrade(shared),
                        ),
                    ));
                    caches.len() - 1
                }
            };

            f(&mut caches[idx].1)
        })
        .ok()
}

/// Concurrent page-buffer allocator.
///
/// Cheap to clone (the clones share one pool). The engine constructs one
/// pool per process and passes handles to the components that build pages.
///
/// ```ignore
/// let pool = PagePool::new();
///
/// let mut page = pool.get();          // uninitialized page_size() bytes
/// page[..4].copy_from_slice(b"node");
/// drop(page);                         // returns to the pool
/// ```
pub struct PagePool {
    shared: Arc<PoolShared>,
}

impl PagePool {
    /// Creates a pool with the default configuration: 4 KiB pages, 32-slot
    /// thread caches, no reset hook.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates a pool with explicit tuning.
    ///
    /// # Panics
    ///
    /// Panics when `page_size` is smaller than a machine word, when
    /// `cache_capacity` is zero, or when the page layout would overflow.
    /// These are construction-time programmer errors, not runtime
    /// conditions.
    pub fn with_config(config: PoolConfig) -> Self {
        assert!(
            config.page_size >= std::mem::size_of::<usize>(),
            "page size {} cannot hold a free-list link",
            config.page_size
        );
        assert!(config.cache_capacity > 0, "cache capacity must be nonzero");

        let layout = Layout::from_size_align(config.page_size, PAGE_ALIGN)
            .expect("page size overflows a valid allocation layout");

        Self {
            shared: Arc::new(PoolShared {
                id: NEXT_POOL_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
                layout,
                cache_capacity: config.cache_capacity,
                reset: config.reset,
                victims: VictimList::new(),
                allocated: AtomicUsize::new(0),
                freed: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes a page buffer from the pool.
    ///
    /// Tries the calling thread's cache, then the shared victim list, then
    /// allocates fresh. Never fails; the only failure mode is process-level
    /// out-of-memory inside the global allocator.
    ///
    /// The returned payload is uninitialized unless the pool's reset hook
    /// guarantees otherwise; callers must not assume zeroed memory.
    pub fn get(&self) -> PageBuf {
        let page = with_local_cache(&self.shared, |cache| cache.try_pop())
            .flatten()
            .or_else(|| self.shared.victims.steal())
            .unwrap_or_else(|| self.shared.alloc_page());

        PageBuf {
            page,
            pool: Arc::clone(&self.shared),
        }
    }

    /// Returns a page buffer to the pool.
    ///
    /// Equivalent to dropping the buffer; provided for call sites where the
    /// hand-back should be explicit.
    pub fn put(&self, page: PageBuf) {
        debug_assert!(
            Arc::ptr_eq(&self.shared, &page.pool),
            "page returned to a different pool"
        );

        drop(page);
    }

    /// Frees every page currently parked on the shared victim list back to
    /// the OS, returning how many were freed.
    ///
    /// Pages in thread-local caches and pages on loan are unaffected. Meant
    /// for quiescent points (checkpoints, memory-pressure handling) where
    /// parked capacity is not expected to be reused soon.
    pub fn purge(&self) -> usize {
        self.shared.drain_victims()
    }

    /// Size in bytes of every buffer this pool hands out.
    pub fn page_size(&self) -> usize {
        self.shared.page_size()
    }

    /// Total pages obtained from the heap over the pool's lifetime.
    pub fn allocated_pages(&self) -> usize {
        self.shared.allocated.load(Ordering::Relaxed)
    }

    /// Total pages returned to the heap (purges and thread-exit drains).
    pub fn freed_pages(&self) -> usize {
        self.shared.freed.load(Ordering::Relaxed)
    }
}

impl Default for PagePool {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PagePool {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePool")
            .field("page_size", &self.shared.page_size())
            .field("cache_capacity", &self.shared.cache_capacity)
            .finish()
    }
}

// ============================================================================
// Buffer handle
// ============================================================================

/// A page buffer on loan from a [`PagePool`].
///
/// Derefs to `[u8]` of exactly `page_size()` bytes. Move-only: exactly one
/// owner exists at any time, and the page returns to the pool when the
/// handle drops. The handle keeps the pool's shared state alive, so a page
/// may safely outlive the last `PagePool` clone.
pub struct PageBuf {
    page: NonNull<u8>,
    pool: Arc<PoolShared>,
}

impl PageBuf {
    /// Length of the buffer in bytes (the pool's page size).
    pub fn len(&self) -> usize {
        self.pool.page_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        self
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self
    }

    /// Raw pointer to the start of the buffer. Valid while the handle is
    /// live; 64-byte aligned.
    pub fn as_ptr(&self) -> *const u8 {
        self.page.as_ptr()
    }
}

impl Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the handle exclusively owns a live allocation of
        // page_size() bytes; shared reads through &self are race-free.
        unsafe { slice::from_raw_parts(self.page.as_ptr(), self.pool.page_size()) }
    }
}

impl DerefMut for PageBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.page.as_ptr(), self.pool.page_size()) }
    }
}

impl Drop for PageBuf {
    fn drop(&mut self) {
        release(&self.pool, self.page);
    }
}

impl std::fmt::Debug for PageBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageBuf")
            .field("page", &self.page)
            .field("len", &self.len())
            .finish()
    }
}

// SAFETY: the handle is the sole owner of its page; the shared pool state
// it carries is itself Send + Sync. Moving the handle moves ownership of
// the bytes with it.
unsafe impl Send for PageBuf {}

// SAFETY: &PageBuf only exposes the payload through &[u8]; concurrent
// shared reads of plain bytes are race-free.
unsafe impl Sync for PageBuf {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn get_returns_page_sized_aligned_buffer() {
        let pool = PagePool::new();
        let page = pool.get();

        assert_eq!(page.len(), DEFAULT_PAGE_SIZE);
        assert_eq!(page.as_ptr() as usize % PAGE_ALIGN, 0);
    }

    #[test]
    fn same_thread_put_get_reuses_the_buffer() {
        let pool = PagePool::new();

        let page = pool.get();
        let addr = page.as_ptr();
        pool.put(page);

        let page = pool.get();
        assert_eq!(page.as_ptr(), addr, "fast path must reuse LIFO");
    }

    #[test]
    fn drop_is_equivalent_to_put() {
        let pool = PagePool::new();

        let page = pool.get();
        let addr = page.as_ptr();
        drop(page);

        assert_eq!(pool.get().as_ptr(), addr);
    }

    #[test]
    fn live_pages_are_distinct() {
        let pool = PagePool::new();

        let a = pool.get();
        let b = pool.get();

        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn marker_survives_while_on_loan() {
        let pool = PagePool::new();

        let mut page = pool.get();
        page[..8].copy_from_slice(&0xDEAD_BEEF_CAFE_F00Du64.to_le_bytes());
        let other = pool.get();

        assert_eq!(&page[..8], &0xDEAD_BEEF_CAFE_F00Du64.to_le_bytes());
        drop(other);
        assert_eq!(&page[..8], &0xDEAD_BEEF_CAFE_F00Du64.to_le_bytes());
    }

    #[test]
    fn full_local_cache_spills_to_victim_list() {
        let pool = PagePool::with_config(PoolConfig {
            page_size: 256,
            cache_capacity: 2,
            reset: None,
        });

        let pages: Vec<_> = (0..5).map(|_| pool.get()).collect();
        assert_eq!(pool.allocated_pages(), 5);

        drop(pages);

        // Two stay in this thread's cache, three spill to the victim list.
        assert_eq!(pool.purge(), 3);
        assert_eq!(pool.purge(), 0);
        assert_eq!(pool.freed_pages(), 3);
    }

    #[test]
    fn purge_on_empty_pool_is_zero() {
        let pool = PagePool::new();
        assert_eq!(pool.purge(), 0);
    }

    fn zero_prefix(buf: &mut [u8]) {
        buf[..16].fill(0);
    }

    #[test]
    fn reset_hook_runs_before_reuse() {
        let pool = PagePool::with_config(PoolConfig {
            page_size: 256,
            cache_capacity: 4,
            reset: Some(zero_prefix),
        });

        let mut page = pool.get();
        page[..16].fill(0xAB);
        pool.put(page);

        let page = pool.get();
        assert_eq!(&page[..16], &[0u8; 16]);
    }

    #[test]
    fn reuse_does_not_touch_the_heap() {
        let pool = PagePool::new();

        let page = pool.get();
        assert_eq!(pool.allocated_pages(), 1);
        drop(page);

        for _ in 0..100 {
            let page = pool.get();
            drop(page);
        }

        assert_eq!(pool.allocated_pages(), 1);
    }

    #[test]
    fn thread_exit_drains_local_cache_without_migration() {
        let pool = PagePool::new();

        {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let page = pool.get();
                drop(page); // parks in that thread's local cache
            })
            .join()
            .unwrap();
        }

        // The exiting thread freed its cache directly; nothing reached the
        // shared list.
        assert_eq!(pool.allocated_pages(), 1);
        assert_eq!(pool.freed_pages(), 1);
        assert_eq!(pool.purge(), 0);
    }

    #[test]
    fn page_may_outlive_the_pool_handle() {
        let pool = PagePool::new();
        let mut page = pool.get();
        drop(pool);

        page[0] = 0x7F;
        assert_eq!(page[0], 0x7F);
    }

    #[test]
    fn minimum_page_size_is_one_word() {
        let pool = PagePool::with_config(PoolConfig {
            page_size: std::mem::size_of::<usize>(),
            cache_capacity: 1,
            reset: None,
        });

        let a = pool.get();
        let b = pool.get();
        drop(a);
        drop(b);

        assert_eq!(pool.purge(), 1);
    }

    #[test]
    #[should_panic(expected = "cannot hold a free-list link")]
    fn sub_word_page_size_is_rejected() {
        let _ = PagePool::with_config(PoolConfig {
            page_size: 1,
            cache_capacity: 1,
            reset: None,
        });
    }

    #[test]
    fn pools_do_not_share_thread_caches() {
        let a = PagePool::with_config(PoolConfig {
            page_size: 128,
            cache_capacity: 4,
            reset: None,
        });
        let b = PagePool::with_config(PoolConfig {
            page_size: 4096,
            cache_capacity: 4,
            reset: None,
        });

        let page = a.get();
        drop(page);

        // b's get must not serve a's 128-byte cached page.
        let page = b.get();
        assert_eq!(page.len(), 4096);
        assert_eq!(b.allocated_pages(), 1);
    }
}

// ============================================================================
// Loom Tests
// ============================================================================

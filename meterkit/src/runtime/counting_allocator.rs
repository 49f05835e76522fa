use std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::atomic::{AtomicU64, Ordering},
};

use super::{MemoryStats, MemoryStatsSource};

/// A global allocator that counts what passes through it before handing it to `A`.
///
/// ```
/// use meterkit::runtime::CountingAllocator;
///
/// #[global_allocator]
/// static ALLOCATOR: CountingAllocator = CountingAllocator::system();
/// # fn main() {}
/// ```
///
/// `&'static CountingAllocator` is a [`MemoryStatsSource`]. It only sees the heap, so
/// the obtained-from-system figures are the high water mark of live bytes.
#[derive(Debug, Default)]
pub struct CountingAllocator<A = System> {
    inner: A,
    mallocs: AtomicU64,
    frees: AtomicU64,
    allocated_bytes: AtomicU64,
    freed_bytes: AtomicU64,
    peak_bytes: AtomicU64,
}

impl CountingAllocator<System> {
    /// Count allocations made by the system allocator.
    pub const fn system() -> Self {
        Self::new(System)
    }
}

impl<A> CountingAllocator<A> {
    /// Count allocations made by `inner`.
    pub const fn new(inner: A) -> Self {
        Self {
            inner,
            mallocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            allocated_bytes: AtomicU64::new(0),
            freed_bytes: AtomicU64::new(0),
            peak_bytes: AtomicU64::new(0),
        }
    }

    /// What has been counted so far.
    pub fn stats(&self) -> MemoryStats {
        let freed_bytes = self.freed_bytes.load(Ordering::Relaxed);
        let allocated_bytes = self.allocated_bytes.load(Ordering::Relaxed);
        let frees = self.frees.load(Ordering::Relaxed);
        let mallocs = self.mallocs.load(Ordering::Relaxed);
        let in_use = allocated_bytes.saturating_sub(freed_bytes);
        let peak = self.peak_bytes.load(Ordering::Relaxed).max(in_use);
        MemoryStats {
            sys_bytes: peak,
            alloc_bytes_total: allocated_bytes,
            heap_alloc_bytes: in_use,
            frees_total: frees,
            heap_idle_bytes: peak - in_use,
            heap_inuse_bytes: in_use,
            heap_objects: mallocs.saturating_sub(frees),
            heap_sys_bytes: peak,
            mallocs_total: mallocs,
            ..Default::default()
        }
    }

    fn allocated(&self, size: usize) {
        self.mallocs.fetch_add(1, Ordering::Relaxed);
        let allocated = self.allocated_bytes.fetch_add(size as u64, Ordering::Relaxed) + size as u64;
        let in_use = allocated.saturating_sub(self.freed_bytes.load(Ordering::Relaxed));
        self.peak_bytes.fetch_max(in_use, Ordering::Relaxed);
    }

    fn freed(&self, size: usize) {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.freed_bytes.fetch_add(size as u64, Ordering::Relaxed);
    }
}

// Counting never allocates, so this cannot recurse into itself.
unsafe impl<A> GlobalAlloc for CountingAllocator<A>
where
    A: GlobalAlloc,
{
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let allocation = unsafe { self.inner.alloc(layout) };
        if !allocation.is_null() {
            self.allocated(layout.size());
        }
        allocation
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { self.inner.dealloc(ptr, layout) };
        self.freed(layout.size());
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let allocation = unsafe { self.inner.alloc_zeroed(layout) };
        if !allocation.is_null() {
            self.allocated(layout.size());
        }
        allocation
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let allocation = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !allocation.is_null() {
            self.freed(layout.size());
            self.allocated(new_size);
        }
        allocation
    }
}

impl<A> MemoryStatsSource for &'static CountingAllocator<A>
where
    A: Send + Sync + 'static,
{
    fn memory_stats(&self) -> MemoryStats {
        self.stats()
    }
}

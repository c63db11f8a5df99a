//! Live heap accounting
//!
//! Rust has no collector to ask for live heap bytes, so the heap kind reads
//! counters maintained by [`CountingAllocator`]. Install it in the binary:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: holmes_lib::heap::CountingAllocator = holmes_lib::heap::CountingAllocator;
//! ```

use serde::{Deserialize, Serialize};
use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
static ALLOCATIONS: AtomicU64 = AtomicU64::new(0);
static DEALLOCATIONS: AtomicU64 = AtomicU64::new(0);

/// System allocator wrapper that tracks live bytes
pub struct CountingAllocator;

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc(layout);
        if !ptr.is_null() {
            LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = System.alloc_zeroed(layout);
        if !ptr.is_null() {
            LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
            ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
        LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
        DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            if new_size >= layout.size() {
                LIVE_BYTES.fetch_add(new_size - layout.size(), Ordering::Relaxed);
            } else {
                LIVE_BYTES.fetch_sub(layout.size() - new_size, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

/// Point-in-time allocator counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapStats {
    pub live_bytes: u64,
    pub allocations: u64,
    pub deallocations: u64,
}

impl HeapStats {
    /// Objects allocated and not yet freed
    pub fn live_objects(&self) -> u64 {
        self.allocations.saturating_sub(self.deallocations)
    }
}

/// Current counters, or `None` when the counting allocator is not installed
pub fn heap_stats() -> Option<HeapStats> {
    let allocations = ALLOCATIONS.load(Ordering::Relaxed);
    if allocations == 0 {
        return None;
    }
    Some(HeapStats {
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed) as u64,
        allocations,
        deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
    })
}

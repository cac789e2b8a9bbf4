//! Size-classed buffer pool backing every RX/TX buffer (spec.md §4.4).
//!
//! Four buckets, one per size class. Each bucket starts mutex-only; once
//! it has ever allocated 1 000 buffers it additionally turns on a
//! `crossbeam::queue::ArrayQueue` lock-free ring for the hot path, and
//! never turns it back off (spec.md §9 — "one-way within a bucket
//! lifetime"). Buffers are handed out and taken back by value, so there
//! is no separate free-list bookkeeping struct for an in-use buffer the
//! way a C-style intrusive free list needs one: ownership transfer to
//! the caller already removes it from the bucket, and [`PoolHandle`]'s
//! `Drop` is what brings it back. This is the safety improvement over
//! the teacher's `net::ConnectionPool`, which tracks buffers by raw
//! pointer and leaves returning them to the caller.

use crossbeam::queue::ArrayQueue;
use std::alloc::{self, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Size classes a request rounds up to. `acquire` requests above
/// `XLarge` bypass the pool entirely (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketClass {
    /// 1 KiB.
    Small,
    /// 4 KiB.
    Medium,
    /// 16 KiB.
    Large,
    /// 64 KiB.
    XLarge,
}

impl BucketClass {
    const ALL: [BucketClass; 4] = [
        BucketClass::Small,
        BucketClass::Medium,
        BucketClass::Large,
        BucketClass::XLarge,
    ];

    /// Byte size of this class.
    pub const fn bytes(self) -> usize {
        match self {
            BucketClass::Small => 1024,
            BucketClass::Medium => 4096,
            BucketClass::Large => 16 * 1024,
            BucketClass::XLarge => 64 * 1024,
        }
    }

    fn index(self) -> usize {
        match self {
            BucketClass::Small => 0,
            BucketClass::Medium => 1,
            BucketClass::Large => 2,
            BucketClass::XLarge => 3,
        }
    }

    /// Smallest class that fits `size`, or `None` if `size` exceeds `XLarge`.
    fn fitting(size: usize) -> Option<BucketClass> {
        Self::ALL.into_iter().find(|class| size <= class.bytes())
    }
}

/// Threshold at which a bucket turns on its lock-free ring.
const RING_ACTIVATION_THRESHOLD: usize = 1_000;
/// Ring capacity once activated; generous relative to the activation
/// threshold so the slow-path refill is infrequent.
const RING_CAPACITY: usize = 4_096;
/// Default per-bucket cap on the number of buffers retained free.
const DEFAULT_MAX_POOL_SIZE: usize = 10_000;
/// Alignment used for Medium/Large/XLarge allocations (spec.md §4.4:
/// "buffers of size >= 4 KiB are allocated with 64-byte alignment").
const LARGE_BUFFER_ALIGNMENT: usize = 64;

/// A heap allocation whose base address is guaranteed aligned to `layout`'s
/// alignment, with an independent, shrinkable-and-regrowable reported
/// length. Growing always zero-fills the newly exposed bytes, so a buffer
/// coming out of a bucket's free list never leaks a previous occupant's data.
///
/// `Vec<u8>` cannot make this guarantee: its `Drop` always deallocates using
/// `Layout::array::<u8>(cap)`, i.e. alignment 1, so a `Vec` built over a
/// manually over-aligned allocation (`Vec::from_raw_parts` or a `drain`-based
/// shuffle that never moves the base pointer at all) either lies about its
/// alignment or deallocates with a layout that does not match the one it was
/// allocated with.
struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

unsafe impl Send for AlignedBuf {}

impl AlignedBuf {
    fn zeroed(cap: usize, align: usize) -> Self {
        let layout = Layout::from_size_align(cap, align).expect("valid pool buffer layout");
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self { ptr, len: cap, layout }
    }

    fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Change the reported length within `capacity()`. Bytes newly brought
    /// into view are zeroed; bytes dropped out of view keep their contents
    /// (they're zeroed again before that matters, by the next `set_len(cap)`
    /// a bucket does when a buffer comes back via `release`).
    fn set_len(&mut self, new_len: usize) {
        assert!(new_len <= self.capacity(), "pool buffer length exceeds its aligned allocation");
        if new_len > self.len {
            unsafe { self.ptr.as_ptr().add(self.len).write_bytes(0, new_len - self.len) };
        }
        self.len = new_len;
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// A pool-owned buffer: plain for Small (no alignment requirement beyond
/// the allocator's default) and every oversize acquisition, aligned for
/// Medium/Large/XLarge (spec.md §4.4).
enum PoolBuf {
    Plain(Vec<u8>),
    Aligned(AlignedBuf),
}

impl PoolBuf {
    fn resize_zeroed(&mut self, new_len: usize) {
        match self {
            PoolBuf::Plain(v) => v.resize(new_len, 0),
            PoolBuf::Aligned(a) => a.set_len(new_len),
        }
    }

    fn clear(&mut self) {
        match self {
            PoolBuf::Plain(v) => v.clear(),
            PoolBuf::Aligned(a) => a.set_len(0),
        }
    }
}

impl Default for PoolBuf {
    fn default() -> Self {
        PoolBuf::Plain(Vec::new())
    }
}

impl Deref for PoolBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            PoolBuf::Plain(v) => v,
            PoolBuf::Aligned(a) => a,
        }
    }
}

impl DerefMut for PoolBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            PoolBuf::Plain(v) => v,
            PoolBuf::Aligned(a) => a,
        }
    }
}

struct FreeEntry {
    buf: PoolBuf,
    last_used: Instant,
}

struct BucketInner {
    free: Vec<FreeEntry>,
    max_pool_size: usize,
}

struct PoolBucket {
    class: BucketClass,
    inner: Mutex<BucketInner>,
    ring: OnceLock<ArrayQueue<PoolBuf>>,
    population: AtomicUsize,
}

impl PoolBucket {
    fn new(class: BucketClass) -> Self {
        Self {
            class,
            inner: Mutex::new(BucketInner {
                free: Vec::new(),
                max_pool_size: DEFAULT_MAX_POOL_SIZE,
            }),
            ring: OnceLock::new(),
            population: AtomicUsize::new(0),
        }
    }

    fn allocate_buffer(&self) -> PoolBuf {
        let bytes = self.class.bytes();
        if bytes >= 4096 {
            PoolBuf::Aligned(AlignedBuf::zeroed(bytes, LARGE_BUFFER_ALIGNMENT))
        } else {
            PoolBuf::Plain(vec![0u8; bytes])
        }
    }

    fn maybe_activate_ring(&self) {
        if self.population.load(Ordering::Relaxed) < RING_ACTIVATION_THRESHOLD {
            return;
        }
        let mut activated_now = false;
        self.ring.get_or_init(|| {
            activated_now = true;
            ArrayQueue::new(RING_CAPACITY)
        });
        if activated_now {
            tracing::debug!(
                component = "pool",
                operation = "activate_ring",
                class = ?self.class,
                "bucket promoted to lock-free ring"
            );
        }
    }

    /// Take a buffer from this bucket, or `None` on a cold miss (caller allocates fresh).
    fn take(&self) -> Option<PoolBuf> {
        if let Some(ring) = self.ring.get() {
            if let Some(buf) = ring.pop() {
                return Some(buf);
            }
            // Ring empty: refill from the free list under the mutex, then retry once.
            let mut inner = self.inner.lock().unwrap();
            while let Some(entry) = inner.free.pop() {
                if ring.push(entry.buf).is_err() {
                    break;
                }
            }
            drop(inner);
            return ring.pop();
        }
        let mut inner = self.inner.lock().unwrap();
        inner.free.pop().map(|entry| entry.buf)
    }

    /// Return a buffer to this bucket, or drop it if the bucket is saturated.
    fn give(&self, buf: PoolBuf) {
        if let Some(ring) = self.ring.get() {
            if let Err(buf) = ring.push(buf) {
                // Ring full; fall through to the mutex free list, honoring the cap there.
                let mut inner = self.inner.lock().unwrap();
                if inner.free.len() < inner.max_pool_size {
                    inner.free.push(FreeEntry {
                        buf,
                        last_used: Instant::now(),
                    });
                }
            }
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.free.len() >= inner.max_pool_size {
            return; // saturated: drop outright
        }
        inner.free.push(FreeEntry {
            buf,
            last_used: Instant::now(),
        });
    }

    fn record_new_allocation(&self) {
        self.population.fetch_add(1, Ordering::Relaxed);
        self.maybe_activate_ring();
    }

    fn free_len(&self) -> usize {
        let ring_len = self.ring.get().map(ArrayQueue::len).unwrap_or(0);
        ring_len + self.inner.lock().unwrap().free.len()
    }

    fn max_pool_size(&self) -> usize {
        self.inner.lock().unwrap().max_pool_size
    }

    fn set_max_pool_size(&self, max: usize) {
        self.inner.lock().unwrap().max_pool_size = max;
    }

    fn evict_older_than(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let before = inner.free.len();
        inner.free.retain(|entry| now.duration_since(entry.last_used) < max_age);
        before - inner.free.len()
    }
}

/// Running allocation counters, read without locking.
#[derive(Debug, Default)]
pub struct PoolStats {
    total_allocations: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
}

/// A point-in-time snapshot of [`PoolStats`] plus derived metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStatsSnapshot {
    /// Total `acquire` calls that touched a bucket (excludes zero-byte and oversize requests).
    pub total_allocations: u64,
    /// Allocations satisfied from a bucket's free list or ring.
    pub pool_hits: u64,
    /// Allocations that required a fresh heap allocation.
    pub pool_misses: u64,
    /// Current number of buffers held free across all buckets.
    pub current_pool_size: usize,
    /// Sum of each bucket's configured cap.
    pub max_pool_size: usize,
}

impl PoolStatsSnapshot {
    /// Fraction of allocations satisfied without a fresh heap allocation.
    pub fn hit_rate(&self) -> f64 {
        if self.total_allocations == 0 {
            return 0.0;
        }
        self.pool_hits as f64 / self.total_allocations as f64
    }

    /// Fraction of the configured capacity currently occupied by free buffers.
    pub fn utilization(&self) -> f64 {
        if self.max_pool_size == 0 {
            return 0.0;
        }
        self.current_pool_size as f64 / self.max_pool_size as f64
    }

    /// A blend of hit rate and headroom, favoring high hit rate with low utilization.
    pub fn efficiency(&self) -> f64 {
        self.hit_rate() * (1.0 - self.utilization() * 0.5)
    }

    /// Single-number summary in `[0, 1]` combining hit rate and efficiency.
    pub fn performance_score(&self) -> f64 {
        (self.hit_rate() + self.efficiency()) / 2.0
    }
}

/// An owning handle to one pool-acquired buffer.
///
/// Derefs to `[u8]`. Dropping it returns the underlying allocation to the
/// bucket it came from (or simply frees it, for zero-byte or oversize
/// acquisitions, which are never recycled).
pub struct PoolHandle {
    buf: PoolBuf,
    class: Option<BucketClass>,
}

impl PoolHandle {
    fn empty() -> Self {
        Self { buf: PoolBuf::Plain(Vec::new()), class: None }
    }

    fn recyclable(buf: PoolBuf, class: BucketClass) -> Self {
        Self { buf, class: Some(class) }
    }

    fn oversize(buf: Vec<u8>) -> Self {
        Self { buf: PoolBuf::Plain(buf), class: None }
    }
}

impl Deref for PoolHandle {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PoolHandle {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        if let Some(class) = self.class {
            let buf = std::mem::take(&mut self.buf);
            MemoryPool::global().release(buf, class);
        }
    }
}

/// The process-wide, size-classed buffer pool.
pub struct MemoryPool {
    buckets: [PoolBucket; 4],
    stats: PoolStats,
}

static GLOBAL_POOL: OnceLock<MemoryPool> = OnceLock::new();

impl MemoryPool {
    fn new() -> Self {
        Self {
            buckets: [
                PoolBucket::new(BucketClass::Small),
                PoolBucket::new(BucketClass::Medium),
                PoolBucket::new(BucketClass::Large),
                PoolBucket::new(BucketClass::XLarge),
            ],
            stats: PoolStats::default(),
        }
    }

    /// The process-wide singleton pool.
    pub fn global() -> &'static MemoryPool {
        GLOBAL_POOL.get_or_init(MemoryPool::new)
    }

    fn bucket(&self, class: BucketClass) -> &PoolBucket {
        &self.buckets[class.index()]
    }

    /// Acquire a buffer of at least `size` bytes, rounded up to the
    /// smallest fitting class. `size == 0` never touches a bucket.
    /// Sizes above `XLarge` allocate directly and are not recycled.
    pub fn acquire(&self, size: usize) -> PoolHandle {
        if size == 0 {
            return PoolHandle::empty();
        }
        let Some(class) = BucketClass::fitting(size) else {
            return PoolHandle::oversize(vec![0u8; size]);
        };

        self.stats.total_allocations.fetch_add(1, Ordering::Relaxed);
        let bucket = self.bucket(class);
        let mut buf = match bucket.take() {
            Some(buf) => {
                self.stats.pool_hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                self.stats.pool_misses.fetch_add(1, Ordering::Relaxed);
                bucket.record_new_allocation();
                bucket.allocate_buffer()
            }
        };
        buf.resize_zeroed(size);
        PoolHandle::recyclable(buf, class)
    }

    fn release(&self, mut buf: PoolBuf, class: BucketClass) {
        buf.clear();
        buf.resize_zeroed(class.bytes());
        self.bucket(class).give(buf);
    }

    /// Snapshot the running counters plus derived metrics.
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            total_allocations: self.stats.total_allocations.load(Ordering::Relaxed),
            pool_hits: self.stats.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.stats.pool_misses.load(Ordering::Relaxed),
            current_pool_size: self.buckets.iter().map(PoolBucket::free_len).sum(),
            max_pool_size: self.buckets.iter().map(PoolBucket::max_pool_size).sum(),
        }
    }

    /// Evict free buffers whose `last_used` is older than `max_age` from every bucket.
    pub fn cleanup_old_buffers(&self, max_age: Duration) -> usize {
        self.buckets.iter().map(|bucket| bucket.evict_older_than(max_age)).sum()
    }

    /// Grow or shrink each bucket's cap based on the running hit rate: a
    /// low hit rate grows headroom, a near-saturated high-hit-rate pool
    /// shrinks it back down.
    pub fn auto_tune(&self) {
        let snapshot = self.stats();
        let hit_rate = snapshot.hit_rate();
        for bucket in &self.buckets {
            let current = bucket.max_pool_size();
            let next = if hit_rate < 0.90 {
                current + current / 10 + 1
            } else if snapshot.utilization() > 0.95 {
                current.saturating_sub(current / 20)
            } else {
                current
            };
            bucket.set_max_pool_size(next.max(DEFAULT_MAX_POOL_SIZE / 10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Whatever size is requested (up to `XLarge`), the handle reports
        /// exactly that many bytes and comes from a class no smaller than
        /// the request.
        #[test]
        fn acquire_reports_the_requested_size(size in 1usize..=BucketClass::XLarge.bytes()) {
            let pool = MemoryPool::new();
            let handle = pool.acquire(size);
            prop_assert_eq!(handle.len(), size);
            let class = BucketClass::fitting(size).unwrap();
            prop_assert!(class.bytes() >= size);
        }

        /// A buffer handed back by `release` and reacquired at the same
        /// size still reports that size, regardless of how many buffers
        /// cycled through the bucket first.
        #[test]
        fn acquire_release_cycle_preserves_len(size in 1usize..=BucketClass::Large.bytes(), cycles in 0usize..50) {
            let pool = MemoryPool::new();
            for _ in 0..cycles {
                drop(pool.acquire(size));
            }
            let handle = pool.acquire(size);
            prop_assert_eq!(handle.len(), size);
        }
    }

    #[test]
    fn zero_byte_acquire_does_not_touch_a_bucket() {
        let pool = MemoryPool::new();
        let before = pool.stats().total_allocations;
        let handle = pool.acquire(0);
        assert!(handle.is_empty());
        assert_eq!(pool.stats().total_allocations, before);
    }

    #[test]
    fn oversize_acquire_is_not_recycled() {
        let pool = MemoryPool::new();
        let handle = pool.acquire(BucketClass::XLarge.bytes() + 1);
        assert_eq!(handle.len(), BucketClass::XLarge.bytes() + 1);
        assert_eq!(pool.stats().total_allocations, 0);
    }

    #[test]
    fn acquire_rounds_up_to_smallest_fitting_class() {
        let pool = MemoryPool::new();
        let handle = pool.acquire(100);
        assert_eq!(handle.len(), 100);
        drop(handle);
        assert_eq!(pool.stats().current_pool_size, 1);
    }

    #[test]
    fn release_returns_buffer_to_its_bucket_free_list() {
        let pool = MemoryPool::new();
        let handle = pool.acquire(4000);
        drop(handle);
        assert_eq!(pool.stats().current_pool_size, 1);

        let handle2 = pool.acquire(4000);
        assert_eq!(pool.stats().pool_hits, 1);
        drop(handle2);
    }

    #[test]
    fn repeated_acquire_release_reaches_high_hit_rate() {
        let pool = MemoryPool::new();
        for _ in 0..10_000 {
            let handle = pool.acquire(4096);
            drop(handle);
        }
        let stats = pool.stats();
        assert!(stats.hit_rate() >= 0.99, "hit_rate={}", stats.hit_rate());
        assert!(stats.current_pool_size <= stats.max_pool_size);
    }

    #[test]
    fn ring_activates_after_one_thousand_allocations() {
        let pool = MemoryPool::new();
        let bucket = pool.bucket(BucketClass::Small);
        for _ in 0..RING_ACTIVATION_THRESHOLD {
            let handle = pool.acquire(10);
            drop(handle);
        }
        assert!(bucket.ring.get().is_some());
    }

    #[test]
    fn cleanup_evicts_only_stale_free_buffers() {
        let pool = MemoryPool::new();
        drop(pool.acquire(10));
        let evicted = pool.cleanup_old_buffers(Duration::from_secs(0));
        assert_eq!(evicted, 1);
        assert_eq!(pool.stats().current_pool_size, 0);
    }

    #[test]
    fn medium_large_xlarge_buffers_are_64_byte_aligned() {
        let pool = MemoryPool::new();
        for class in [BucketClass::Medium, BucketClass::Large, BucketClass::XLarge] {
            let handle = pool.acquire(class.bytes());
            assert_eq!(handle.as_ptr() as usize % LARGE_BUFFER_ALIGNMENT, 0, "{class:?} buffer is misaligned");
        }
    }

    #[test]
    fn reused_aligned_buffer_does_not_leak_previous_contents() {
        let pool = MemoryPool::new();
        let mut first = pool.acquire(4096);
        first.fill(0xAA);
        drop(first);

        let second = pool.acquire(16);
        assert!(second.iter().all(|&b| b == 0), "reacquired buffer exposed stale bytes");
    }
}

//! Shared decompression buffer
//!
//! One `SharedBuffer` is shared between the reader thread (producer) and the
//! consumer. The producer fills a forward window while the consumer walks a
//! previously published region; both sides address the buffer by index, and
//! every index publication happens under the [`crate::sync::StreamSync`]
//! mutex.
//!
//! # Invariants
//! - The producer's write window and every region visible to the consumer are
//!   disjoint at all times (guaranteed by the handoff protocol, not by types).
//! - `grow_to` runs only while the consumer holds no region and the producer
//!   holds no window, so reallocation never invalidates a live slice.
//! - The backing allocation is addressed through one stable raw pointer
//!   between growths; slices on both sides derive from it.

use std::cell::UnsafeCell;
use std::mem::ManuallyDrop;
use std::ops::Range;

struct RawBuf {
    ptr: *mut u8,
    /// Usable buffer size (every byte is initialized).
    len: usize,
    /// Allocation capacity, needed to reconstruct the owning `Vec`.
    alloc: usize,
}

impl RawBuf {
    fn from_vec(vec: Vec<u8>) -> Self {
        let mut vec = ManuallyDrop::new(vec);
        RawBuf {
            ptr: vec.as_mut_ptr(),
            len: vec.len(),
            alloc: vec.capacity(),
        }
    }
}

/// Byte buffer shared between the reader thread and the consumer.
pub(crate) struct SharedBuffer {
    inner: UnsafeCell<RawBuf>,
    fixed: bool,
}

// The buffer is a plain byte allocation; cross-thread access is serialized by
// the handoff protocol documented on each accessor.
unsafe impl Send for SharedBuffer {}
unsafe impl Sync for SharedBuffer {}

impl SharedBuffer {
    /// Wraps `vec` (which must be fully initialized, `len == capacity`) as
    /// the shared buffer. `fixed` forbids later growth.
    pub(crate) fn new(mut vec: Vec<u8>, fixed: bool) -> Self {
        if vec.len() < vec.capacity() {
            let cap = vec.capacity();
            vec.resize(cap, 0);
        }
        SharedBuffer {
            inner: UnsafeCell::new(RawBuf::from_vec(vec)),
            fixed,
        }
    }

    /// True when the caller capped this buffer at open; growth is forbidden.
    pub(crate) fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Current usable size.
    ///
    /// # Safety
    /// Must not run concurrently with `grow_to` (consumer calls it under the
    /// sync mutex; the producer is the only caller of `grow_to`).
    pub(crate) unsafe fn capacity(&self) -> usize {
        (*self.inner.get()).len
    }

    /// Consumer-side view of `range`.
    ///
    /// # Safety
    /// `range` must lie within capacity and have been published to the
    /// consumer; the producer must not write it until the consumer releases
    /// it by advancing `consume_tail`.
    pub(crate) unsafe fn region(&self, range: Range<usize>) -> &[u8] {
        let raw = &*self.inner.get();
        debug_assert!(range.start <= range.end && range.end <= raw.len);
        std::slice::from_raw_parts(raw.ptr.add(range.start), range.end - range.start)
    }

    /// Producer-side write window over `range`.
    ///
    /// # Safety
    /// `range` must lie within capacity and be owned by the producer: nothing
    /// in it may be visible to the consumer while the window is live.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn window(&self, range: Range<usize>) -> &mut [u8] {
        let raw = &*self.inner.get();
        debug_assert!(range.start <= range.end && range.end <= raw.len);
        std::slice::from_raw_parts_mut(raw.ptr.add(range.start), range.end - range.start)
    }

    /// Moves `src` to `dest` (memmove semantics, ranges may overlap).
    ///
    /// # Safety
    /// Producer only; both ranges must be producer-owned as for [`window`].
    ///
    /// [`window`]: SharedBuffer::window
    pub(crate) unsafe fn move_within(&self, src: Range<usize>, dest: usize) {
        let raw = &*self.inner.get();
        debug_assert!(src.end <= raw.len && dest + (src.end - src.start) <= raw.len);
        std::ptr::copy(raw.ptr.add(src.start), raw.ptr.add(dest), src.end - src.start);
    }

    /// Grows the buffer to `new_capacity` bytes, preserving contents.
    ///
    /// Allocation failure is reported, not aborted on.
    ///
    /// # Safety
    /// Producer only, and only while no slice from [`region`]/[`window`] is
    /// live anywhere (the protocol permits growth only when the consumer has
    /// drained everything and is blocked).
    ///
    /// [`region`]: SharedBuffer::region
    /// [`window`]: SharedBuffer::window
    pub(crate) unsafe fn grow_to(&self, new_capacity: usize) -> Result<(), ()> {
        let raw = &mut *self.inner.get();
        debug_assert!(new_capacity > raw.len);
        let mut vec = Vec::from_raw_parts(raw.ptr, raw.len, raw.alloc);
        if vec.try_reserve_exact(new_capacity - vec.len()).is_err() {
            // Leave the buffer exactly as it was.
            *raw = RawBuf::from_vec(vec);
            return Err(());
        }
        vec.resize(new_capacity, 0);
        *raw = RawBuf::from_vec(vec);
        Ok(())
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        let raw = self.inner.get_mut();
        unsafe { drop(Vec::from_raw_parts(raw.ptr, raw.len, raw.alloc)) };
    }
}

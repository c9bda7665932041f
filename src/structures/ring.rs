//! Bounded multi-producer single-consumer ring of pre-allocated slots
//! - Slots are created once by a factory and reused in place
//! - Producers claim slots with a CAS on the head index, then write in place
//! - Exactly one consumer, reachable only through [`ChannelConsumer`]
//! - Capacity must be a power of two

use crate::constants::CACHE_LINE_SIZE;
use std::cell::UnsafeCell;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const PAD: usize = CACHE_LINE_SIZE - size_of::<AtomicUsize>();

/// One ring cell. `sequence == claim index` means free for that claim,
/// `sequence == claim index + 1` means published and readable.
struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<T>,
}

/// Bounded MPSC ring buffer
#[repr(C)]
pub struct BoundedChannel<T> {
    // Hot indices on separate cache lines
    head: AtomicUsize, // next claim index (producers)
    _pad_head: [u8; PAD],
    tail: AtomicUsize, // next read index (consumer), published for len()
    _pad_tail: [u8; PAD],
    // Cold config/data
    capacity: usize,
    mask: usize,
    slots: Box<[Slot<T>]>,
}

unsafe impl<T: Send> Send for BoundedChannel<T> {}
unsafe impl<T: Send> Sync for BoundedChannel<T> {}

/// Publishes the claimed slot even if the translator unwinds, so a panicking
/// producer can never wedge the consumer.
struct PublishGuard<'a> {
    sequence: &'a AtomicUsize,
    claim: usize,
}

impl Drop for PublishGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.sequence.store(self.claim.wrapping_add(1), Ordering::Release);
    }
}

impl<T> BoundedChannel<T> {
    /// Create a new ring with capacity (must be power of two; will round up if not)
    /// and return it with its only consumer handle.
    pub fn with_capacity_pow2(
        capacity: usize,
        mut factory: impl FnMut() -> T,
    ) -> (Arc<Self>, ChannelConsumer<T>) {
        let cap = capacity.next_power_of_two().max(2);
        let slots = (0..cap)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(factory()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let channel = Arc::new(Self {
            head: AtomicUsize::new(0),
            _pad_head: [0u8; PAD],
            tail: AtomicUsize::new(0),
            _pad_tail: [0u8; PAD],
            capacity: cap,
            mask: cap - 1,
            slots,
        });
        let consumer = ChannelConsumer { channel: Arc::clone(&channel), next: 0 };
        (channel, consumer)
    }

    /// Ring capacity
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claimed-but-not-consumed slots. Racy snapshot, exact when quiescent.
    #[inline(always)]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity)
    }

    /// Returns true if nothing is queued.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the ring is full.
    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Free slots. Racy snapshot.
    #[inline(always)]
    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.len()
    }

    /// Claim one slot and let `translate` populate it in place.
    ///
    /// Returns the claimed sequence, or hands `arg` back untouched when the
    /// ring is full; the translator is not called in that case.
    #[inline]
    pub fn try_publish_with<A, F>(&self, arg: A, translate: F) -> Result<u64, A>
    where
        F: FnOnce(&mut T, A),
    {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = unsafe { self.slots.get_unchecked(pos & self.mask) };
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(pos) as isize;
            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let _guard = PublishGuard { sequence: &slot.sequence, claim: pos };
                        // SAFETY: the CAS made this producer the only writer of the
                        // slot until the guard publishes it to the consumer.
                        unsafe { translate(&mut *slot.value.get(), arg) };
                        return Ok(pos as u64);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(arg);
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Claim `args.len()` contiguous slots at once and populate each in place.
    ///
    /// All-or-nothing: if fewer slots are free, nothing is claimed and the
    /// arguments are handed back. Returns the first claimed sequence.
    pub fn try_publish_batch_with<A, F>(&self, args: Vec<A>, mut translate: F) -> Result<u64, Vec<A>>
    where
        F: FnMut(&mut T, A),
    {
        let n = args.len();
        if n == 0 {
            return Ok(self.head.load(Ordering::Relaxed) as u64);
        }
        if n > self.capacity {
            return Err(args);
        }

        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            // The consumer frees slots in order, so the last slot of the
            // range being free implies the whole range is free.
            let last = pos.wrapping_add(n - 1);
            let slot = unsafe { self.slots.get_unchecked(last & self.mask) };
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq.wrapping_sub(last) as isize;
            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(n),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(args);
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }

        // Every claimed slot gets published, in order, even if a translator
        // unwinds part way through.
        let guards: Vec<PublishGuard<'_>> = (0..n)
            .map(|i| {
                let claim = pos.wrapping_add(i);
                let slot = unsafe { self.slots.get_unchecked(claim & self.mask) };
                PublishGuard { sequence: &slot.sequence, claim }
            })
            .collect();
        for (i, arg) in args.into_iter().enumerate() {
            let slot = unsafe { self.slots.get_unchecked(pos.wrapping_add(i) & self.mask) };
            // SAFETY: claimed by the CAS above, unpublished until guards drop.
            unsafe { translate(&mut *slot.value.get(), arg) };
        }
        drop(guards);
        Ok(pos as u64)
    }
}

/// The single consumer of a [`BoundedChannel`]. Not `Clone`: owning it is
/// what makes the single-consumer invariant hold.
pub struct ChannelConsumer<T> {
    channel: Arc<BoundedChannel<T>>,
    next: usize,
}

impl<T> ChannelConsumer<T> {
    /// Shared handle to the channel this consumer drains
    pub fn channel(&self) -> &Arc<BoundedChannel<T>> {
        &self.channel
    }

    #[inline(always)]
    fn slot(&self, claim: usize) -> &Slot<T> {
        unsafe { self.channel.slots.get_unchecked(claim & self.channel.mask) }
    }

    #[inline(always)]
    fn is_ready(&self, claim: usize) -> bool {
        self.slot(claim).sequence.load(Ordering::Acquire) == claim.wrapping_add(1)
    }

    /// Returns true if the next slot is not yet published.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        !self.is_ready(self.next)
    }

    /// Handle up to `limit` published slots in place, in publish order.
    ///
    /// `handle` receives the slot, its sequence and whether it is the last
    /// slot of this batch. Returns the number of slots handled.
    pub fn consume_batch<F>(&mut self, limit: usize, mut handle: F) -> usize
    where
        F: FnMut(&mut T, u64, bool),
    {
        let mut available = 0;
        while available < limit && self.is_ready(self.next.wrapping_add(available)) {
            available += 1;
        }
        if available == 0 {
            return 0;
        }

        for i in 0..available {
            let claim = self.next;
            let slot = self.slot(claim);
            // SAFETY: the slot is published and only this consumer reads it
            // until its sequence is advanced for the next lap.
            unsafe { handle(&mut *slot.value.get(), claim as u64, i + 1 == available) };
            slot.sequence.store(claim.wrapping_add(self.channel.capacity), Ordering::Release);
            self.next = claim.wrapping_add(1);
        }
        self.channel.tail.store(self.next, Ordering::Release);
        available
    }

    /// Handle the next published slot in place. Returns false if none is ready.
    #[inline]
    pub fn consume_one<F>(&mut self, handle: F) -> bool
    where
        F: FnOnce(&mut T, u64),
    {
        let mut handle = Some(handle);
        self.consume_batch(1, |slot, seq, _| {
            if let Some(h) = handle.take() {
                h(slot, seq);
            }
        }) == 1
    }
}

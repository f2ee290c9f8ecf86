use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::frame::FrameBuf;

/// Task queue errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Slot storage could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
    /// A queue must have at least one slot.
    #[error("queue capacity must be non-zero")]
    ZeroCapacity,
    /// Every slot is occupied, the element was not stored.
    #[error("queue full")]
    QueueFull,
}

/// Bounded FIFO of frames between the transport and the processing loop.
///
/// The queue never blocks: [`enqueue`](TaskQueue::enqueue) on a full queue
/// fails immediately and [`dequeue`](TaskQueue::dequeue) on an empty queue
/// returns `None`.
///
/// Used from one context through `&mut self`, or split into a [`Producer`]
/// and a [`Consumer`] that may live in different contexts (for example a USB
/// interrupt handler and the main loop). There is exactly one of each, so no
/// lock is needed: the occupancy count is the only shared variable written by
/// both sides.
pub struct TaskQueue<T: Copy = FrameBuf> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    // owned by the consumer
    read_index: AtomicUsize,
    // owned by the producer
    write_index: AtomicUsize,
    count: AtomicUsize,
}

// Slot access is serialized by the single producer / single consumer
// discipline and the acquire/release pairs on `count`.
unsafe impl<T: Copy + Send> Sync for TaskQueue<T> {}

impl<T: Copy> TaskQueue<T> {
    /// Allocates a queue with `capacity` slots.
    pub fn new(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::ZeroCapacity);
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| QueueError::OutOfMemory)?;
        slots.extend((0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())));

        Ok(Self {
            slots: slots.into_boxed_slice(),
            read_index: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        })
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of queued elements. Advisory when the queue is split.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Advisory when the queue is split: the other side may change it right
    /// after the read.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a copy of `item` at the tail.
    pub fn enqueue(&mut self, item: T) -> Result<(), QueueError> {
        // exclusive borrow, no consumer can run concurrently
        unsafe { self.push(item) }
    }

    /// Removes the head element.
    pub fn dequeue(&mut self) -> Option<T> {
        unsafe { self.pop() }
    }

    /// Splits the queue into its two ends.
    ///
    /// With a `&'static mut` queue the handles are `'static` and can be moved
    /// into interrupt handlers.
    pub fn split(&mut self) -> (Producer<'_, T>, Consumer<'_, T>) {
        let queue: &Self = self;
        (Producer { queue }, Consumer { queue })
    }

    /// # Safety
    ///
    /// Only one context may push at a time.
    unsafe fn push(&self, item: T) -> Result<(), QueueError> {
        if self.count.load(Ordering::Acquire) == self.capacity() {
            return Err(QueueError::QueueFull);
        }

        let index = self.write_index.load(Ordering::Relaxed);
        (*self.slots[index].get()).write(item);
        self.write_index
            .store((index + 1) % self.capacity(), Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// # Safety
    ///
    /// Only one context may pop at a time.
    unsafe fn pop(&self) -> Option<T> {
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }

        let index = self.read_index.load(Ordering::Relaxed);
        let item = (*self.slots[index].get()).assume_init_read();
        self.read_index
            .store((index + 1) % self.capacity(), Ordering::Relaxed);
        self.count.fetch_sub(1, Ordering::Release);
        Some(item)
    }

    /// # Safety
    ///
    /// Only the popping context may peek.
    unsafe fn peek_head(&self) -> Option<T> {
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }

        let index = self.read_index.load(Ordering::Relaxed);
        Some((*self.slots[index].get()).assume_init_read())
    }
}

/// Writing end of a split [`TaskQueue`].
pub struct Producer<'a, T: Copy = FrameBuf> {
    queue: &'a TaskQueue<T>,
}

impl<T: Copy> Producer<'_, T> {
    /// Stores a copy of `item` at the tail, fails with
    /// [`QueueError::QueueFull`] without blocking.
    pub fn enqueue(&mut self, item: T) -> Result<(), QueueError> {
        // the only producer, guaranteed by `split`
        unsafe { self.queue.push(item) }
    }

    /// Number of queued elements, advisory.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Advisory.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

/// Reading end of a split [`TaskQueue`].
pub struct Consumer<'a, T: Copy = FrameBuf> {
    queue: &'a TaskQueue<T>,
}

impl<T: Copy> Consumer<'_, T> {
    /// Removes the head element. The returned value is owned by the caller,
    /// the slot is only reused by a later enqueue.
    pub fn dequeue(&mut self) -> Option<T> {
        // the only consumer, guaranteed by `split`
        unsafe { self.queue.pop() }
    }

    /// Copy of the head element, left in the queue. The slot stays occupied
    /// until the next [`dequeue`](Consumer::dequeue).
    pub fn peek(&self) -> Option<T> {
        unsafe { self.queue.peek_head() }
    }

    /// Number of queued elements, advisory.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Advisory.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Action run on every item the buffer discards without handing it out.
pub type ReleaseHook<T> = Box<dyn Fn(T) + Send + Sync>;

/// Fixed-capacity, drop-oldest queue between an asynchronous producer and a
/// synchronous consumer.
///
/// Neither side ever waits for the other: `offer` evicts the oldest entry
/// when full, `poll` returns `Ok(None)` when empty. Every item leaves the
/// buffer exactly once, either through `poll` or through the release hook
/// (eviction, drain, or an offer after close).
pub struct BoundedFrameBuffer<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    release: ReleaseHook<T>,
    evicted: AtomicU64,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    #[error("frame buffer was drained and closed")]
    Closed,
}

impl<T: 'static> BoundedFrameBuffer<T> {
    /// Buffer whose release action simply drops the item.
    pub fn new(capacity: usize) -> Self {
        Self::with_release(capacity, Box::new(drop))
    }
}

impl<T> BoundedFrameBuffer<T> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_release(capacity: usize, release: ReleaseHook<T>) -> Self {
        assert!(capacity > 0, "frame buffer capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            release,
            evicted: AtomicU64::new(0),
        }
    }

    /// Append `item`, evicting the oldest entry first if the buffer is full.
    ///
    /// After `drain` the item is released immediately instead.
    pub fn offer(&self, item: T) {
        let (discarded, evicting) = {
            let mut inner = self.lock();
            if inner.closed {
                (Some(item), false)
            } else {
                let oldest = if inner.items.len() >= self.capacity {
                    inner.items.pop_front()
                } else {
                    None
                };
                inner.items.push_back(item);
                let evicting = oldest.is_some();
                (oldest, evicting)
            }
        };
        if evicting {
            let total = self.evicted.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(evicted_total = total, "frame buffer evicted an entry");
        }
        // Release outside the lock so a slow hook never stalls the consumer.
        if let Some(old) = discarded {
            (self.release)(old);
        }
    }

    /// Take the oldest entry, or `Ok(None)` if there is nothing buffered.
    pub fn poll(&self) -> Result<Option<T>, BufferError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(BufferError::Closed);
        }
        Ok(inner.items.pop_front())
    }

    /// Release everything still buffered and close the buffer.
    /// Returns how many entries were released.
    pub fn drain(&self) -> usize {
        let remaining: Vec<T> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.items.drain(..).collect()
        };
        let count = remaining.len();
        for item in remaining {
            (self.release)(item);
        }
        count
    }

    /// Accept offers again after a `drain`.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries pushed out of a full buffer by `offer`. Offers released
    /// because the buffer is closed are not counted.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Drop for BoundedFrameBuffer<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for item in inner.items.drain(..) {
            (self.release)(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording_buffer(capacity: usize) -> (BoundedFrameBuffer<u32>, Arc<Mutex<Vec<u32>>>) {
        let released = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&released);
        let buffer = BoundedFrameBuffer::with_release(
            capacity,
            Box::new(move |item| sink.lock().unwrap().push(item)),
        );
        (buffer, released)
    }

    #[test]
    fn poll_on_empty_returns_none() {
        let buffer: BoundedFrameBuffer<u32> = BoundedFrameBuffer::new(2);
        assert_eq!(buffer.poll(), Ok(None));
        assert!(buffer.is_empty());
    }

    #[test]
    fn full_buffer_evicts_oldest_once() {
        let (buffer, released) = recording_buffer(2);
        buffer.offer(1);
        buffer.offer(2);
        buffer.offer(3);

        assert_eq!(buffer.len(), 2);
        assert_eq!(*released.lock().unwrap(), vec![1]);
        assert_eq!(buffer.evicted(), 1);

        assert_eq!(buffer.poll(), Ok(Some(2)));
        assert_eq!(buffer.poll(), Ok(Some(3)));
        assert_eq!(buffer.poll(), Ok(None));
    }

    #[test]
    fn length_never_exceeds_capacity() {
        let (buffer, released) = recording_buffer(3);
        let mut polled = Vec::new();
        for i in 0..50 {
            buffer.offer(i);
            assert!(buffer.len() <= buffer.capacity());
            if i % 7 == 0 {
                polled.extend(buffer.poll().unwrap());
            }
        }
        while let Ok(Some(item)) = buffer.poll() {
            polled.push(item);
        }

        // Every item left exactly once, through poll or through the hook.
        let mut seen = released.lock().unwrap().clone();
        seen.extend(polled);
        let total = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), total);
        assert_eq!(total, 50);
    }

    #[test]
    fn polled_items_are_never_released() {
        let (buffer, released) = recording_buffer(1);
        buffer.offer(10);
        assert_eq!(buffer.poll(), Ok(Some(10)));
        buffer.offer(11);
        buffer.offer(12);
        assert_eq!(*released.lock().unwrap(), vec![11]);
        assert_eq!(buffer.drain(), 1);
        assert_eq!(*released.lock().unwrap(), vec![11, 12]);
    }

    #[test]
    fn drain_closes_until_reopened() {
        let (buffer, released) = recording_buffer(2);
        buffer.offer(1);
        buffer.offer(2);
        assert_eq!(buffer.drain(), 2);
        assert!(buffer.is_closed());
        assert_eq!(buffer.poll(), Err(BufferError::Closed));

        // Late deliveries from a stopping producer are released at once.
        buffer.offer(3);
        assert_eq!(*released.lock().unwrap(), vec![1, 2, 3]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.evicted(), 0);

        buffer.reopen();
        buffer.offer(4);
        assert_eq!(buffer.poll(), Ok(Some(4)));
    }

    #[test]
    fn plain_buffer_holds_owned_frames() {
        let buffer = BoundedFrameBuffer::new(1);
        buffer.offer(String::from("first"));
        buffer.offer(String::from("second"));
        assert_eq!(buffer.evicted(), 1);
        assert_eq!(buffer.poll(), Ok(Some(String::from("second"))));
    }

    #[test]
    fn dropping_the_buffer_releases_leftovers() {
        let (buffer, released) = recording_buffer(2);
        buffer.offer(7);
        buffer.offer(8);
        drop(buffer);
        assert_eq!(*released.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn concurrent_producer_never_overfills() {
        let buffer = Arc::new(BoundedFrameBuffer::new(2));
        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    buffer.offer(i);
                }
            })
        };

        let mut last = None;
        while !producer.is_finished() {
            assert!(buffer.len() <= 2);
            if let Ok(Some(item)) = buffer.poll() {
                // Items come out in the order they went in.
                if let Some(prev) = last {
                    assert!(item > prev);
                }
                last = Some(item);
            }
        }
        producer.join().unwrap();
        assert!(buffer.len() <= 2);
    }
}

//! Unbounded blocking queues shared by pool workers.
//!
//! Both queues keep their buffer behind a single lock. `offer` wakes exactly
//! one waiter; `close` wakes all of them. After `close`, offers are refused
//! and takers drain whatever is left before seeing `None`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Operations a pool needs from its work queue.
pub trait BlockingQueue<T>: Send + Sync {
    /// Enqueue `item`. Returns it back if the queue is closed.
    fn offer(&self, item: T) -> Result<(), T>;

    /// Block until an item is available. `None` once closed and empty.
    fn take(&self) -> Option<T>;

    /// Like [`take`](Self::take) but gives up after `timeout`.
    fn poll(&self, timeout: Duration) -> Option<T>;

    /// Non-blocking dequeue.
    fn try_poll(&self) -> Option<T>;

    /// Remove every queued item matching `pred`; returns how many were removed.
    fn remove_where(&self, pred: &mut dyn FnMut(&T) -> bool) -> usize;

    /// Remove and return everything queued, in dequeue order.
    fn drain(&self) -> Vec<T>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queues are unbounded.
    fn remaining_capacity(&self) -> usize {
        usize::MAX
    }

    /// Refuse further offers and release blocked takers.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

// ── Buffer backends ─────────────────────────────────────────────────

trait Buffer: Default + Send {
    type Item;

    fn push(&mut self, item: Self::Item);
    fn pop(&mut self) -> Option<Self::Item>;
    fn remove_where(&mut self, pred: &mut dyn FnMut(&Self::Item) -> bool) -> usize;
    fn drain_ordered(&mut self) -> Vec<Self::Item>;
    fn len(&self) -> usize;
}

struct Fifo<T>(VecDeque<T>);

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self(VecDeque::new())
    }
}

impl<T: Send> Buffer for Fifo<T> {
    type Item = T;

    fn push(&mut self, item: T) {
        self.0.push_back(item);
    }

    fn pop(&mut self) -> Option<T> {
        self.0.pop_front()
    }

    fn remove_where(&mut self, pred: &mut dyn FnMut(&T) -> bool) -> usize {
        let before = self.0.len();
        self.0.retain(|item| !pred(item));
        before - self.0.len()
    }

    fn drain_ordered(&mut self) -> Vec<T> {
        self.0.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Min-heap: the smallest item is dequeued first.
struct MinHeap<T: Ord>(BinaryHeap<Reverse<T>>);

impl<T: Ord> Default for MinHeap<T> {
    fn default() -> Self {
        Self(BinaryHeap::new())
    }
}

impl<T: Ord + Send> Buffer for MinHeap<T> {
    type Item = T;

    fn push(&mut self, item: T) {
        self.0.push(Reverse(item));
    }

    fn pop(&mut self) -> Option<T> {
        self.0.pop().map(|Reverse(item)| item)
    }

    fn remove_where(&mut self, pred: &mut dyn FnMut(&T) -> bool) -> usize {
        let before = self.0.len();
        self.0.retain(|Reverse(item)| !pred(item));
        before - self.0.len()
    }

    fn drain_ordered(&mut self) -> Vec<T> {
        let mut items: Vec<T> = self.0.drain().map(|Reverse(item)| item).collect();
        items.sort();
        items
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

// ── Shared blocking core ────────────────────────────────────────────

struct CoreState<B> {
    buffer: B,
    closed: bool,
}

struct QueueCore<B: Buffer> {
    state: Mutex<CoreState<B>>,
    available: Condvar,
}

impl<B: Buffer> QueueCore<B> {
    fn new() -> Self {
        Self {
            state: Mutex::new(CoreState {
                buffer: B::default(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    fn offer(&self, item: B::Item) -> Result<(), B::Item> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        state.buffer.push(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    fn take(&self) -> Option<B::Item> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.buffer.pop() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    fn poll(&self, timeout: Duration) -> Option<B::Item> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.buffer.pop() {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.buffer.pop();
            }
        }
    }

    fn try_poll(&self) -> Option<B::Item> {
        self.state.lock().buffer.pop()
    }

    fn remove_where(&self, pred: &mut dyn FnMut(&B::Item) -> bool) -> usize {
        self.state.lock().buffer.remove_where(pred)
    }

    fn drain(&self) -> Vec<B::Item> {
        self.state.lock().buffer.drain_ordered()
    }

    fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

macro_rules! delegate_blocking_queue {
    ($ty:ident, $($bound:tt)+) => {
        impl<T: $($bound)+> BlockingQueue<T> for $ty<T> {
            fn offer(&self, item: T) -> Result<(), T> {
                self.core.offer(item)
            }
            fn take(&self) -> Option<T> {
                self.core.take()
            }
            fn poll(&self, timeout: Duration) -> Option<T> {
                self.core.poll(timeout)
            }
            fn try_poll(&self) -> Option<T> {
                self.core.try_poll()
            }
            fn remove_where(&self, pred: &mut dyn FnMut(&T) -> bool) -> usize {
                self.core.remove_where(pred)
            }
            fn drain(&self) -> Vec<T> {
                self.core.drain()
            }
            fn len(&self) -> usize {
                self.core.len()
            }
            fn close(&self) {
                self.core.close()
            }
            fn is_closed(&self) -> bool {
                self.core.is_closed()
            }
        }
    };
}

/// Unbounded multi-producer/multi-consumer FIFO queue.
pub struct UnboundedQueue<T: Send> {
    core: QueueCore<Fifo<T>>,
}

impl<T: Send> UnboundedQueue<T> {
    pub fn new() -> Self {
        Self {
            core: QueueCore::new(),
        }
    }
}

impl<T: Send> Default for UnboundedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

delegate_blocking_queue!(UnboundedQueue, Send);

/// Unbounded queue that always yields its smallest item first.
///
/// Items comparing equal come out in unspecified order; callers that need
/// FIFO among equals fold a sequence number into their `Ord`.
pub struct PriorityQueue<T: Ord + Send> {
    core: QueueCore<MinHeap<T>>,
}

impl<T: Ord + Send> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            core: QueueCore::new(),
        }
    }
}

impl<T: Ord + Send> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

delegate_blocking_queue!(PriorityQueue, Ord + Send);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q = UnboundedQueue::new();
        for i in 0..5 {
            q.offer(i).unwrap();
        }
        let out: Vec<i32> = std::iter::from_fn(|| q.try_poll()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn priority_order_smallest_first() {
        let q = PriorityQueue::new();
        for i in [5, 1, 4, 2, 3] {
            q.offer(i).unwrap();
        }
        assert_eq!(q.take(), Some(1));
        assert_eq!(q.drain(), vec![2, 3, 4, 5]);
        assert!(q.is_empty());
    }

    #[test]
    fn remaining_capacity_is_unbounded() {
        let q: UnboundedQueue<u8> = UnboundedQueue::new();
        assert_eq!(q.remaining_capacity(), usize::MAX);
    }

    #[test]
    fn poll_times_out_on_empty_queue() {
        let q: UnboundedQueue<u8> = UnboundedQueue::new();
        let start = Instant::now();
        assert_eq!(q.poll(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn take_blocks_until_offer() {
        let q = Arc::new(UnboundedQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.take())
        };
        thread::sleep(Duration::from_millis(20));
        q.offer(42).unwrap();
        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn close_refuses_offers_and_drains_before_none() {
        let q = UnboundedQueue::new();
        q.offer(1).unwrap();
        q.close();
        assert_eq!(q.offer(2), Err(2));
        assert_eq!(q.take(), Some(1));
        assert_eq!(q.take(), None);
    }

    #[test]
    fn close_releases_all_blocked_takers() {
        let q: Arc<UnboundedQueue<u8>> = Arc::new(UnboundedQueue::new());
        let takers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || q.take())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        q.close();
        for t in takers {
            assert_eq!(t.join().unwrap(), None);
        }
    }

    #[test]
    fn remove_where_reports_count() {
        let q = UnboundedQueue::new();
        for i in 0..10 {
            q.offer(i).unwrap();
        }
        assert_eq!(q.remove_where(&mut |i| i % 2 == 0), 5);
        assert_eq!(q.drain(), vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn concurrent_producers_and_consumers_see_every_item() {
        let q = Arc::new(UnboundedQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..250 {
                        q.offer(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(v) = q.poll(Duration::from_millis(200)) {
                        got.push(v);
                    }
                    got
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        let mut all: Vec<i32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 1000);
    }
}

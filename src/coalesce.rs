//! Debounce/batch buffer with an injected clock.
//!
//! The first item pushed into an empty buffer arms a deadline one window
//! away. The buffer flushes when the deadline passes or when it reaches its
//! size cap, whichever comes first. Callers pass `now` in explicitly, so the
//! whole thing is testable without sleeping.
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush<T> {
    Single(T),
    /// Two or more items, in push order.
    Batch(Vec<T>),
}

impl<T> Flush<T> {
    pub fn len(&self) -> usize {
        match self {
            Flush::Single(_) => 1,
            Flush::Batch(items) => items.len(),
        }
    }
}

#[derive(Debug)]
pub struct Coalescer<T> {
    window: Duration,
    cap: usize,
    items: Vec<T>,
    deadline: Option<Instant>,
}

impl<T> Coalescer<T> {
    pub fn new(window: Duration, cap: usize) -> Self {
        Self {
            window,
            cap: cap.max(1),
            items: Vec::new(),
            deadline: None,
        }
    }

    /// Deadline of the current collection window, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    /// Add an item. Returns a flush when this push hit the size cap.
    pub fn push(&mut self, item: T, now: Instant) -> Option<Flush<T>> {
        if self.items.is_empty() {
            self.deadline = Some(now + self.window);
        }
        self.items.push(item);
        if self.is_full() { self.flush() } else { None }
    }

    /// Flush if the window has elapsed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<Flush<T>> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.flush(),
            _ => None,
        }
    }

    /// Unconditionally drain whatever is buffered.
    pub fn flush(&mut self) -> Option<Flush<T>> {
        self.deadline = None;
        let mut items = std::mem::take(&mut self.items);
        match items.len() {
            0 => None,
            1 => items.pop().map(Flush::Single),
            _ => Some(Flush::Batch(items)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(100);

    #[test]
    fn test_single_item_flushes_as_single_after_window() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(WINDOW, 50);
        assert!(c.push("a", t0).is_none());
        assert!(c.poll(t0 + Duration::from_millis(99)).is_none());
        assert_eq!(c.poll(t0 + WINDOW), Some(Flush::Single("a")));
        assert!(c.deadline().is_none());
    }

    #[test]
    fn test_burst_within_window_is_one_batch_in_order() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(WINDOW, 50);
        for (i, item) in [1, 2, 3, 4, 5].into_iter().enumerate() {
            assert!(c.push(item, t0 + Duration::from_millis(i as u64 * 10)).is_none());
        }
        assert_eq!(c.poll(t0 + WINDOW), Some(Flush::Batch(vec![1, 2, 3, 4, 5])));
    }

    #[test]
    fn test_deadline_is_fixed_by_first_push() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(WINDOW, 50);
        c.push(1, t0);
        c.push(2, t0 + Duration::from_millis(90));
        // the window does not slide with later pushes
        assert_eq!(c.deadline(), Some(t0 + WINDOW));
    }

    #[test]
    fn test_cap_forces_flush() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(WINDOW, 3);
        assert!(c.push('a', t0).is_none());
        assert!(c.push('b', t0).is_none());
        assert_eq!(c.push('c', t0), Some(Flush::Batch(vec!['a', 'b', 'c'])));
        assert!(c.deadline().is_none());
        // next push opens a fresh window
        c.push('d', t0 + Duration::from_millis(50));
        assert_eq!(c.deadline(), Some(t0 + Duration::from_millis(150)));
    }

    #[test]
    fn test_separated_items_flush_individually() {
        let t0 = Instant::now();
        let mut c = Coalescer::new(WINDOW, 50);
        let mut flushes = Vec::new();
        for i in 0..3u64 {
            let at = t0 + Duration::from_millis(i * 250);
            c.push(i, at);
            flushes.extend(c.poll(at + WINDOW));
        }
        assert_eq!(flushes, vec![Flush::Single(0), Flush::Single(1), Flush::Single(2)]);
    }
}

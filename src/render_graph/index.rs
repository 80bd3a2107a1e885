//! Schedule coordinates and resource lifetimes

use std::fmt;

/// Position of a pass in the schedule: which queue (thread) runs it and where
/// in that queue it sits.
///
/// Queue 0 is the main queue and runs on the calling thread.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PassIndex {
    pub thread: usize,
    pub position: usize,
}

impl PassIndex {
    pub const MAIN: usize = 0;

    pub fn new(thread: usize, position: usize) -> Self {
        Self { thread, position }
    }

    pub fn is_main_thread(&self) -> bool {
        self.thread == Self::MAIN
    }
}

impl fmt::Debug for PassIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PassIndex({}:{})", self.thread, self.position)
    }
}

/// Span of schedule positions over which a resource must stay valid.
///
/// A lifetime starts on one queue. Extending it to a consumer on another queue
/// makes it asynchronous, and asynchronous lifetimes are treated as lasting
/// until the end of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFrame {
    thread: usize,
    start: usize,
    length: usize,
    asynchronous: bool,
}

impl TimeFrame {
    /// A lifetime covering just `index`.
    pub fn new(index: PassIndex) -> Self {
        Self {
            thread: index.thread,
            start: index.position,
            length: 1,
            asynchronous: false,
        }
    }

    /// Grow the lifetime to cover a consumer at `index`.
    pub fn extend_to(&mut self, index: PassIndex) {
        if index.thread != self.thread {
            self.asynchronous = true;
            return;
        }
        if index.position < self.start {
            self.length += self.start - index.position;
            self.start = index.position;
        } else {
            self.length = self.length.max(index.position - self.start + 1);
        }
    }

    pub fn thread(&self) -> usize {
        self.thread
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    /// Coordinate the lifetime starts at.
    pub fn start_index(&self) -> PassIndex {
        PassIndex::new(self.thread, self.start)
    }

    /// Last position covered, or `None` when the lifetime lasts until frame end.
    pub fn end(&self) -> Option<usize> {
        if self.asynchronous {
            None
        } else {
            Some(self.start + self.length - 1)
        }
    }

    /// Whether the resource is still live when `index` runs.
    pub fn covers(&self, index: PassIndex) -> bool {
        if self.asynchronous || index.thread != self.thread {
            return true;
        }
        index.position >= self.start && index.position < self.start + self.length
    }

    /// Whether an unclaimed reservation at `index` conflicts with this lifetime.
    ///
    /// Conflicts when the lifetime is asynchronous, lives on another queue, or
    /// has not ended by the time the reserving pass runs.
    pub fn conflicts_with_reservation(&self, index: PassIndex) -> bool {
        match self.end() {
            None => true,
            Some(_) if index.thread != self.thread => true,
            Some(end) => end >= index.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extend_same_thread() {
        let mut frame = TimeFrame::new(PassIndex::new(0, 2));
        frame.extend_to(PassIndex::new(0, 5));
        assert_eq!(frame.start(), 2);
        assert_eq!(frame.length(), 4);
        assert_eq!(frame.end(), Some(5));
        assert!(!frame.is_async());

        // Extending backwards keeps the far end.
        frame.extend_to(PassIndex::new(0, 1));
        assert_eq!(frame.start(), 1);
        assert_eq!(frame.end(), Some(5));
    }

    #[test]
    fn test_extend_other_thread_is_async() {
        let mut frame = TimeFrame::new(PassIndex::new(0, 0));
        frame.extend_to(PassIndex::new(1, 0));
        assert!(frame.is_async());
        assert_eq!(frame.end(), None);
        assert!(frame.covers(PassIndex::new(0, 100)));
    }

    #[test]
    fn test_reservation_conflicts() {
        let mut frame = TimeFrame::new(PassIndex::new(0, 1));
        frame.extend_to(PassIndex::new(0, 3));
        // Reserved after the lifetime ends: fine.
        assert!(!frame.conflicts_with_reservation(PassIndex::new(0, 4)));
        // Reserved while still live: conflict.
        assert!(frame.conflicts_with_reservation(PassIndex::new(0, 3)));
        // Reserved on another queue: conflict.
        assert!(frame.conflicts_with_reservation(PassIndex::new(1, 10)));
    }

    #[test]
    fn test_covers() {
        let mut frame = TimeFrame::new(PassIndex::new(1, 2));
        frame.extend_to(PassIndex::new(1, 4));
        assert!(frame.covers(PassIndex::new(1, 3)));
        assert!(!frame.covers(PassIndex::new(1, 5)));
        assert!(!frame.covers(PassIndex::new(1, 1)));
    }
}

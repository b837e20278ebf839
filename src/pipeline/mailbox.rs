use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use opencv::core::Mat;

use crate::alerts::UserId;

pub struct FrameTask {
    pub image: Mat,
    pub captured_at: Instant,
    pub user_id: UserId,
}

pub type FrameMailbox = Mailbox<FrameTask>;

/// Latest-wins handoff between request handlers and the worker. Producers
/// never block; a drain keeps only the newest entry.
pub struct Mailbox<T> {
    slots: Mutex<VecDeque<T>>,
    capacity: usize,
}

pub struct Latest<T> {
    pub item: T,
    /// Older entries thrown away by this drain.
    pub discarded: usize,
}

impl<T> Mailbox<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns true when the oldest pending entry had to be dropped.
    pub fn submit(&self, item: T) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let overflowed = if slots.len() >= self.capacity {
            slots.pop_front();
            true
        } else {
            false
        };
        slots.push_back(item);
        overflowed
    }

    pub fn take_latest(&self) -> Option<Latest<T>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let item = slots.pop_back()?;
        let discarded = slots.len();
        slots.clear();
        Some(Latest { item, discarded })
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_latest_discards_backlog() {
        let mailbox = Mailbox::new(5);
        mailbox.submit(1);
        mailbox.submit(2);
        mailbox.submit(3);

        let latest = mailbox.take_latest().unwrap();
        assert_eq!(latest.item, 3);
        assert_eq!(latest.discarded, 2);
        assert_eq!(mailbox.len(), 0);
        assert!(mailbox.take_latest().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mailbox = Mailbox::new(2);
        assert!(!mailbox.submit("a"));
        assert!(!mailbox.submit("b"));
        assert!(mailbox.submit("c"));
        assert_eq!(mailbox.len(), 2);

        let latest = mailbox.take_latest().unwrap();
        assert_eq!(latest.item, "c");
        assert_eq!(latest.discarded, 1);
    }

    #[test]
    fn test_concurrent_producers_never_block() {
        let mailbox = Arc::new(Mailbox::new(5));
        let handles: Vec<_> = (0..8)
            .map(|p| {
                let mailbox = Arc::clone(&mailbox);
                thread::spawn(move || {
                    for i in 0..100 {
                        mailbox.submit(p * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(mailbox.len() <= 5);
        let latest = mailbox.take_latest().unwrap();
        assert_eq!(latest.item % 1000, 99);
    }
}

use std::collections::VecDeque;

use crate::analytics::HazardLabel;

/// Fixed-capacity FIFO of per-frame labels. Pushing into a full window evicts
/// the oldest entry.
#[derive(Debug, Clone)]
pub struct LabelWindow {
    labels: VecDeque<HazardLabel>,
    capacity: usize,
}

impl LabelWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            labels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, label: HazardLabel) -> Option<HazardLabel> {
        let evicted = if self.labels.len() >= self.capacity {
            self.labels.pop_front()
        } else {
            None
        };
        self.labels.push_back(label);
        evicted
    }

    pub fn count(&self, label: HazardLabel) -> usize {
        self.labels.iter().filter(|&&l| l == label).count()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }

    pub fn labels(&self) -> Vec<HazardLabel> {
        self.labels.iter().copied().collect()
    }

    /// Compact form for logs, oldest first: `FFF-LL`.
    pub fn codes(&self) -> String {
        self.labels.iter().map(|l| l.code()).collect()
    }
}

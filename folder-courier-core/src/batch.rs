//! Batch construction under per-call item and per-item size limits.

use std::fs::File;

use tracing::warn;

use crate::classify::WorkItem;
use crate::stats::SkipReason;

/// One event produced while walking a bucket's item list.
#[derive(Debug, Clone, PartialEq)]
pub enum Batched<'a> {
    /// An item excluded before transport.
    Skipped { item: &'a WorkItem, reason: SkipReason },
    /// A closed batch of `1..=max_batch_size` items.
    Ready(Vec<&'a WorkItem>),
}

/// Lazy batcher over an ordered item slice.
///
/// Skip events are yielded as soon as the offending item is reached, so they may
/// interleave with batches. Empty batches are never produced.
pub struct Batcher<'a> {
    items: std::slice::Iter<'a, WorkItem>,
    max_batch_size: usize,
    max_item_bytes: u64,
    current: Vec<&'a WorkItem>,
}

impl<'a> Batcher<'a> {
    pub fn new(items: &'a [WorkItem], max_batch_size: usize, max_item_bytes: u64) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            items: items.iter(),
            max_batch_size,
            max_item_bytes,
            current: Vec::with_capacity(max_batch_size),
        }
    }

    fn check(&self, item: &WorkItem) -> Option<SkipReason> {
        if item.size_bytes > self.max_item_bytes {
            return Some(SkipReason::TooLarge);
        }
        // Handle is dropped immediately; the messenger reopens the file per attempt.
        if File::open(&item.absolute_path).is_err() {
            return Some(SkipReason::Unreadable);
        }
        None
    }
}

impl<'a> Iterator for Batcher<'a> {
    type Item = Batched<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(item) = self.items.next() else {
                if self.current.is_empty() {
                    return None;
                }
                return Some(Batched::Ready(std::mem::take(&mut self.current)));
            };

            if let Some(reason) = self.check(item) {
                warn!(
                    path = %item.relative_path,
                    size_mb = format!("{:.2}", size_mb(item.size_bytes)),
                    %reason,
                    "[BATCH] Skipped item"
                );
                return Some(Batched::Skipped { item, reason });
            }

            self.current.push(item);
            if self.current.len() == self.max_batch_size {
                let next = Vec::with_capacity(self.max_batch_size);
                let batch = std::mem::replace(&mut self.current, next);
                return Some(Batched::Ready(batch));
            }
        }
    }
}

pub fn size_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

//! Pending-job queue ordered by priority weight, FIFO within a weight.

use std::collections::VecDeque;

use super::{JobId, JobPriority};

struct QueueEntry<T> {
    id: JobId,
    weight: u8,
    item: T,
}

/// Ordered store of pending items.
///
/// Entries are kept sorted by descending weight. A new entry goes to the end
/// of its weight's run, so equal-priority items leave in arrival order.
pub struct PriorityQueue<T> {
    entries: VecDeque<QueueEntry<T>>,
}

impl<T> PriorityQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert after every entry with weight >= the new one.
    pub fn insert(&mut self, id: JobId, priority: JobPriority, item: T) {
        let weight = priority.weight();
        let position = self.entries.partition_point(|entry| entry.weight >= weight);
        self.entries.insert(position, QueueEntry { id, weight, item });
    }

    /// Remove a still-pending item. Returns `None` if it is not queued.
    pub fn remove(&mut self, id: JobId) -> Option<T> {
        let position = self.entries.iter().position(|entry| entry.id == id)?;
        self.entries.remove(position).map(|entry| entry.item)
    }

    /// Remove the highest-weight, earliest-inserted item.
    pub fn pop_front(&mut self) -> Option<T> {
        self.entries.pop_front().map(|entry| entry.item)
    }

    pub fn get(&self, id: JobId) -> Option<&T> {
        self.entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| &entry.item)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Ids in dequeue order.
    pub fn ids(&self) -> impl Iterator<Item = JobId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(queue: &mut PriorityQueue<&'static str>) -> Vec<&'static str> {
        std::iter::from_fn(|| queue.pop_front()).collect()
    }

    #[test]
    fn test_priority_ordering() {
        let mut queue = PriorityQueue::new();
        queue.insert(JobId(1), JobPriority::Normal, "normal");
        queue.insert(JobId(2), JobPriority::High, "high");
        queue.insert(JobId(3), JobPriority::Low, "low");
        queue.insert(JobId(4), JobPriority::Medium, "medium");

        assert_eq!(drain(&mut queue), vec!["high", "medium", "normal", "low"]);
    }

    #[test]
    fn test_fifo_within_weight() {
        let mut queue = PriorityQueue::new();
        queue.insert(JobId(1), JobPriority::Normal, "n1");
        queue.insert(JobId(2), JobPriority::High, "h1");
        queue.insert(JobId(3), JobPriority::Normal, "n2");
        queue.insert(JobId(4), JobPriority::High, "h2");
        queue.insert(JobId(5), JobPriority::Normal, "n3");

        assert_eq!(drain(&mut queue), vec!["h1", "h2", "n1", "n2", "n3"]);
    }

    #[test]
    fn test_remove_by_id() {
        let mut queue = PriorityQueue::new();
        queue.insert(JobId(1), JobPriority::Normal, "a");
        queue.insert(JobId(2), JobPriority::Normal, "b");
        queue.insert(JobId(3), JobPriority::Normal, "c");

        assert_eq!(queue.remove(JobId(2)), Some("b"));
        assert_eq!(queue.remove(JobId(2)), None);
        assert!(!queue.contains(JobId(2)));
        assert_eq!(queue.ids().collect::<Vec<_>>(), vec![JobId(1), JobId(3)]);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_reinserted_item_goes_behind_its_peers() {
        let mut queue = PriorityQueue::new();
        queue.insert(JobId(1), JobPriority::Medium, "first");
        queue.insert(JobId(2), JobPriority::Medium, "second");

        let first = queue.pop_front().unwrap();
        queue.insert(JobId(1), JobPriority::Medium, first);

        assert_eq!(drain(&mut queue), vec!["second", "first"]);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue: PriorityQueue<()> = PriorityQueue::default();
        assert!(queue.is_empty());
        assert!(queue.pop_front().is_none());
        assert!(queue.get(JobId(9)).is_none());
    }
}

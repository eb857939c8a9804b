//! The priority run-queue: one FIFO level per priority.

use std::collections::VecDeque;

use crate::event::EventId;

/// An array of FIFO queues indexed by priority. Priority `0` is the most
/// urgent: [`Loop::run_once`](crate::Loop) drains the lowest-indexed
/// non-empty level before looking at any higher-numbered one, so lower
/// priorities can starve higher-numbered ones indefinitely (accepted,
/// tested behavior — see `tests/priority.rs`).
#[derive(Debug)]
pub(crate) struct PriorityQueue {
    levels: Vec<VecDeque<EventId>>,
}

impl PriorityQueue {
    pub(crate) fn new(priorities: usize) -> PriorityQueue {
        PriorityQueue { levels: (0..priorities.max(1)).map(|_| VecDeque::new()).collect() }
    }

    pub(crate) fn priorities(&self) -> usize {
        self.levels.len()
    }

    /// Grow or shrink the number of priority levels. Callers must ensure
    /// no level being removed still holds an event.
    pub(crate) fn resize(&mut self, priorities: usize) {
        self.levels.resize_with(priorities.max(1), VecDeque::new);
    }

    pub(crate) fn push_back(&mut self, priority: usize, id: EventId) {
        self.levels[priority].push_back(id);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }

    /// The lowest-indexed non-empty level, if any.
    pub(crate) fn next_level(&self) -> Option<usize> {
        self.levels.iter().position(|level| !level.is_empty())
    }

    pub(crate) fn pop_front(&mut self, priority: usize) -> Option<EventId> {
        self.levels[priority].pop_front()
    }

    /// Remove `id` from `priority`'s level, wherever it currently sits.
    /// Returns whether it was found.
    pub(crate) fn remove(&mut self, priority: usize, id: EventId) -> bool {
        let level = &mut self.levels[priority];
        match level.iter().position(|&queued| queued == id) {
            Some(pos) => {
                level.remove(pos);
                true
            }
            None => false,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::PriorityQueue;
    use crate::event::EventId;

    #[test]
    fn fifo_within_a_level() {
        let mut queue = PriorityQueue::new(2);
        queue.push_back(0, EventId(1));
        queue.push_back(0, EventId(2));
        assert_eq!(queue.next_level(), Some(0));
        assert_eq!(queue.pop_front(0), Some(EventId(1)));
        assert_eq!(queue.pop_front(0), Some(EventId(2)));
        assert_eq!(queue.pop_front(0), None);
    }

    #[test]
    fn lowest_index_wins() {
        let mut queue = PriorityQueue::new(3);
        queue.push_back(2, EventId(1));
        queue.push_back(0, EventId(2));
        queue.push_back(1, EventId(3));
        assert_eq!(queue.next_level(), Some(0));
    }
}

//! # Deadline queue: a binary min-heap with instance back-pointers.
//!
//! The heap stores instance ids ordered by each instance's `deadline`; the
//! instance record carries its current heap position so that `update` and
//! `remove` run in O(log n) without a scan. The queue never holds the same
//! instance twice — `update` is the idempotent way to move a queued
//! instance after its deadline changes.
//!
//! Pop order among equal deadlines is unspecified; the runner only relies
//! on every expired entry surfacing within the same tick-handling pass.

use std::collections::HashMap;

use crate::instance::Instance;
use crate::types::{Id, Time};

type Registry = HashMap<Id, Instance>;

#[derive(Debug, Default)]
pub(crate) struct DeadlineQueue {
    heap: Vec<Id>,
}

impl DeadlineQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// The id with the smallest deadline, without removal.
    pub(crate) fn peek(&self) -> Option<Id> {
        self.heap.first().copied()
    }

    /// Inserts an unqueued instance. The caller guarantees the instance is
    /// not already present.
    pub(crate) fn enqueue(&mut self, id: Id, reg: &mut Registry) {
        debug_assert!(reg[&id].queue_pos.is_none());

        let pos = self.heap.len();
        self.heap.push(id);
        self.set_pos(id, Some(pos), reg);
        self.sift_up(pos, reg);
    }

    /// Removes and returns the id with the smallest deadline, clearing its
    /// position back-pointer.
    pub(crate) fn dequeue(&mut self, reg: &mut Registry) -> Option<Id> {
        if self.heap.is_empty() {
            return None;
        }

        let id = self.heap[0];
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        self.heap.pop();
        self.set_pos(id, None, reg);

        if !self.heap.is_empty() {
            let moved = self.heap[0];
            self.set_pos(moved, Some(0), reg);
            self.sift_down(0, reg);
        }
        Some(id)
    }

    /// Restores heap order after the instance's deadline changed in place.
    /// No-op when the instance is not queued.
    pub(crate) fn update(&mut self, id: Id, reg: &mut Registry) {
        let Some(pos) = reg[&id].queue_pos else {
            return;
        };
        self.sift_up(pos, reg);
        let pos = reg[&id].queue_pos.expect("updated entry left the heap");
        self.sift_down(pos, reg);
    }

    /// Removes a queued instance from the middle of the heap. No-op when the
    /// instance is not queued.
    pub(crate) fn remove(&mut self, id: Id, reg: &mut Registry) {
        let Some(pos) = reg[&id].queue_pos else {
            return;
        };

        let last = self.heap.len() - 1;
        self.heap.swap(pos, last);
        self.heap.pop();
        self.set_pos(id, None, reg);

        if pos < self.heap.len() {
            let moved = self.heap[pos];
            self.set_pos(moved, Some(pos), reg);
            self.sift_up(pos, reg);
            let pos = reg[&moved].queue_pos.expect("moved entry left the heap");
            self.sift_down(pos, reg);
        }
    }

    fn deadline(&self, pos: usize, reg: &Registry) -> Time {
        reg[&self.heap[pos]].deadline
    }

    fn set_pos(&self, id: Id, pos: Option<usize>, reg: &mut Registry) {
        if let Some(inst) = reg.get_mut(&id) {
            inst.queue_pos = pos;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize, reg: &mut Registry) {
        self.heap.swap(a, b);
        self.set_pos(self.heap[a], Some(a), reg);
        self.set_pos(self.heap[b], Some(b), reg);
    }

    fn sift_up(&mut self, mut pos: usize, reg: &mut Registry) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.deadline(pos, reg) >= self.deadline(parent, reg) {
                break;
            }
            self.swap_entries(pos, parent, reg);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize, reg: &mut Registry) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut smallest = pos;

            if left < len && self.deadline(left, reg) < self.deadline(smallest, reg) {
                smallest = left;
            }
            if right < len && self.deadline(right, reg) < self.deadline(smallest, reg) {
                smallest = right;
            }
            if smallest == pos {
                break;
            }
            self.swap_entries(pos, smallest, reg);
            pos = smallest;
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self, reg: &Registry) {
        for (pos, id) in self.heap.iter().enumerate() {
            assert_eq!(reg[id].queue_pos, Some(pos), "back-pointer of {id}");
            if pos > 0 {
                let parent = (pos - 1) / 2;
                assert!(
                    self.deadline(parent, reg) <= self.deadline(pos, reg),
                    "heap order violated at {pos}"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Instance;
    use crate::types::Index;
    use proptest::prelude::*;

    fn seed(reg: &mut Registry, id: u64, deadline: Time) -> Id {
        let id = Id(id);
        let mut inst = Instance::new(id, Index(0), 0, Default::default());
        inst.deadline = deadline;
        reg.insert(id, inst);
        id
    }

    #[test]
    fn pops_in_deadline_order() {
        let mut reg = Registry::new();
        let mut q = DeadlineQueue::new();

        for (n, deadline) in [(1, 50), (2, 10), (3, 30), (4, 20), (5, 40)] {
            let id = seed(&mut reg, n, deadline);
            q.enqueue(id, &mut reg);
        }

        assert_eq!(q.len(), 5);
        assert_eq!(q.peek(), Some(Id(2)));

        let mut popped = Vec::new();
        while let Some(id) = q.dequeue(&mut reg) {
            assert_eq!(reg[&id].queue_pos, None);
            popped.push(reg[&id].deadline);
        }
        assert_eq!(popped, vec![10, 20, 30, 40, 50]);
        assert!(q.is_empty());
    }

    #[test]
    fn update_moves_entry_both_ways() {
        let mut reg = Registry::new();
        let mut q = DeadlineQueue::new();

        let a = seed(&mut reg, 1, 10);
        let b = seed(&mut reg, 2, 20);
        let c = seed(&mut reg, 3, 30);
        for id in [a, b, c] {
            q.enqueue(id, &mut reg);
        }

        // Push the minimum to the back.
        reg.get_mut(&a).unwrap().deadline = 99;
        q.update(a, &mut reg);
        assert_eq!(q.peek(), Some(b));

        // Pull the maximum to the front.
        reg.get_mut(&c).unwrap().deadline = 1;
        q.update(c, &mut reg);
        assert_eq!(q.peek(), Some(c));

        q.assert_invariants(&reg);
    }

    #[test]
    fn remove_from_middle() {
        let mut reg = Registry::new();
        let mut q = DeadlineQueue::new();

        let ids: Vec<Id> = (1..=7)
            .map(|n| {
                let id = seed(&mut reg, n, (n * 10) as Time);
                q.enqueue(id, &mut reg);
                id
            })
            .collect();

        q.remove(ids[3], &mut reg);
        assert_eq!(reg[&ids[3]].queue_pos, None);
        assert_eq!(q.len(), 6);
        q.assert_invariants(&reg);

        // Removing an unqueued id is a no-op.
        q.remove(ids[3], &mut reg);
        assert_eq!(q.len(), 6);

        let mut popped = Vec::new();
        while let Some(id) = q.dequeue(&mut reg) {
            popped.push(reg[&id].deadline);
        }
        assert_eq!(popped, vec![10, 20, 30, 50, 60, 70]);
    }

    #[test]
    fn ties_all_surface() {
        let mut reg = Registry::new();
        let mut q = DeadlineQueue::new();
        for n in 1..=4 {
            let id = seed(&mut reg, n, 5);
            q.enqueue(id, &mut reg);
        }

        let mut seen = Vec::new();
        while let Some(id) = q.dequeue(&mut reg) {
            seen.push(id);
        }
        seen.sort();
        assert_eq!(seen, vec![Id(1), Id(2), Id(3), Id(4)]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u64, Time),
        Update(u64, Time),
        Remove(u64),
        Dequeue,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..16u64, 1..100i64).prop_map(|(id, d)| Op::Enqueue(id, d)),
            (0..16u64, 1..100i64).prop_map(|(id, d)| Op::Update(id, d)),
            (0..16u64).prop_map(Op::Remove),
            Just(Op::Dequeue),
        ]
    }

    proptest! {
        #[test]
        fn heap_invariants_hold(ops in prop::collection::vec(op_strategy(), 1..200)) {
            let mut reg = Registry::new();
            let mut q = DeadlineQueue::new();

            for op in ops {
                match op {
                    Op::Enqueue(n, d) => {
                        let id = Id(n);
                        if !reg.contains_key(&id) {
                            seed(&mut reg, n, d);
                        }
                        if reg[&id].queue_pos.is_none() {
                            reg.get_mut(&id).unwrap().deadline = d;
                            q.enqueue(id, &mut reg);
                        }
                    }
                    Op::Update(n, d) => {
                        let id = Id(n);
                        if reg.contains_key(&id) && reg[&id].queue_pos.is_some() {
                            reg.get_mut(&id).unwrap().deadline = d;
                            q.update(id, &mut reg);
                        }
                    }
                    Op::Remove(n) => {
                        let id = Id(n);
                        if reg.contains_key(&id) {
                            q.remove(id, &mut reg);
                        }
                    }
                    Op::Dequeue => {
                        if let Some(id) = q.dequeue(&mut reg) {
                            prop_assert_eq!(reg[&id].queue_pos, None);
                        }
                    }
                }
                q.assert_invariants(&reg);
            }

            // Draining yields non-decreasing deadlines.
            let mut prev = Time::MIN;
            while let Some(id) = q.dequeue(&mut reg) {
                let d = reg[&id].deadline;
                prop_assert!(d >= prev);
                prev = d;
            }
        }
    }
}

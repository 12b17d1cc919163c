//! FIFO worklist driving the solver's edge-triggered propagation.

use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::ir::{InstId, Module, ValueRef};

use std::collections::VecDeque;

/// Instructions waiting to be (re)visited. Starts with every instruction in
/// module order; rules push the users of any value whose set grew. An
/// instruction already queued is not queued twice.
pub struct WorkList {
    queue: VecDeque<InstId>,
    queued: UnorderedSet<InstId>,
    users: UnorderedMap<ValueRef, Vec<InstId>>,
}

impl WorkList {
    pub fn new(module: &Module) -> Self {
        let mut queue = VecDeque::new();
        let mut queued = UnorderedSet::new();
        for inst in module.all_insts() {
            queue.push_back(inst);
            queued.insert(inst);
        }
        WorkList {
            queue,
            queued,
            users: module.users(),
        }
    }

    pub fn push(&mut self, inst: InstId) {
        if self.queued.insert(inst) {
            self.queue.push_back(inst);
        }
    }

    /// Requeue every instruction using `value` as an operand.
    pub fn push_users(&mut self, value: ValueRef) {
        if let Some(users) = self.users.get(&value) {
            for inst in users.clone() {
                self.push(inst);
            }
        }
    }

    pub fn pop(&mut self) -> Option<InstId> {
        let inst = self.queue.pop_front()?;
        self.queued.remove(&inst);
        Some(inst)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

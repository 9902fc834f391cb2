//! Bounded undo/redo stacks.
//!
//! Each entry is the list of reverse ops of one history step. Entries are
//! never empty.

use std::collections::VecDeque;

use crate::op::Op;

/// Maximum number of entries kept on each stack.
pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Default)]
pub(crate) struct History {
    undo: VecDeque<Vec<Op>>,
    redo: VecDeque<Vec<Op>>,
    /// Reverse ops collected while history is paused, `None` when live.
    paused: Option<Vec<Op>>,
}

fn push_bounded(stack: &mut VecDeque<Vec<Op>>, entry: Vec<Op>) {
    if entry.is_empty() {
        return;
    }
    if stack.len() == HISTORY_CAPACITY {
        stack.pop_front();
    }
    stack.push_back(entry);
}

impl History {
    /// Records the reverse of a fresh local mutation and drops the redo
    /// stack.
    pub fn record(&mut self, reverse: Vec<Op>) {
        self.redo.clear();
        match &mut self.paused {
            Some(buffer) => {
                buffer.splice(0..0, reverse);
            }
            None => push_bounded(&mut self.undo, reverse),
        }
    }

    pub fn pop_undo(&mut self) -> Option<Vec<Op>> {
        self.undo.pop_back()
    }

    pub fn pop_redo(&mut self) -> Option<Vec<Op>> {
        self.redo.pop_back()
    }

    pub fn push_undo(&mut self, entry: Vec<Op>) {
        push_bounded(&mut self.undo, entry);
    }

    pub fn push_redo(&mut self, entry: Vec<Op>) {
        push_bounded(&mut self.redo, entry);
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn pause(&mut self) {
        if self.paused.is_none() {
            self.paused = Some(Vec::new());
        }
    }

    /// Folds everything recorded while paused into one undo entry.
    pub fn resume(&mut self) {
        if let Some(buffer) = self.paused.take() {
            push_bounded(&mut self.undo, buffer);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;

    fn entry(n: usize) -> Vec<Op> {
        vec![Op::DeleteCrdt {
            id: NodeId::new(format!("0:{n}")),
        }]
    }

    #[test]
    fn test_undo_stack_is_bounded() {
        let mut history = History::default();
        for n in 0..HISTORY_CAPACITY + 10 {
            history.record(entry(n));
        }
        let mut count = 0;
        let mut last = None;
        while let Some(e) = history.pop_undo() {
            last = Some(e);
            count += 1;
        }
        assert_eq!(count, HISTORY_CAPACITY);
        // The oldest ten were evicted.
        assert_eq!(last, Some(entry(10)));
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = History::default();
        history.push_redo(entry(1));
        assert!(history.can_redo());
        history.record(entry(2));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_empty_entries_skipped() {
        let mut history = History::default();
        history.record(Vec::new());
        assert!(!history.can_undo());
    }

    #[test]
    fn test_pause_collapses_entries() {
        let mut history = History::default();
        history.pause();
        history.record(entry(1));
        history.record(entry(2));
        assert!(!history.can_undo());
        history.resume();
        // Later reverses run first.
        assert_eq!(history.pop_undo(), Some(vec![entry(2)[0].clone(), entry(1)[0].clone()]));
        assert!(!history.can_undo());
    }
}

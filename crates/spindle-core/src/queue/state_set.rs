//! Ordered state-set: a sorted set of task ids keyed by a score.
//!
//! Invariant: `ordered` and `scores` always describe the same members.

use std::collections::{BTreeSet, HashMap};

use crate::domain::TaskId;

#[derive(Debug, Default, Clone)]
pub(super) struct StateSet {
    /// (score, id): ties on score fall back to id order.
    ordered: BTreeSet<(i64, TaskId)>,
    scores: HashMap<TaskId, i64>,
}

impl StateSet {
    pub(super) fn insert(&mut self, id: TaskId, score: i64) {
        if let Some(old) = self.scores.insert(id, score) {
            self.ordered.remove(&(old, id));
        }
        self.ordered.insert((score, id));
    }

    pub(super) fn remove(&mut self, id: TaskId) -> bool {
        match self.scores.remove(&id) {
            Some(score) => {
                self.ordered.remove(&(score, id));
                true
            }
            None => false,
        }
    }

    pub(super) fn pop_first(&mut self) -> Option<TaskId> {
        let (_, id) = self.ordered.pop_first()?;
        self.scores.remove(&id);
        Some(id)
    }

    pub(super) fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Members in score order.
    pub(super) fn iter(&self) -> impl Iterator<Item = (i64, TaskId)> + '_ {
        self.ordered.iter().copied()
    }

    /// Members with score <= max, in score order.
    pub(super) fn up_to(&self, max: i64) -> impl Iterator<Item = (i64, TaskId)> + '_ {
        self.iter().take_while(move |(score, _)| *score <= max)
    }
}

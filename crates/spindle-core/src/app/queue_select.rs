//! Queue polling order for executors.
//!
//! - Strict: descending weight, ties by name. Lower queues are only polled
//!   when every higher one came back empty.
//! - Weighted: a fixed cycle where each queue appears `weight` times. Each
//!   call advances a shared cursor; the queue under the cursor goes first and
//!   the rest follow in strict order, so an idle leader never starves others.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct QueueSelector {
    /// Strict order.
    queues: Vec<String>,
    /// Indices into `queues`, weight-expanded. Empty in strict mode.
    cycle: Vec<usize>,
    cursor: AtomicUsize,
}

impl QueueSelector {
    pub fn new(weights: &BTreeMap<String, u32>, strict_priority: bool) -> Self {
        let mut ranked: Vec<(&String, u32)> = weights.iter().map(|(q, w)| (q, *w)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let queues: Vec<String> = ranked.iter().map(|(q, _)| (*q).clone()).collect();
        let cycle = if strict_priority {
            Vec::new()
        } else {
            ranked
                .iter()
                .enumerate()
                .flat_map(|(idx, (_, w))| std::iter::repeat_n(idx, *w as usize))
                .collect()
        };

        Self {
            queues,
            cycle,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn is_strict(&self) -> bool {
        self.cycle.is_empty()
    }

    /// Every configured queue, in the order to try them this round.
    pub fn order(&self) -> Vec<&str> {
        let mut order: Vec<&str> = self.queues.iter().map(String::as_str).collect();
        if self.cycle.is_empty() {
            return order;
        }
        let pos = self.cursor.fetch_add(1, Ordering::Relaxed) % self.cycle.len();
        let lead = self.cycle[pos];
        let leader = order.remove(lead);
        order.insert(0, leader);
        order
    }
}

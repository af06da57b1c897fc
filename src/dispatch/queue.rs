// Pending channel effects, earliest first.
//
// Entries are never removed on cancellation; they carry the generation they
// were scheduled under and the dispatcher drops stale ones when they come
// due. The periodic sweep reclaims stale entries that are still far in the
// future so the resident count stays bounded across many skips.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::{debug, warn};

use crate::pipeline::schedule::ScheduledAction;

/// Identifies one playback session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

#[derive(Debug)]
pub struct Entry {
    pub generation: Generation,
    pub action: ScheduledAction,
    seq: u64, // insertion order, breaks time ties
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // reversed: BinaryHeap is a max-heap, we want the earliest on top
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .action
            .time
            .total_cmp(&self.action.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct DispatchQueue {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    since_sweep: usize,
    sweep_every: usize,
    max_resident: usize,
}

impl DispatchQueue {
    pub fn new(sweep_every: usize, max_resident: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
            since_sweep: 0,
            sweep_every: sweep_every.max(1),
            max_resident,
        }
    }

    /// Queue `action`. Every `sweep_every` pushes, entries not belonging to
    /// `active` are reclaimed.
    pub fn push(
        &mut self,
        action: ScheduledAction,
        generation: Generation,
        active: Option<Generation>,
    ) {
        self.heap.push(Entry { generation, action, seq: self.next_seq });
        self.next_seq += 1;
        self.since_sweep += 1;
        if self.since_sweep >= self.sweep_every {
            self.sweep(active);
        }
    }

    pub fn sweep(&mut self, active: Option<Generation>) -> usize {
        self.since_sweep = 0;
        let before = self.heap.len();
        self.heap.retain(|e| Some(e.generation) == active);
        let removed = before - self.heap.len();
        if removed > 0 {
            debug!(removed, resident = self.heap.len(), "swept stale entries");
        }
        if self.heap.len() > self.max_resident {
            warn!(
                resident = self.heap.len(),
                ceiling = self.max_resident,
                "dispatch queue above resident ceiling"
            );
        }
        removed
    }

    pub fn next_time(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.action.time)
    }

    /// Earliest entry whose time is <= `song_time`.
    pub fn pop_due(&mut self, song_time: f64) -> Option<Entry> {
        if self.next_time()? <= song_time {
            self.heap.pop()
        } else {
            None
        }
    }

    pub fn resident_count(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::schedule::ChannelEffect;
    use crate::shared::{FlashMode, LightPattern};

    fn at(time: f64) -> ScheduledAction {
        let effect = ChannelEffect::FlashMode(FlashMode::Pattern(LightPattern::Always));
        ScheduledAction { time, effect }
    }

    #[test]
    fn pops_in_time_then_insertion_order() {
        let g = Generation(1);
        let mut q = DispatchQueue::new(1000, 1000);
        q.push(at(2.0), g, Some(g));
        q.push(at(1.0), g, Some(g));
        q.push(at(1.0), Generation(7), Some(g));

        assert!(q.pop_due(0.5).is_none());
        let first = q.pop_due(5.0).unwrap();
        assert_eq!((first.action.time, first.generation), (1.0, g));
        let second = q.pop_due(5.0).unwrap();
        assert_eq!((second.action.time, second.generation), (1.0, Generation(7)));
        assert_eq!(q.pop_due(5.0).unwrap().action.time, 2.0);
        assert!(q.pop_due(5.0).is_none());
    }

    #[test]
    fn sweep_runs_every_n_pushes() {
        let old = Generation(1);
        let new = Generation(2);
        let mut q = DispatchQueue::new(4, 1000);
        for i in 0..3 {
            q.push(at(10.0 + i as f64), old, Some(old));
        }
        // generation changed; the 4th push triggers the sweep
        q.push(at(1.0), new, Some(new));
        assert_eq!(q.resident_count(), 1);
        assert_eq!(q.next_time(), Some(1.0));
    }
}

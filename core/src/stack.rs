//! One stack level: the hypotheses sharing a coverage cardinality.
//!
//! Arriving hypotheses are recombined immediately: of two equivalent
//! states the one with the higher partial score survives. Once all
//! feeders have expanded, the level is pruned — threshold first (drop
//! everything further than the pruning gap below the best priority),
//! then histogram (keep the top `stack_capacity`) — and drained in
//! descending priority order.

use ahash::AHashMap;
use std::cmp::Ordering;

use tracing::trace;

use crate::hypothesis::{Arena, HypId, RecombKey};
use crate::Score;

/// Per-level counters for decode statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct LevelStats {
    /// Hypotheses inserted as new states.
    pub added: usize,
    /// Arrivals that met an equivalent incumbent.
    pub recombined: usize,
    /// Hypotheses discarded by threshold or histogram pruning.
    pub pruned: usize,
}

/// The set of hypotheses at one coverage cardinality.
#[derive(Debug)]
pub struct StackLevel {
    hyps: Vec<HypId>,
    by_key: AHashMap<RecombKey, usize>,
    capacity: usize,
    threshold: Score,
    stats: LevelStats,
}

/// Deterministic priority order: higher g+h first, then higher g, then
/// the smaller coverage bitstring, then arena order.
fn priority_order(arena: &Arena, a: HypId, b: HypId) -> Ordering {
    let ha = arena.get(a);
    let hb = arena.get(b);
    hb.total()
        .partial_cmp(&ha.total())
        .unwrap_or(Ordering::Equal)
        .then_with(|| hb.g.partial_cmp(&ha.g).unwrap_or(Ordering::Equal))
        .then_with(|| ha.coverage.cmp_bits(&hb.coverage))
        .then_with(|| a.cmp(&b))
}

impl StackLevel {
    pub fn new(capacity: usize, threshold: Score) -> Self {
        Self {
            hyps: Vec::new(),
            by_key: AHashMap::new(),
            capacity: capacity.max(1),
            threshold,
            stats: LevelStats::default(),
        }
    }

    /// Add a hypothesis, recombining with an equivalent incumbent.
    ///
    /// Returns true when the hypothesis now occupies the level, false
    /// when it lost against the incumbent. An exact score tie keeps the
    /// incumbent, so arrival order (which is deterministic) decides.
    pub fn add(&mut self, arena: &Arena, id: HypId) -> bool {
        let key = arena.get(id).recomb_key();
        match self.by_key.entry(key) {
            std::collections::hash_map::Entry::Occupied(slot) => {
                self.stats.recombined += 1;
                let pos = *slot.get();
                let incumbent = self.hyps[pos];
                if arena.get(id).g > arena.get(incumbent).g {
                    self.hyps[pos] = id;
                    true
                } else {
                    false
                }
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(self.hyps.len());
                self.hyps.push(id);
                self.stats.added += 1;
                true
            }
        }
    }

    /// Apply threshold and histogram pruning, then freeze the level in
    /// descending priority order.
    pub fn prune(&mut self, arena: &Arena) {
        self.hyps.sort_by(|&a, &b| priority_order(arena, a, b));

        let before = self.hyps.len();
        if let Some(&best) = self.hyps.first() {
            let floor = arena.get(best).total() - self.threshold;
            let keep = self.hyps.partition_point(|&id| arena.get(id).total() >= floor);
            self.hyps.truncate(keep);
        }
        self.hyps.truncate(self.capacity);
        self.stats.pruned += before - self.hyps.len();

        // Rebuild the recombination index over the survivors
        self.by_key.clear();
        for (pos, &id) in self.hyps.iter().enumerate() {
            self.by_key.insert(arena.get(id).recomb_key(), pos);
        }
        trace!(before, after = self.hyps.len(), "level pruned");
    }

    /// The surviving hypotheses; descending priority after `prune`.
    pub fn ordered(&self) -> &[HypId] {
        &self.hyps
    }

    /// The best hypothesis of the level.
    pub fn best(&self, arena: &Arena) -> Option<HypId> {
        self.hyps
            .iter()
            .copied()
            .min_by(|&a, &b| priority_order(arena, a, b))
    }

    pub fn len(&self) -> usize {
        self.hyps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hyps.is_empty()
    }

    pub fn stats(&self) -> LevelStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::Coverage;
    use crate::hypothesis::Hypothesis;
    use crate::lm::LmHistory;
    use crate::vocab::UNKNOWN_PHRASE_ID;

    fn hyp(arena: &mut Arena, span: (usize, usize), word: u64, g: Score, h: Score) -> HypId {
        let mut history = LmHistory::new(2);
        history.push(word);
        arena.push(Hypothesis {
            parent: None,
            target_words: vec![word],
            st_uid: UNKNOWN_PHRASE_ID,
            coverage: Coverage::new(4).with_span(span.0, span.1),
            span: Some(span),
            history,
            g,
            h,
            level: span.1 - span.0 + 1,
        })
    }

    #[test]
    fn recombination_keeps_the_higher_partial_score() {
        let mut arena = Arena::new();
        let mut level = StackLevel::new(10, 100.0);
        let weak = hyp(&mut arena, (0, 0), 7, -2.0, -1.0);
        let strong = hyp(&mut arena, (0, 0), 7, -1.0, -1.0);

        assert!(level.add(&arena, weak));
        assert!(level.add(&arena, strong));
        assert_eq!(level.len(), 1);
        assert_eq!(level.stats().recombined, 1);
        level.prune(&arena);
        assert_eq!(level.best(&arena), Some(strong));

        // An equal-score arrival loses against the incumbent
        let tie = hyp(&mut arena, (0, 0), 7, -1.0, -1.0);
        assert!(!level.add(&arena, tie));
    }

    #[test]
    fn distinct_states_do_not_recombine() {
        let mut arena = Arena::new();
        let mut level = StackLevel::new(10, 100.0);
        let a = hyp(&mut arena, (0, 0), 7, -1.0, -1.0);
        let b = hyp(&mut arena, (0, 0), 8, -1.5, -1.0); // different history
        let c = hyp(&mut arena, (1, 1), 7, -1.2, -1.0); // different coverage
        level.add(&arena, a);
        level.add(&arena, b);
        level.add(&arena, c);
        assert_eq!(level.len(), 3);
    }

    #[test]
    fn threshold_pruning_drops_distant_hypotheses() {
        let mut arena = Arena::new();
        let mut level = StackLevel::new(10, 1.0);
        let best = hyp(&mut arena, (0, 0), 7, -1.0, 0.0);
        let close = hyp(&mut arena, (1, 1), 8, -1.8, 0.0);
        let far = hyp(&mut arena, (2, 2), 9, -3.0, 0.0);
        for id in [best, close, far] {
            level.add(&arena, id);
        }
        level.prune(&arena);
        assert_eq!(level.ordered(), &[best, close]);
        assert_eq!(level.stats().pruned, 1);
    }

    #[test]
    fn histogram_pruning_caps_the_level() {
        let mut arena = Arena::new();
        let mut level = StackLevel::new(2, 100.0);
        for (idx, g) in [-3.0f32, -1.0, -2.0, -4.0].iter().enumerate() {
            let id = hyp(&mut arena, (idx, idx), 7, *g, 0.0);
            level.add(&arena, id);
        }
        level.prune(&arena);
        assert_eq!(level.len(), 2);
        // Survivors are the two best, in descending priority
        let totals: Vec<Score> = level
            .ordered()
            .iter()
            .map(|&id| arena.get(id).total())
            .collect();
        assert_eq!(totals, vec![-1.0, -2.0]);
    }

    #[test]
    fn priority_ties_break_on_the_smaller_coverage() {
        let mut arena = Arena::new();
        let mut level = StackLevel::new(10, 100.0);
        let high_bits = hyp(&mut arena, (3, 3), 7, -1.0, 0.0);
        let low_bits = hyp(&mut arena, (0, 0), 7, -1.0, 0.0);
        level.add(&arena, high_bits);
        level.add(&arena, low_bits);
        level.prune(&arena);
        assert_eq!(level.ordered(), &[low_bits, high_bits]);
    }
}

//! Hypothesis state and the per-decode arena.
//!
//! A hypothesis is an immutable node in the search graph: one partial
//! translation, linked to its predecessor by an arena index. The arena
//! owns every hypothesis of one decode and is dropped wholesale when the
//! decode ends, so parent links never dangle and pruning a node from a
//! stack level cannot invalidate descendants that still point at it.

use crate::coverage::Coverage;
use crate::lm::LmHistory;
use crate::vocab::{PhraseUid, WordUid};
use crate::Score;

/// Arena index of a hypothesis.
pub type HypId = u32;

/// One partial translation; immutable after construction.
#[derive(Debug, Clone)]
pub struct Hypothesis {
    /// Predecessor in the arena; `None` for the root.
    pub parent: Option<HypId>,
    /// Target word ids emitted by the edge from the parent; empty for
    /// the root.
    pub target_words: Vec<WordUid>,
    /// Combined (source, target) uid of the emitted phrase pair, used
    /// for the from-next reordering lookup of the following expansion.
    pub st_uid: PhraseUid,
    /// Source positions translated so far.
    pub coverage: Coverage,
    /// The last covered source span; `None` for the root.
    pub span: Option<(usize, usize)>,
    /// LM context carried forward: the last N-1 emitted words.
    pub history: LmHistory,
    /// Partial score: the sum of all feature contributions so far.
    pub g: Score,
    /// Admissible estimate of the remaining cost.
    pub h: Score,
    /// The stack level this hypothesis belongs to.
    pub level: usize,
}

impl Hypothesis {
    /// Search priority: partial score plus future cost.
    pub fn total(&self) -> Score {
        self.g + self.h
    }

    /// The source position a monotone continuation would start at.
    pub fn next_src_pos(&self) -> usize {
        self.span.map(|(_, end)| end + 1).unwrap_or(0)
    }

    /// The equivalence triple for recombination.
    pub fn recomb_key(&self) -> RecombKey {
        RecombKey {
            coverage: self.coverage.clone(),
            last_end: self.span.map(|(_, end)| end),
            history: self.history.clone(),
        }
    }
}

/// Recombination equivalence: two hypotheses are interchangeable for the
/// rest of the search iff they agree on this triple. Using the full
/// triple as the map key (rather than a hash of it) makes a key hit with
/// mismatched coverage unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecombKey {
    coverage: Coverage,
    last_end: Option<usize>,
    history: LmHistory,
}

/// Owns every hypothesis of one decode; freed in bulk at decode end.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Hypothesis>,
}

impl Arena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Store a hypothesis and return its id.
    pub fn push(&mut self, hypothesis: Hypothesis) -> HypId {
        let id = self.nodes.len() as HypId;
        self.nodes.push(hypothesis);
        id
    }

    pub fn get(&self, id: HypId) -> &Hypothesis {
        &self.nodes[id as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Collect the emitted target words along the parent chain of `id`,
    /// in emission order.
    pub fn traceback_words(&self, id: HypId) -> Vec<WordUid> {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.get(current);
            if !node.target_words.is_empty() {
                segments.push(node.target_words.as_slice());
            }
            cursor = node.parent;
        }
        segments.iter().rev().flat_map(|s| s.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocab::UNKNOWN_PHRASE_ID;

    fn root(len: usize) -> Hypothesis {
        Hypothesis {
            parent: None,
            target_words: Vec::new(),
            st_uid: UNKNOWN_PHRASE_ID,
            coverage: Coverage::new(len),
            span: None,
            history: LmHistory::new(2),
            g: 0.0,
            h: -3.0,
            level: 0,
        }
    }

    fn child(parent: HypId, base: &Hypothesis, span: (usize, usize), words: Vec<WordUid>) -> Hypothesis {
        let coverage = base.coverage.with_span(span.0, span.1);
        let level = coverage.cardinality();
        let mut history = base.history.clone();
        for &word in &words {
            history.push(word);
        }
        Hypothesis {
            parent: Some(parent),
            target_words: words,
            st_uid: 77,
            coverage,
            span: Some(span),
            history,
            g: base.g - 1.0,
            h: base.h + 1.0,
            level,
        }
    }

    #[test]
    fn cardinality_grows_by_span_length() {
        let mut arena = Arena::new();
        let r = root(3);
        let r_id = arena.push(r.clone());
        let c = child(r_id, &r, (1, 2), vec![10]);
        assert_eq!(c.coverage.cardinality(), r.coverage.cardinality() + 2);
        assert_eq!(c.level, 2);
        assert_eq!(c.next_src_pos(), 3);
        assert_eq!(r.next_src_pos(), 0);
    }

    #[test]
    fn recomb_key_separates_distinct_states() {
        let r = root(3);
        let a = child(0, &r, (0, 0), vec![10]);
        let b = child(0, &r, (0, 0), vec![11]);
        let c = child(0, &r, (0, 0), vec![10]);
        assert_ne!(a.recomb_key(), b.recomb_key()); // histories differ
        assert_eq!(a.recomb_key(), c.recomb_key());
        let d = child(0, &r, (1, 1), vec![10]);
        assert_ne!(a.recomb_key(), d.recomb_key()); // coverage differs
    }

    #[test]
    fn traceback_concatenates_edges_in_order() {
        let mut arena = Arena::new();
        let r = root(2);
        let r_id = arena.push(r.clone());
        let first = child(r_id, &r, (1, 1), vec![20, 21]);
        let first_id = arena.push(first.clone());
        let second = child(first_id, &first, (0, 0), vec![22]);
        let second_id = arena.push(second);
        assert_eq!(arena.traceback_words(second_id), vec![20, 21, 22]);
        assert_eq!(arena.traceback_words(r_id), Vec::<WordUid>::new());
    }
}

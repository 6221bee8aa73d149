//! Per-sentence precomputed data.
//!
//! Built once before search: for every source span up to the maximum
//! phrase length, the applicable translation entries are materialised
//! into a triangular cell table; on top of that the future-cost table is
//! filled CKY-style, giving for every contiguous span the best
//! achievable TM + LM estimate of covering it in isolation. During
//! search the future cost of a coverage vector is the sum over its
//! maximal uncovered gaps.

use tracing::debug;

use crate::coverage::Coverage;
use crate::lm::LmQuery;
use crate::tm::{TmEntry, TmStore};
use crate::vocab::{phrase_uid, WordUid};
use crate::{Config, Score, UNKNOWN_LOG_PROB};

/// Precomputed per-sentence tables: applicable TM entries per span and
/// the admissible future-cost estimate per span.
#[derive(Debug)]
pub struct SentenceDataMap {
    dim: usize,
    cells: Vec<Option<Vec<TmEntry>>>,
    future: Vec<Score>,
}

impl SentenceDataMap {
    /// Build the tables for a source sentence given as word ids.
    pub fn build(
        source_uids: &[WordUid],
        tm: &TmStore,
        lm: &mut LmQuery<'_>,
        config: &Config,
    ) -> Self {
        let dim = source_uids.len();
        let mut map = Self {
            dim,
            cells: vec![None; dim * dim],
            future: vec![UNKNOWN_LOG_PROB; dim * dim],
        };
        if dim == 0 {
            return map;
        }

        let max_span = config.max_source_phrase_length.max(1);
        for start in 0..dim {
            for end in start..dim.min(start + max_span) {
                let uid = phrase_uid(&source_uids[start..=end]);
                let entries = match tm.lookup(uid) {
                    Some(entries) => entries,
                    // Single-word gaps must stay coverable
                    None if start == end => tm.unk_entries(),
                    None => continue,
                };
                map.cells[start * dim + end] = Some(entries.to_vec());
            }
        }

        // Base costs: the best entry of each covered span, scored with
        // the phrase in isolation
        for start in 0..dim {
            for end in start..dim {
                if let Some(entries) = &map.cells[start * dim + end] {
                    let mut best = UNKNOWN_LOG_PROB;
                    for entry in entries {
                        let estimate = entry.total + lm.phrase_estimate(&entry.words);
                        if estimate > best {
                            best = estimate;
                        }
                    }
                    map.future[start * dim + end] = best;
                }
            }
        }

        // Combine splits, shortest spans first
        for length in 2..=dim {
            for start in 0..=(dim - length) {
                let end = start + length - 1;
                let mut best = map.future[start * dim + end];
                for mid in start..end {
                    let combined = map.future[start * dim + mid] + map.future[(mid + 1) * dim + end];
                    if combined > best {
                        best = combined;
                    }
                }
                map.future[start * dim + end] = best;
            }
        }

        debug!(dim, "sentence data map built");
        map
    }

    /// Sentence length.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The TM entries applicable to the inclusive span [start..=end].
    pub fn cell(&self, start: usize, end: usize) -> Option<&[TmEntry]> {
        self.cells[start * self.dim + end].as_deref()
    }

    /// The future-cost estimate of covering exactly [start..=end].
    pub fn span_cost(&self, start: usize, end: usize) -> Score {
        self.future[start * self.dim + end]
    }

    /// The future cost of a coverage vector: the sum over its maximal
    /// uncovered spans.
    pub fn future_cost(&self, coverage: &Coverage) -> Score {
        coverage
            .uncovered_spans()
            .into_iter()
            .map(|(start, end)| self.span_cost(start, end))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lm::LmModel;
    use crate::tm::TmEntry;
    use crate::vocab::Vocabulary;

    fn toy_setup() -> (Vocabulary, LmModel, TmStore, Config) {
        let config = Config {
            max_source_phrase_length: 2,
            ..Config::default()
        };
        let mut vocab = Vocabulary::new();
        let a = vocab.add_if_absent("a");
        let b = vocab.add_if_absent("b");
        let ta = vocab.add_if_absent("A");
        let tb = vocab.add_if_absent("B");
        let tab = vocab.add_if_absent("AB");

        // Trivial LM: every query resolves through <unk> at 0.0
        let lm = LmModel::new(3, 0.0);

        let mut tm = TmStore::new(&config);
        let mk = |src: &[WordUid], tgt: WordUid, third: Score| {
            TmEntry::new(
                phrase_uid(src),
                phrase_uid(&[tgt]),
                vec![tgt],
                vec![0.0, 0.0, third],
            )
            .unwrap()
        };
        tm.insert(phrase_uid(&[a]), mk(&[a], ta, -1.0));
        tm.insert(phrase_uid(&[b]), mk(&[b], tb, -2.0));
        tm.insert(phrase_uid(&[a, b]), mk(&[a, b], tab, -2.5));
        tm.finalize();
        (vocab, lm, tm, config)
    }

    #[test]
    fn cells_hold_applicable_entries() {
        let (vocab, lm, tm, config) = toy_setup();
        let uids = vocab.ids_of(&["a", "b"]);
        let mut query = LmQuery::new(&lm, &vocab);
        let map = SentenceDataMap::build(&uids, &tm, &mut query, &config);

        assert_eq!(map.dim(), 2);
        assert_eq!(map.cell(0, 0).unwrap().len(), 1);
        assert_eq!(map.cell(1, 1).unwrap().len(), 1);
        assert_eq!(map.cell(0, 1).unwrap().len(), 1);
    }

    #[test]
    fn unknown_single_words_get_the_unk_entry() {
        let (vocab, lm, tm, config) = toy_setup();
        // "z" was never indexed: id is <unk>
        let uids = vocab.ids_of(&["a", "z"]);
        let mut query = LmQuery::new(&lm, &vocab);
        let map = SentenceDataMap::build(&uids, &tm, &mut query, &config);

        let unk_cell = map.cell(1, 1).unwrap();
        assert_eq!(unk_cell.len(), 1);
        assert_eq!(unk_cell[0].words, vec![crate::vocab::UNKNOWN_WORD_ID]);
        // The unseen two-word span has no entries
        assert!(map.cell(0, 1).is_none());
    }

    #[test]
    fn future_cost_prefers_the_best_decomposition() {
        let (vocab, lm, tm, config) = toy_setup();
        let uids = vocab.ids_of(&["a", "b"]);
        let mut query = LmQuery::new(&lm, &vocab);
        let map = SentenceDataMap::build(&uids, &tm, &mut query, &config);

        assert!((map.span_cost(0, 0) - (-1.0)).abs() < 1e-6);
        assert!((map.span_cost(1, 1) - (-2.0)).abs() < 1e-6);
        // Split a+b (-3.0) loses against the phrasal entry (-2.5)
        assert!((map.span_cost(0, 1) - (-2.5)).abs() < 1e-6);

        // Coverage future cost sums the uncovered gaps
        let empty = Coverage::new(2);
        assert!((map.future_cost(&empty) - (-2.5)).abs() < 1e-6);
        let covered_a = empty.with_span(0, 0);
        assert!((map.future_cost(&covered_a) - (-2.0)).abs() < 1e-6);
        let full = covered_a.with_span(1, 1);
        assert!((map.future_cost(&full) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn empty_sentence_builds_an_empty_map() {
        let (vocab, lm, tm, config) = toy_setup();
        let mut query = LmQuery::new(&lm, &vocab);
        let map = SentenceDataMap::build(&[], &tm, &mut query, &config);
        assert_eq!(map.dim(), 0);
        assert!((map.future_cost(&Coverage::new(0)) - 0.0).abs() < 1e-6);
    }
}

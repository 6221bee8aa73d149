//! The multi-stack decoder driver.
//!
//! One driver decodes one sentence: it owns L+2 stack levels (one per
//! coverage cardinality plus the sentence-begin and sentence-end
//! levels), the hypothesis arena, and the per-decode LM query proxy.
//! Levels are pruned and expanded in cardinality order; every expansion
//! enumerates the legal source spans under the coverage and distortion
//! constraints, scores each applicable translation entry incrementally
//! and dispatches the successor to the level matching its new
//! cardinality. After the full-coverage level, the sentence-end closure
//! appends `</s>` and the best final hypothesis yields the 1-best
//! translation by parent traceback.
//!
//! Cancellation is cooperative: the shared stop flag is polled before
//! each level, each hypothesis and each candidate entry; once raised,
//! the decoder stops producing successors and reports the empty
//! translation.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::hypothesis::{Arena, HypId, Hypothesis};
use crate::lm::LmQuery;
use crate::rm::{Orientation, RmStore};
use crate::sentence::SentenceDataMap;
use crate::stack::StackLevel;
use crate::vocab::{
    Vocabulary, WordUid, BEGIN_SENTENCE_STR, END_SENTENCE_STR, UNKNOWN_PHRASE_ID, UNKNOWN_WORD_STR,
};
use crate::{Config, Score};

/// Extra stack levels beyond one per source position: the first holds
/// the sentence-begin root, the last the sentence-end closures.
pub const NUM_EXTRA_STACK_LEVELS: usize = 2;

/// Hard cap on per-decode hypothesis creation; exceeding it aborts the
/// decode as resource exhaustion.
const MAX_ARENA_HYPOTHESES: usize = 4_000_000;

/// A decode failure. Model lookup misses and cancellation are not
/// errors; only broken invariants and resource exhaustion surface here.
#[derive(Debug)]
pub enum DecodeError {
    /// A bug-class condition: the search state violated an invariant.
    Invariant(String),
    /// The decode outgrew its resource budget.
    ResourceExhausted(String),
    /// A configured feature this decoder does not implement.
    Unsupported(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Invariant(msg) => write!(f, "decoder invariant violated: {}", msg),
            DecodeError::ResourceExhausted(msg) => write!(f, "decode resources exhausted: {}", msg),
            DecodeError::Unsupported(what) => write!(f, "unsupported decoder feature: {}", what),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Counters describing one finished (or cancelled) decode.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct DecodeStats {
    /// Hypotheses created, including recombination losers.
    pub created: usize,
    /// Hypotheses that were expanded or closed.
    pub expanded: usize,
    /// Arrivals merged into an equivalent incumbent.
    pub recombined: usize,
    /// Hypotheses discarded by pruning.
    pub pruned: usize,
}

/// The per-sentence decoder: stack levels, arena and query proxies.
pub struct MultiStack<'a> {
    params: &'a Config,
    data: &'a SentenceDataMap,
    rm: &'a RmStore,
    lm: LmQuery<'a>,
    is_stop: &'a AtomicBool,
    levels: Vec<StackLevel>,
    arena: Arena,
    num_levels: usize,
    curr_level: usize,
    begin_word: WordUid,
    end_word: WordUid,
    created: usize,
    expanded: usize,
}

impl<'a> MultiStack<'a> {
    /// Set up the levels and seed the root hypothesis: empty coverage,
    /// history `{<s>}`, zero partial score and the whole-sentence future
    /// cost.
    pub fn new(
        params: &'a Config,
        data: &'a SentenceDataMap,
        rm: &'a RmStore,
        lm: LmQuery<'a>,
        is_stop: &'a AtomicBool,
    ) -> Self {
        let num_levels = data.dim() + NUM_EXTRA_STACK_LEVELS;
        let levels = (0..num_levels)
            .map(|_| StackLevel::new(params.stack_capacity, params.pruning_threshold))
            .collect();

        let mut stack = Self {
            begin_word: lm.word_id_of(BEGIN_SENTENCE_STR),
            end_word: lm.word_id_of(END_SENTENCE_STR),
            params,
            data,
            rm,
            lm,
            is_stop,
            levels,
            arena: Arena::new(),
            num_levels,
            curr_level: 0,
            created: 0,
            expanded: 0,
        };

        let coverage = crate::coverage::Coverage::new(data.dim());
        let h = data.future_cost(&coverage);
        let mut history = stack.lm.empty_history();
        history.push(stack.begin_word);
        let root = Hypothesis {
            parent: None,
            target_words: Vec::new(),
            st_uid: UNKNOWN_PHRASE_ID,
            coverage,
            span: None,
            history,
            g: 0.0,
            h,
            level: 0,
        };
        let root_id = stack.arena.push(root);
        stack.created += 1;
        stack.levels[0].add(&stack.arena, root_id);
        stack
    }

    fn stopped(&self) -> bool {
        self.is_stop.load(Ordering::Relaxed)
    }

    /// Run the expansion loop over all levels, or until stopped.
    pub fn expand(&mut self) -> Result<(), DecodeError> {
        if self.params.is_gen_lattice {
            return Err(DecodeError::Unsupported(
                "search lattice generation (de_is_gen_lattice)",
            ));
        }
        while !self.stopped() && self.curr_level < self.num_levels {
            let level = self.curr_level;
            // All feeders of this level have expanded: prune now
            self.levels[level].prune(&self.arena);
            trace!(level, survivors = self.levels[level].len(), "expanding level");

            if level + 1 < self.num_levels {
                let ids: Vec<HypId> = self.levels[level].ordered().to_vec();
                for id in ids {
                    if self.stopped() {
                        return Ok(());
                    }
                    if level + 2 == self.num_levels {
                        self.close_sentence(id)?;
                    } else {
                        self.expand_one(id)?;
                    }
                    self.expanded += 1;
                }
            }
            self.curr_level += 1;
        }
        Ok(())
    }

    /// Expand one hypothesis: enumerate legal spans and score every
    /// applicable translation entry.
    fn expand_one(&mut self, id: HypId) -> Result<(), DecodeError> {
        let params = self.params;
        let data = self.data;
        let rm = self.rm;

        let node = self.arena.get(id);
        let coverage = node.coverage.clone();
        let span = node.span;
        let history = node.history.clone();
        let g = node.g;
        let level = node.level;
        let prev_uid = node.st_uid;
        let next_pos = node.next_src_pos();

        let dim = data.dim();
        let max_span = params.max_source_phrase_length.max(1);

        for start in 0..dim {
            if coverage.test(start) {
                continue;
            }
            let jump = (start as i64 - next_pos as i64).unsigned_abs();
            // The distortion limit is a hard constraint, applied before
            // any scoring
            if params.dist_lim >= 0 && jump > params.dist_lim as u64 {
                continue;
            }
            let dist_penalty = params.lin_dist_penalty * jump as Score;

            for end in start..dim.min(start + max_span) {
                if coverage.test(end) {
                    break;
                }
                let Some(cell) = data.cell(start, end) else {
                    continue;
                };
                let new_coverage = coverage.with_span(start, end);
                let h = data.future_cost(&new_coverage);
                let new_level = level + (end - start + 1);
                let orientation = Orientation::classify(span, (start, end));
                let from_next = rm.orientations(prev_uid).from_next(orientation);

                for entry in cell {
                    if self.stopped() {
                        return Ok(());
                    }
                    let mut lm_contrib = 0.0;
                    let mut new_history = history.clone();
                    for &word in &entry.words {
                        lm_contrib += self.lm.prob_conditional(word, &new_history);
                        new_history.push(word);
                    }
                    let rm_contrib =
                        from_next + rm.orientations(entry.st_uid).from_prev(orientation);
                    let word_penalty = params.word_penalty * entry.num_target_words() as Score;
                    let g_next = g
                        + entry.total
                        + lm_contrib
                        + rm_contrib
                        + dist_penalty
                        + word_penalty
                        + params.phrase_penalty;

                    self.submit(Hypothesis {
                        parent: Some(id),
                        target_words: entry.words.clone(),
                        st_uid: entry.st_uid,
                        coverage: new_coverage.clone(),
                        span: Some((start, end)),
                        history: new_history,
                        g: g_next,
                        h,
                        level: new_level,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Close a full-coverage hypothesis: append `</s>`, whose only cost
    /// is its LM probability given the final history.
    fn close_sentence(&mut self, id: HypId) -> Result<(), DecodeError> {
        let node = self.arena.get(id);
        if !node.coverage.is_full() {
            return Err(DecodeError::Invariant(format!(
                "closing a hypothesis with only {} of {} positions covered",
                node.coverage.cardinality(),
                node.coverage.len()
            )));
        }
        let coverage = node.coverage.clone();
        let span = node.span;
        let history = node.history.clone();
        let g = node.g;

        let end_prob = self.lm.prob_conditional(self.end_word, &history);
        let mut new_history = history;
        new_history.push(self.end_word);

        self.submit(Hypothesis {
            parent: Some(id),
            target_words: vec![self.end_word],
            st_uid: UNKNOWN_PHRASE_ID,
            coverage,
            span,
            history: new_history,
            g: g + end_prob,
            h: 0.0,
            level: self.num_levels - 1,
        })
    }

    /// Dispatch a successor to the level matching its cardinality.
    fn submit(&mut self, hypothesis: Hypothesis) -> Result<(), DecodeError> {
        if self.stopped() {
            return Ok(());
        }
        if hypothesis.level >= self.num_levels {
            return Err(DecodeError::Invariant(format!(
                "successor stack level {} is too big, the maximum allowed is {}",
                hypothesis.level,
                self.num_levels - 1
            )));
        }
        if hypothesis.level <= self.curr_level {
            return Err(DecodeError::Invariant(format!(
                "successor stack level {} does not exceed the expanding level {}",
                hypothesis.level, self.curr_level
            )));
        }
        if self.arena.len() >= MAX_ARENA_HYPOTHESES {
            return Err(DecodeError::ResourceExhausted(format!(
                "hypothesis arena reached its cap of {}",
                MAX_ARENA_HYPOTHESES
            )));
        }
        let level = hypothesis.level;
        let id = self.arena.push(hypothesis);
        self.created += 1;
        self.levels[level].add(&self.arena, id);
        Ok(())
    }

    /// The best final hypothesis, if any derivation reached the end.
    pub fn best_final(&self) -> Option<HypId> {
        self.levels[self.num_levels - 1].best(&self.arena)
    }

    /// The score of the best final hypothesis.
    pub fn best_score(&self) -> Option<Score> {
        self.best_final().map(|id| self.arena.get(id).g)
    }

    /// Extract the 1-best translation after `expand` has finished.
    ///
    /// Produces the empty string when the decode was stopped, and also
    /// when no derivation reached the final level (a dead end under the
    /// distortion limit). Calling this on an unfinished decode is an
    /// invariant violation, mirroring the driver contract.
    pub fn best_translation(&self, vocab: &Vocabulary) -> Result<String, DecodeError> {
        if self.stopped() {
            return Ok(String::new());
        }
        if self.curr_level != self.num_levels {
            return Err(DecodeError::Invariant(format!(
                "the translation was not finished, the next level to consider is {} of {}",
                self.curr_level,
                self.num_levels - 1
            )));
        }
        let Some(best) = self.best_final() else {
            debug!("no derivation reached the final level");
            return Ok(String::new());
        };
        let words = self.arena.traceback_words(best);
        let mut out = String::new();
        for word in words {
            if word == self.begin_word || word == self.end_word {
                continue;
            }
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(vocab.text(word).unwrap_or(UNKNOWN_WORD_STR));
        }
        Ok(out)
    }

    /// Counters of this decode so far.
    pub fn stats(&self) -> DecodeStats {
        let mut stats = DecodeStats {
            created: self.created,
            expanded: self.expanded,
            recombined: 0,
            pruned: 0,
        };
        for level in &self.levels {
            stats.recombined += level.stats().recombined;
            stats.pruned += level.stats().pruned;
        }
        stats
    }

    /// Number of hypotheses currently alive on a level; used by tests
    /// and diagnostics.
    pub fn level_len(&self, level: usize) -> usize {
        self.levels[level].len()
    }
}

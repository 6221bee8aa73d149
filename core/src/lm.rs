//! M-gram language model trie and query interface.
//!
//! Responsibilities:
//! - Store log10 probabilities and back-off weights layered by m-gram
//!   level: level 1 keyed by word id, middle levels by
//!   (context id, word id), the top level probability-only.
//! - Compose context ids level by level: the context id of an m-gram
//!   prefix at level m plus one word id deterministically yields the
//!   context id at level m+1, or reports absent.
//! - Answer `P(w | history)` with back-off: when the full m-gram is not
//!   stored, accumulate the back-off weight of the prefix and retry with
//!   a context shortened from the left.
//!
//! All lookups are presence-returning; a missing entry is an expected
//! outcome of the back-off chain, never a failure.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::vocab::{Vocabulary, WordUid, UNKNOWN_WORD_ID};
use crate::Score;

/// Default m-gram order of the language model.
pub const DEFAULT_LM_ORDER: usize = 5;

/// Default log10 unigram probability of `<unk>` when the model file does
/// not define one.
pub const DEFAULT_UNK_WORD_LOG_PROB: Score = -10.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ProbBackOff {
    prob: Score,
    back_off: Score,
}

/// Entry of a middle trie level; `next_ctx` is the context id this
/// m-gram contributes to the level above.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MidEntry {
    prob: Score,
    back_off: Score,
    next_ctx: u64,
}

/// Layered m-gram trie holding log10 probabilities and back-off weights.
///
/// Immutable after load; shared between decoding workers without locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmModel {
    order: usize,
    unk_log_prob: Score,
    /// Level 1: word id -> {prob, back_off}. The word id doubles as the
    /// context id for level-2 keys.
    unigrams: AHashMap<WordUid, ProbBackOff>,
    /// Levels 2..order-1: (context id, word id) -> entry.
    middles: Vec<AHashMap<(u64, WordUid), MidEntry>>,
    /// Next context id to assign, one counter per middle level.
    next_ctx: Vec<u64>,
    /// Level `order`: (context id, word id) -> prob.
    top: AHashMap<(u64, WordUid), Score>,
}

impl LmModel {
    /// Create an empty model of the given order (at least 2).
    pub fn new(order: usize, unk_log_prob: Score) -> Self {
        let order = order.max(2);
        let num_middles = order - 2;
        Self {
            order,
            unk_log_prob,
            unigrams: AHashMap::new(),
            middles: vec![AHashMap::new(); num_middles],
            next_ctx: vec![0; num_middles],
            top: AHashMap::new(),
        }
    }

    /// The m-gram order N of this model.
    pub fn order(&self) -> usize {
        self.order
    }

    /// The number of stored m-grams at the given level, for diagnostics.
    pub fn level_len(&self, level: usize) -> usize {
        match level {
            1 => self.unigrams.len(),
            m if m == self.order => self.top.len(),
            m if m >= 2 && m < self.order => self.middles[m - 2].len(),
            _ => 0,
        }
    }

    /// Insert an m-gram with its log10 probability and back-off weight.
    ///
    /// M-grams must be inserted in level order: the (m-1)-gram prefix of
    /// every entry above level 1 must already be present, as it carries
    /// the context id the new entry is keyed under.
    pub fn insert(&mut self, words: &[WordUid], prob: Score, back_off: Score) -> anyhow::Result<()> {
        let m = words.len();
        anyhow::ensure!(
            m >= 1 && m <= self.order,
            "m-gram level {} out of range 1..={}",
            m,
            self.order
        );
        let word = words[m - 1];
        if m == 1 {
            self.unigrams.insert(word, ProbBackOff { prob, back_off });
            return Ok(());
        }
        let ctx = self
            .context_id(&words[..m - 1])
            .ok_or_else(|| anyhow::anyhow!("missing {}-gram prefix for {:?}", m - 1, words))?;
        if m < self.order {
            let level = m - 2;
            let next_ctx = self.next_ctx[level];
            self.next_ctx[level] += 1;
            self.middles[level].insert(
                (ctx, word),
                MidEntry {
                    prob,
                    back_off,
                    next_ctx,
                },
            );
        } else {
            self.top.insert((ctx, word), prob);
        }
        Ok(())
    }

    /// Whether a unigram entry is stored for the given word.
    pub fn has_unigram(&self, word: WordUid) -> bool {
        self.unigrams.contains_key(&word)
    }

    /// Compose the context id of a word sequence, or report absent.
    fn context_id(&self, words: &[WordUid]) -> Option<u64> {
        let mut ctx = words[0];
        for (idx, &word) in words[1..].iter().enumerate() {
            ctx = self.middles.get(idx)?.get(&(ctx, word))?.next_ctx;
        }
        Some(ctx)
    }

    fn stored_prob(&self, words: &[WordUid]) -> Option<Score> {
        let m = words.len();
        let word = words[m - 1];
        if m == 1 {
            return self.unigrams.get(&word).map(|e| e.prob);
        }
        let ctx = self.context_id(&words[..m - 1])?;
        if m < self.order {
            self.middles[m - 2].get(&(ctx, word)).map(|e| e.prob)
        } else {
            self.top.get(&(ctx, word)).copied()
        }
    }

    fn stored_back_off(&self, words: &[WordUid]) -> Option<Score> {
        let m = words.len();
        if m >= self.order {
            // The top level carries no back-off weights
            return None;
        }
        let word = words[m - 1];
        if m == 1 {
            return self.unigrams.get(&word).map(|e| e.back_off);
        }
        let ctx = self.context_id(&words[..m - 1])?;
        self.middles[m - 2].get(&(ctx, word)).map(|e| e.back_off)
    }

    /// Log10 probability of the last word of `words` given the preceding
    /// ones, with back-off.
    ///
    /// `words` must be non-empty and at most `order` long; the query
    /// proxy truncates longer histories before calling in.
    pub fn prob(&self, words: &[WordUid]) -> Score {
        debug_assert!(!words.is_empty() && words.len() <= self.order);
        let m = words.len();
        if m == 1 {
            let word = words[0];
            if let Some(entry) = self.unigrams.get(&word) {
                return entry.prob;
            }
            // An unseen word scores as the model's <unk> entry
            if let Some(entry) = self.unigrams.get(&UNKNOWN_WORD_ID) {
                return entry.prob;
            }
            return self.unk_log_prob;
        }
        if let Some(prob) = self.stored_prob(words) {
            return prob;
        }
        let back_off = self.stored_back_off(&words[..m - 1]).unwrap_or(0.0);
        back_off + self.prob(&words[1..])
    }

    /// Save the model to the given path using bincode.
    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        Ok(())
    }

    /// Load the model from a bincode file.
    pub fn load_bincode<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let model: Self = bincode::deserialize_from(reader)?;
        Ok(model)
    }
}

/// The target-word context a hypothesis carries: the last (order − 1)
/// emitted word ids, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LmHistory {
    max_len: usize,
    words: Vec<WordUid>,
}

impl LmHistory {
    /// An empty history bounded to `max_len` words.
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            words: Vec::with_capacity(max_len),
        }
    }

    /// Append a word, discarding the oldest when the bound is reached.
    pub fn push(&mut self, word: WordUid) {
        if self.max_len == 0 {
            return;
        }
        if self.words.len() == self.max_len {
            self.words.remove(0);
        }
        self.words.push(word);
    }

    /// The stored word ids, oldest first.
    pub fn words(&self) -> &[WordUid] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Per-decode language model query proxy.
///
/// Carries the scratch buffer for conditional queries; confined to the
/// single thread of control of one decode.
#[derive(Debug)]
pub struct LmQuery<'a> {
    model: &'a LmModel,
    vocab: &'a Vocabulary,
    buf: Vec<WordUid>,
}

impl<'a> LmQuery<'a> {
    pub fn new(model: &'a LmModel, vocab: &'a Vocabulary) -> Self {
        Self {
            model,
            vocab,
            buf: Vec::with_capacity(model.order()),
        }
    }

    /// The m-gram order of the underlying model.
    pub fn order(&self) -> usize {
        self.model.order()
    }

    /// An empty history sized for this model.
    pub fn empty_history(&self) -> LmHistory {
        LmHistory::new(self.model.order() - 1)
    }

    /// Word id lookup; unseen words map to the unknown id.
    pub fn word_id_of(&self, text: &str) -> WordUid {
        self.vocab.get(text)
    }

    /// Log10 `P(word | history)` with back-off.
    pub fn prob_conditional(&mut self, word: WordUid, history: &LmHistory) -> Score {
        self.buf.clear();
        self.buf.extend_from_slice(history.words());
        self.buf.push(word);
        let start = self.buf.len().saturating_sub(self.model.order());
        self.model.prob(&self.buf[start..])
    }

    /// Log10 probability of a phrase scored in isolation: each word is
    /// conditioned only on the phrase-internal words before it. Used by
    /// the future-cost estimate.
    pub fn phrase_estimate(&mut self, words: &[WordUid]) -> Score {
        let mut history = self.empty_history();
        let mut total = 0.0;
        for &word in words {
            total += self.prob_conditional(word, &history);
            history.push(word);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_entries() -> LmModel {
        // A tiny trigram model over word ids 2 (<s>), 4 (a), 5 (b)
        let mut lm = LmModel::new(3, DEFAULT_UNK_WORD_LOG_PROB);
        lm.insert(&[2], -99.0, -0.5).unwrap();
        lm.insert(&[4], -1.0, -0.4).unwrap();
        lm.insert(&[5], -1.2, 0.0).unwrap();
        lm.insert(&[2, 4], -0.3, -0.2).unwrap();
        lm.insert(&[4, 5], -0.6, 0.0).unwrap();
        lm.insert(&[2, 4, 5], -0.1, 0.0).unwrap();
        lm
    }

    #[test]
    fn full_context_hit_returns_stored_prob() {
        let lm = model_with_entries();
        assert!((lm.prob(&[2, 4, 5]) - (-0.1)).abs() < 1e-6);
        assert!((lm.prob(&[2, 4]) - (-0.3)).abs() < 1e-6);
        assert!((lm.prob(&[4]) - (-1.0)).abs() < 1e-6);
    }

    #[test]
    fn back_off_accumulates_prefix_weight() {
        let lm = model_with_entries();
        // (4, 5, 4) is absent; back off over the (4, 5) prefix weight
        // (0.0) onto P(4 | 5), which is absent too, backing off over the
        // unigram weight of 5 (0.0) onto P(4) = -1.0.
        assert!((lm.prob(&[4, 5, 4]) - (-1.0)).abs() < 1e-6);
        // (2, 5) is absent; bow(2) = -0.5 plus P(5) = -1.2
        assert!((lm.prob(&[2, 5]) - (-1.7)).abs() < 1e-6);
    }

    #[test]
    fn unknown_words_fall_back_to_unk() {
        let mut lm = model_with_entries();
        // No <unk> unigram stored: the configured default applies
        assert!((lm.prob(&[77]) - DEFAULT_UNK_WORD_LOG_PROB).abs() < 1e-6);
        lm.insert(&[UNKNOWN_WORD_ID], -7.0, 0.0).unwrap();
        assert!((lm.prob(&[77]) - (-7.0)).abs() < 1e-6);
    }

    #[test]
    fn insert_without_prefix_is_rejected() {
        let mut lm = LmModel::new(3, DEFAULT_UNK_WORD_LOG_PROB);
        lm.insert(&[4], -1.0, 0.0).unwrap();
        // (5, 4) needs no composed context (level 2 keys off the raw
        // word id), but (5, 4, 4) needs the (5, 4) entry first
        lm.insert(&[5, 4, 4], -0.5, 0.0).unwrap_err();
    }

    #[test]
    fn history_is_bounded() {
        let mut history = LmHistory::new(2);
        history.push(4);
        history.push(5);
        history.push(6);
        assert_eq!(history.words(), &[5, 6]);
    }

    #[test]
    fn query_truncates_long_history() {
        let lm = model_with_entries();
        let vocab = Vocabulary::new();
        let mut query = LmQuery::new(&lm, &vocab);
        let mut history = LmHistory::new(4);
        for word in [9, 9, 2, 4] {
            history.push(word);
        }
        // Only the last order-1 = 2 words of context may be used
        assert!((query.prob_conditional(5, &history) - (-0.1)).abs() < 1e-6);
    }

    #[test]
    fn phrase_estimate_sums_internal_conditionals() {
        let lm = model_with_entries();
        let vocab = Vocabulary::new();
        let mut query = LmQuery::new(&lm, &vocab);
        // P(4) + P(5 | 4) = -1.0 + -0.6
        assert!((query.phrase_estimate(&[4, 5]) - (-1.6)).abs() < 1e-6);
    }

    #[test]
    fn bincode_round_trip() {
        let lm = model_with_entries();
        let path = std::env::temp_dir().join(format!("lm-rt-{}.bin", std::process::id()));
        lm.save_bincode(&path).unwrap();
        let back = LmModel::load_bincode(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.order(), 3);
        assert!((back.prob(&[2, 4, 5]) - (-0.1)).abs() < 1e-6);
    }
}

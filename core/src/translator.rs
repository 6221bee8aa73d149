//! Per-worker translation facade.
//!
//! Wires a `Model` into the decode pipeline: normalize the input, check
//! the sentence cache, tokenize on whitespace, build the per-sentence
//! data map, run the multi-stack driver and render the 1-best
//! translation. The model is shared between workers; the facade itself
//! (with its cache and counters) belongs to a single worker thread.

use lru::LruCache;
use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::sync::atomic::AtomicBool;

use tracing::debug;

use crate::decoder::{DecodeError, DecodeStats, MultiStack};
use crate::lm::LmQuery;
use crate::sentence::SentenceDataMap;
use crate::{utils, Model, Score};

/// The result of one decode, with the score of the winning derivation
/// and the search counters.
#[derive(Debug, Clone)]
pub struct DecodeOutcome {
    pub translation: String,
    /// Log10 score of the winning derivation; `None` when the decode
    /// was stopped or found no derivation.
    pub score: Option<Score>,
    pub stats: DecodeStats,
}

/// Sentence-in, translation-out facade around a shared `Model`.
pub struct Translator {
    model: Model,
    cache: RefCell<LruCache<String, String>>,
    cache_hits: RefCell<usize>,
    cache_misses: RefCell<usize>,
}

impl Translator {
    pub fn new(model: Model) -> Self {
        let capacity = NonZeroUsize::new(model.config.translation_cache_size)
            .unwrap_or(NonZeroUsize::new(1000).unwrap());
        Self {
            model,
            cache: RefCell::new(LruCache::new(capacity)),
            cache_hits: RefCell::new(0),
            cache_misses: RefCell::new(0),
        }
    }

    /// Translate one sentence of text.
    ///
    /// The input is NFC-normalized, trimmed and split on whitespace;
    /// empty input short-circuits to the empty string. Results are
    /// cached per sentence; a stopped decode returns the empty string
    /// and is not cached.
    pub fn translate(&self, input: &str, is_stop: &AtomicBool) -> Result<String, DecodeError> {
        let text = utils::normalize(input);
        if text.is_empty() {
            return Ok(String::new());
        }
        if let Some(cached) = self.cache.borrow_mut().get(&text) {
            *self.cache_hits.borrow_mut() += 1;
            return Ok(cached.clone());
        }
        *self.cache_misses.borrow_mut() += 1;

        let tokens: Vec<&str> = text.split_whitespace().collect();
        let outcome = self.decode_with_stats(&tokens, is_stop)?;
        if !is_stop.load(std::sync::atomic::Ordering::Relaxed) {
            self.cache
                .borrow_mut()
                .put(text, outcome.translation.clone());
        }
        Ok(outcome.translation)
    }

    /// Decode a tokenized sentence to its 1-best translation.
    ///
    /// The empty string is returned iff the input is empty, the stop
    /// flag was raised, or no derivation survives the distortion limit.
    pub fn decode(&self, tokens: &[&str], is_stop: &AtomicBool) -> Result<String, DecodeError> {
        Ok(self.decode_with_stats(tokens, is_stop)?.translation)
    }

    /// Decode and report the winning score and search counters.
    pub fn decode_with_stats(
        &self,
        tokens: &[&str],
        is_stop: &AtomicBool,
    ) -> Result<DecodeOutcome, DecodeError> {
        if tokens.is_empty() {
            return Ok(DecodeOutcome {
                translation: String::new(),
                score: None,
                stats: DecodeStats::default(),
            });
        }

        let uids = self.model.vocab.ids_of(tokens);
        let mut map_query = LmQuery::new(&self.model.lm, &self.model.vocab);
        let data = SentenceDataMap::build(&uids, &self.model.tm, &mut map_query, &self.model.config);

        let lm_query = LmQuery::new(&self.model.lm, &self.model.vocab);
        let mut stack = MultiStack::new(
            &self.model.config,
            &data,
            &self.model.rm,
            lm_query,
            is_stop,
        );
        stack.expand()?;
        let translation = stack.best_translation(&self.model.vocab)?;
        let score = if is_stop.load(std::sync::atomic::Ordering::Relaxed) {
            None
        } else {
            stack.best_score()
        };
        let stats = stack.stats();
        debug!(
            len = tokens.len(),
            created = stats.created,
            pruned = stats.pruned,
            "decode finished"
        );
        Ok(DecodeOutcome {
            translation,
            score,
            stats,
        })
    }

    /// Cache statistics: (hits, misses).
    pub fn cache_stats(&self) -> (usize, usize) {
        (*self.cache_hits.borrow(), *self.cache_misses.borrow())
    }

    /// Clear the sentence cache and its counters.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
        *self.cache_hits.borrow_mut() = 0;
        *self.cache_misses.borrow_mut() = 0;
    }

    /// The shared model this facade decodes with.
    pub fn model(&self) -> &Model {
        &self.model
    }
}

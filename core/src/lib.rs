//! libsmt-core
//!
//! Model stores, m-gram language model and multi-stack decoder for
//! phrase-based statistical machine translation.
//!
//! This crate provides the immutable model stores (translation model,
//! lexicalised reordering model, m-gram language model, word index) and the
//! beam-search decoder that combines them into a log-linear translation
//! score. Model stores are loaded once at startup and shared by any number
//! of decoding workers; every decode owns its own sentence data, hypothesis
//! arena and query proxies.
//!
//! Public API:
//! - `Vocabulary` - word string -> id index plus phrase uid derivation
//! - `LmModel` / `LmQuery` - layered m-gram trie with back-off queries
//! - `TmStore` - source phrase -> scored target phrase entries
//! - `RmStore` - phrase pair -> lexicalised reordering weights
//! - `Translator` - per-process facade: normalize, decode, cache
//! - `Config` - decoder parameters and feature weights

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod vocab;
pub use vocab::{PhraseUid, Vocabulary, WordUid};

pub mod lm;
pub use lm::{LmHistory, LmModel, LmQuery};

pub mod arpa;

pub mod tm;
pub use tm::{TmEntry, TmStore};

pub mod rm;
pub use rm::{Orientation, RmEntry, RmStore};

pub mod coverage;
pub use coverage::Coverage;

pub mod sentence;
pub use sentence::SentenceDataMap;

pub mod hypothesis;
pub use hypothesis::{Arena, Hypothesis, RecombKey};

pub mod stack;
pub use stack::StackLevel;

pub mod decoder;
pub use decoder::{DecodeError, DecodeStats, MultiStack};

pub mod translator;
pub use translator::Translator;

/// The type used for log10 probabilities, back-off and feature weights.
pub type Score = f32;

/// Log10 probability reported when a value is not known at all.
pub const UNKNOWN_LOG_PROB: Score = -1000.0;

/// The zero-like log10 probability; stored values at or below this are
/// treated as "probability zero" rather than a real estimate.
pub const ZERO_LOG_PROB: Score = -100.0;

/// Decoder parameters and log-linear feature weights.
///
/// Field names map 1:1 onto the configuration keys of the decoder
/// (`de_*`, `tm_*`, `rm_*`, `lm_*`); the serde renames carry the on-disk
/// key names so a TOML config file uses the canonical spelling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of best translations reported. Only 1 is supported; the
    /// decoder returns the single best derivation.
    #[serde(rename = "de_num_best_trans")]
    pub num_best_trans: usize,
    /// Threshold-pruning gap in log10: a hypothesis whose priority falls
    /// below `best - pruning_threshold` is dropped from its level.
    #[serde(rename = "de_pruning_threshold")]
    pub pruning_threshold: Score,
    /// Histogram-pruning cap: maximum surviving hypotheses per level.
    #[serde(rename = "de_stack_capacity")]
    pub stack_capacity: usize,
    /// Maximum source span length considered for one phrase.
    #[serde(rename = "de_max_source_phrase_length")]
    pub max_source_phrase_length: usize,
    /// Maximum number of target words accepted in one phrase-table entry.
    #[serde(rename = "de_max_target_phrase_length")]
    pub max_target_phrase_length: usize,
    /// Retain recombined losers for lattice output. Parsed for
    /// compatibility; decoding rejects it as unsupported.
    #[serde(rename = "de_is_gen_lattice")]
    pub is_gen_lattice: bool,
    /// Hard distortion limit on the source jump `|s - (prev_end + 1)|`.
    /// Negative means unlimited.
    #[serde(rename = "rm_dist_lim")]
    pub dist_lim: i32,
    /// Linear distortion penalty in log10 per source position jumped.
    #[serde(rename = "rm_lin_dist_penalty")]
    pub lin_dist_penalty: Score,
    /// Per-target-word penalty in log10.
    #[serde(rename = "tm_word_penalty")]
    pub word_penalty: Score,
    /// Per-phrase penalty in log10.
    #[serde(rename = "tm_phrase_penalty")]
    pub phrase_penalty: Score,
    /// Maximum target entries kept per source phrase.
    #[serde(rename = "tm_trans_lim")]
    pub trans_lim: usize,
    /// Minimum raw p(e|f) a phrase-table line must have to be loaded.
    #[serde(rename = "tm_min_trans_prob")]
    pub min_trans_prob: Score,
    /// Log-linear weights multiplied onto the TM features at load.
    #[serde(rename = "tm_feature_weights")]
    pub tm_feature_weights: Vec<Score>,
    /// Raw (probability domain) features of the UNK->UNK entry; weighted
    /// and summed like a regular phrase-table line.
    #[serde(rename = "tm_unk_features")]
    pub tm_unk_features: Vec<Score>,
    /// Log-linear weights multiplied onto the RM features at load.
    #[serde(rename = "rm_feature_weights")]
    pub rm_feature_weights: Vec<Score>,
    /// Log-linear weight(s) multiplied onto LM probabilities at load.
    /// The language model carries a single feature.
    #[serde(rename = "lm_feature_weights")]
    pub lm_feature_weights: Vec<Score>,
    /// Log10 unigram probability assumed for `<unk>` when the language
    /// model file does not define one.
    #[serde(rename = "lm_unk_word_log_prob")]
    pub lm_unk_word_log_prob: Score,
    /// The m-gram order the language model is built with.
    #[serde(rename = "lm_order")]
    pub lm_order: usize,
    /// Capacity of the sentence -> translation cache in the facade.
    pub translation_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Only the single best derivation is reported
            num_best_trans: 1,
            // Beam gap of three orders of magnitude
            pruning_threshold: 3.0,
            stack_capacity: 100,
            max_source_phrase_length: 7,
            max_target_phrase_length: 7,
            is_gen_lattice: false,
            // Moses-style default reordering window
            dist_lim: 5,
            lin_dist_penalty: -0.5,
            // Penalties are neutral unless tuned
            word_penalty: 0.0,
            phrase_penalty: 0.0,
            trans_lim: 30,
            min_trans_prob: 1e-20,
            tm_feature_weights: vec![1.0; tm::TM_MAX_NUM_FEATURES],
            // A barely-possible translation pair: tiny p(f|e)/p(e|f),
            // neutral lexical weights
            tm_unk_features: vec![1e-10, 1.0, 1e-10, 1.0],
            rm_feature_weights: vec![1.0; rm::NUM_RM_FEATURES],
            lm_feature_weights: vec![1.0],
            lm_unk_word_log_prob: lm::DEFAULT_UNK_WORD_LOG_PROB,
            lm_order: lm::DEFAULT_LM_ORDER,
            translation_cache_size: 1000,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Utility helpers.
pub mod utils {
    /// Normalize input strings (NFC) and trim whitespace.
    pub fn normalize(s: &str) -> String {
        use unicode_normalization::UnicodeNormalization;
        s.nfc().collect::<String>().trim().to_string()
    }
}

/// High-level model combining the word index and the three model stores.
///
/// All stores are immutable after load and shared between decoding workers
/// without locking; `Model` is cheap to clone.
#[derive(Debug, Clone)]
pub struct Model {
    pub vocab: Arc<Vocabulary>,
    pub lm: Arc<LmModel>,
    pub tm: Arc<TmStore>,
    pub rm: Arc<RmStore>,
    pub config: Config,
}

impl Model {
    /// Bundle loaded stores into a model.
    pub fn new(
        vocab: Vocabulary,
        lm: LmModel,
        tm: TmStore,
        rm: RmStore,
        config: Config,
    ) -> Self {
        Self {
            vocab: Arc::new(vocab),
            lm: Arc::new(lm),
            tm: Arc::new(tm),
            rm: Arc::new(rm),
            config,
        }
    }
}

//! Translation model store.
//!
//! For each source phrase uid the store holds a bounded list of target
//! entries: the target word ids, the log10 feature values (already
//! multiplied by their log-linear weights at load) and the precomputed
//! feature total. Lookups for unknown source phrases resolve to the
//! single UNK entry built from configuration.
//!
//! Two storage layers back the lookups, the in-memory map taking
//! precedence: a plain map filled by the text reader (or by tests), and
//! the frozen artifact pair of an fst index over big-endian uid keys plus
//! a bincode payload vector.

use ahash::AHashMap;
use fst::Map;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::vocab::{
    combine_phrase_uids, phrase_uid, PhraseUid, Vocabulary, WordUid, UNKNOWN_PHRASE_ID,
    UNKNOWN_WORD_ID,
};
use crate::{Config, Score, ZERO_LOG_PROB};

/// Maximum number of features a phrase-table entry may carry.
pub const TM_MAX_NUM_FEATURES: usize = 4;
/// Minimum number of features: index 2 must exist, it is p(e|f).
pub const TM_MIN_NUM_FEATURES: usize = 3;

/// The unknown source phrase marker in model files.
pub const TM_UNKNOWN_SOURCE_STR: &str = "UNK";

/// One target-phrase option for a source phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmEntry {
    /// Combined uid of the (source, target) phrase pair; the reordering
    /// model key.
    pub st_uid: PhraseUid,
    /// Uid of the target phrase alone.
    pub tgt_uid: PhraseUid,
    /// Target word ids in emission order.
    pub words: Vec<WordUid>,
    /// Weighted log10 features, at most `TM_MAX_NUM_FEATURES`.
    pub features: Vec<Score>,
    /// Sum of the weighted features.
    pub total: Score,
    /// The weighted log10 p(e|f), pinned as feature index 2.
    pub t_cond_s: Score,
}

impl TmEntry {
    /// Build an entry from weighted log10 features.
    pub fn new(
        source_uid: PhraseUid,
        target_uid: PhraseUid,
        words: Vec<WordUid>,
        features: Vec<Score>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            features.len() <= TM_MAX_NUM_FEATURES,
            "the number of features {} exceeds the maximum {}",
            features.len(),
            TM_MAX_NUM_FEATURES
        );
        anyhow::ensure!(
            features.len() >= TM_MIN_NUM_FEATURES,
            "there must be at least {} features, p(e|f) is not known",
            TM_MIN_NUM_FEATURES
        );
        let total = features.iter().sum();
        let t_cond_s = features[2];
        Ok(Self {
            st_uid: combine_phrase_uids(source_uid, target_uid),
            tgt_uid: target_uid,
            words,
            features,
            total,
            t_cond_s,
        })
    }

    /// The UNK->UNK entry with the configured raw features.
    pub fn unknown(config: &Config) -> Self {
        // Pad short feature lists with the neutral probability so a thin
        // configuration cannot make the fallback entry unconstructible
        let mut raw = config.tm_unk_features.clone();
        while raw.len() < TM_MIN_NUM_FEATURES {
            raw.push(1.0);
        }
        let features = weighted_features(&raw, &config.tm_feature_weights);
        Self::new(
            UNKNOWN_PHRASE_ID,
            UNKNOWN_PHRASE_ID,
            vec![UNKNOWN_WORD_ID],
            features,
        )
        .expect("padded unk features are within bounds")
    }

    /// Number of target words this entry emits.
    pub fn num_target_words(&self) -> usize {
        self.words.len()
    }
}

/// Convert raw probability-domain features to weighted log10 values.
fn weighted_features(raw: &[Score], weights: &[Score]) -> Vec<Score> {
    raw.iter()
        .take(TM_MAX_NUM_FEATURES)
        .enumerate()
        .map(|(idx, &value)| {
            let weight = weights.get(idx).copied().unwrap_or(1.0);
            if value <= 0.0 {
                ZERO_LOG_PROB
            } else {
                value.log10() * weight
            }
        })
        .collect()
}

/// Source phrase uid -> bounded, total-sorted target entry lists.
#[derive(Debug)]
pub struct TmStore {
    mem: AHashMap<PhraseUid, Vec<TmEntry>>,
    fst_map: Option<Map<Vec<u8>>>,
    payloads: Option<Vec<Vec<TmEntry>>>,
    unk: Vec<TmEntry>,
    trans_lim: usize,
}

impl TmStore {
    /// An empty store with the UNK entry taken from configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            mem: AHashMap::new(),
            fst_map: None,
            payloads: None,
            unk: vec![TmEntry::unknown(config)],
            trans_lim: config.trans_lim.max(1),
        }
    }

    /// Add an entry for a source phrase. Call `finalize` once all
    /// entries are in.
    pub fn insert(&mut self, source_uid: PhraseUid, entry: TmEntry) {
        self.mem.entry(source_uid).or_default().push(entry);
    }

    /// Sort every entry list by descending total and truncate it to the
    /// translation limit.
    pub fn finalize(&mut self) {
        for entries in self.mem.values_mut() {
            entries.sort_by(|a, b| {
                b.total
                    .partial_cmp(&a.total)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.tgt_uid.cmp(&b.tgt_uid))
            });
            entries.truncate(self.trans_lim);
        }
    }

    /// Entries for a known source phrase, best first; `None` when the
    /// store has never seen the phrase.
    pub fn lookup(&self, source_uid: PhraseUid) -> Option<&[TmEntry]> {
        if let Some(entries) = self.mem.get(&source_uid) {
            return Some(entries.as_slice());
        }
        if let (Some(map), Some(payloads)) = (&self.fst_map, &self.payloads) {
            if let Some(idx) = map.get(source_uid.to_be_bytes()) {
                return payloads.get(idx as usize).map(|v| v.as_slice());
            }
        }
        None
    }

    /// Entries for a source phrase; unknown phrases yield the UNK entry.
    pub fn entries_for(&self, source_uid: PhraseUid) -> &[TmEntry] {
        self.lookup(source_uid).unwrap_or(&self.unk)
    }

    /// The UNK->UNK fallback entry list.
    pub fn unk_entries(&self) -> &[TmEntry] {
        &self.unk
    }

    /// Number of distinct source phrases.
    pub fn num_sources(&self) -> usize {
        self.mem.len() + self.payloads.as_ref().map_or(0, |p| p.len())
    }

    /// Freeze the in-memory map into the fst + bincode artifact pair.
    pub fn save_artifacts<P: AsRef<Path>>(&self, fst_path: P, bin_path: P) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.payloads.is_none(),
            "saving an artifact-backed store is not supported"
        );
        let mut keys: Vec<PhraseUid> = self.mem.keys().copied().collect();
        keys.sort_unstable();

        let mut builder = fst::MapBuilder::new(Vec::new())?;
        let mut payloads: Vec<&Vec<TmEntry>> = Vec::with_capacity(keys.len());
        for (idx, key) in keys.iter().enumerate() {
            builder.insert(key.to_be_bytes(), idx as u64)?;
            payloads.push(&self.mem[key]);
        }
        File::create(fst_path)?.write_all(&builder.into_inner()?)?;
        let bytes = bincode::serialize(&payloads)?;
        File::create(bin_path)?.write_all(&bytes)?;
        Ok(())
    }

    /// Load a store from the fst + bincode artifact pair.
    pub fn load_artifacts<P: AsRef<Path>>(
        fst_path: P,
        bin_path: P,
        config: &Config,
    ) -> anyhow::Result<Self> {
        let mut buf = Vec::new();
        File::open(fst_path)?.read_to_end(&mut buf)?;
        let map = Map::new(buf)?;

        let mut buf = Vec::new();
        File::open(bin_path)?.read_to_end(&mut buf)?;
        let payloads: Vec<Vec<TmEntry>> = bincode::deserialize(&buf)?;

        Ok(Self {
            mem: AHashMap::new(),
            fst_map: Some(map),
            payloads: Some(payloads),
            unk: vec![TmEntry::unknown(config)],
            trans_lim: config.trans_lim.max(1),
        })
    }
}

/// Read a Moses-style phrase table: `src ||| tgt ||| f1 f2 f3 [f4]` with
/// raw probabilities, one pair per line.
///
/// Applies the `tm_min_trans_prob` floor on the raw p(e|f), converts the
/// surviving features to weighted log10 and registers every word in the
/// vocabulary.
pub fn read_phrase_table<R: BufRead>(
    reader: R,
    config: &Config,
    vocab: &mut Vocabulary,
) -> anyhow::Result<TmStore> {
    let mut store = TmStore::new(config);
    let mut dropped = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split("|||");
        let (source, target, feats) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(t), Some(f)) => (s.trim(), t.trim(), f.trim()),
            _ => anyhow::bail!("malformed phrase-table line {}", line_no + 1),
        };

        let raw: Vec<Score> = feats
            .split_whitespace()
            .map(|t| t.parse::<Score>())
            .collect::<Result<_, _>>()
            .map_err(|e| anyhow::anyhow!("bad feature at line {}: {}", line_no + 1, e))?;
        anyhow::ensure!(
            raw.len() >= TM_MIN_NUM_FEATURES,
            "line {} carries {} features, at least {} required",
            line_no + 1,
            raw.len(),
            TM_MIN_NUM_FEATURES
        );
        if raw[2] < config.min_trans_prob {
            dropped += 1;
            continue;
        }

        let target_tokens: Vec<&str> = target.split_whitespace().collect();
        if target_tokens.len() > config.max_target_phrase_length {
            dropped += 1;
            continue;
        }

        let source_ids: Vec<WordUid> = source
            .split_whitespace()
            .map(|t| vocab.add_if_absent(t))
            .collect();
        let target_ids: Vec<WordUid> = target_tokens
            .iter()
            .map(|t| vocab.add_if_absent(t))
            .collect();

        let source_uid = if source == TM_UNKNOWN_SOURCE_STR {
            UNKNOWN_PHRASE_ID
        } else {
            phrase_uid(&source_ids)
        };
        let features = weighted_features(&raw, &config.tm_feature_weights);
        let entry = TmEntry::new(source_uid, phrase_uid(&target_ids), target_ids, features)?;
        if source_uid == UNKNOWN_PHRASE_ID {
            store.unk = vec![entry];
        } else {
            store.insert(source_uid, entry);
        }
    }

    store.finalize();
    if dropped > 0 {
        warn!(dropped, "phrase-table lines below limits were dropped");
    }
    debug!(sources = store.num_sources(), "phrase table loaded");
    Ok(store)
}

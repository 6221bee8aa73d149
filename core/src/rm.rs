//! Lexicalised reordering model store.
//!
//! For each (source, target) phrase pair the store keeps six weighted
//! log10 features: the monotone / swap / discontinuous orientations, each
//! scored from-previous and from-next. Missing pairs resolve to the
//! UNK/UNK entry. The orientation of a transition is classified purely
//! from the two adjacent source spans.

use ahash::AHashMap;
use fst::Map;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::vocab::{combine_phrase_uids, phrase_uid, PhraseUid, Vocabulary};
use crate::{Config, Score, ZERO_LOG_PROB};

/// Number of reordering features: msd-bidirectional.
pub const NUM_RM_FEATURES: usize = 6;

/// The unknown phrase marker in reordering model files.
pub const RM_UNKNOWN_PHRASE_STR: &str = "UNK";

/// Reordering orientation of a phrase-pair transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Monotone = 0,
    Swap = 1,
    Discontinuous = 2,
}

impl Orientation {
    /// Classify the transition from the previously covered source span
    /// to the newly covered one. The root hypothesis has no previous
    /// span; its notional predecessor ends just before position 0.
    pub fn classify(prev: Option<(usize, usize)>, next: (usize, usize)) -> Self {
        let prev_end_next = prev.map(|(_, end)| end + 1).unwrap_or(0);
        if next.0 == prev_end_next {
            Orientation::Monotone
        } else if prev.map_or(false, |(start, _)| next.1 + 1 == start) {
            Orientation::Swap
        } else {
            Orientation::Discontinuous
        }
    }
}

/// Six weighted log10 orientation features of one phrase pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RmEntry {
    weights: [Score; NUM_RM_FEATURES],
}

impl RmEntry {
    pub fn new(weights: [Score; NUM_RM_FEATURES]) -> Self {
        Self { weights }
    }

    /// The neutral entry: no reordering preference at all.
    pub fn neutral() -> Self {
        Self {
            weights: [0.0; NUM_RM_FEATURES],
        }
    }

    /// The from-previous feature for an orientation.
    pub fn from_prev(&self, orientation: Orientation) -> Score {
        self.weights[orientation as usize]
    }

    /// The from-next feature for an orientation.
    pub fn from_next(&self, orientation: Orientation) -> Score {
        self.weights[NUM_RM_FEATURES / 2 + orientation as usize]
    }

    /// All six features in storage order.
    pub fn weights(&self) -> &[Score; NUM_RM_FEATURES] {
        &self.weights
    }
}

/// Phrase-pair uid -> orientation features, with a default for misses.
#[derive(Debug)]
pub struct RmStore {
    mem: AHashMap<PhraseUid, RmEntry>,
    fst_map: Option<Map<Vec<u8>>>,
    payloads: Option<Vec<RmEntry>>,
    unk: RmEntry,
}

impl RmStore {
    /// An empty store whose misses resolve to the neutral entry.
    pub fn new() -> Self {
        Self {
            mem: AHashMap::new(),
            fst_map: None,
            payloads: None,
            unk: RmEntry::neutral(),
        }
    }

    /// Register the entry for a phrase pair uid.
    pub fn insert(&mut self, st_uid: PhraseUid, entry: RmEntry) {
        self.mem.insert(st_uid, entry);
    }

    /// Replace the default entry used for missing pairs.
    pub fn set_unk(&mut self, entry: RmEntry) {
        self.unk = entry;
    }

    /// Orientation features of a phrase pair by its combined uid;
    /// missing pairs resolve to the default entry.
    pub fn orientations(&self, st_uid: PhraseUid) -> &RmEntry {
        if let Some(entry) = self.mem.get(&st_uid) {
            return entry;
        }
        if let (Some(map), Some(payloads)) = (&self.fst_map, &self.payloads) {
            if let Some(idx) = map.get(st_uid.to_be_bytes()) {
                if let Some(entry) = payloads.get(idx as usize) {
                    return entry;
                }
            }
        }
        &self.unk
    }

    /// Orientation features of a (source uid, target uid) pair.
    pub fn orientations_of(&self, source_uid: PhraseUid, target_uid: PhraseUid) -> &RmEntry {
        self.orientations(combine_phrase_uids(source_uid, target_uid))
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.mem.len() + self.payloads.as_ref().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
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
        let mut payloads: Vec<RmEntry> = Vec::with_capacity(keys.len() + 1);
        for (idx, key) in keys.iter().enumerate() {
            builder.insert(key.to_be_bytes(), idx as u64)?;
            payloads.push(self.mem[key]);
        }
        File::create(fst_path)?.write_all(&builder.into_inner()?)?;
        let bytes = bincode::serialize(&(payloads, self.unk))?;
        File::create(bin_path)?.write_all(&bytes)?;
        Ok(())
    }

    /// Load a store from the fst + bincode artifact pair.
    pub fn load_artifacts<P: AsRef<Path>>(fst_path: P, bin_path: P) -> anyhow::Result<Self> {
        let mut buf = Vec::new();
        File::open(fst_path)?.read_to_end(&mut buf)?;
        let map = Map::new(buf)?;

        let mut buf = Vec::new();
        File::open(bin_path)?.read_to_end(&mut buf)?;
        let (payloads, unk): (Vec<RmEntry>, RmEntry) = bincode::deserialize(&buf)?;

        Ok(Self {
            mem: AHashMap::new(),
            fst_map: Some(map),
            payloads: Some(payloads),
            unk,
        })
    }
}

impl Default for RmStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a Moses-style lexicalised reordering table:
/// `src ||| tgt ||| m s d m' s' d'` with raw probabilities.
///
/// Each value is converted to log10 and multiplied by its log-linear
/// weight in the same pass. The `UNK ||| UNK` line, when present, becomes
/// the default entry for missing pairs.
pub fn read_reordering_table<R: BufRead>(
    reader: R,
    config: &Config,
    vocab: &mut Vocabulary,
) -> anyhow::Result<RmStore> {
    let mut store = RmStore::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut parts = line.split("|||");
        let (source, target, feats) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(t), Some(f)) => (s.trim(), t.trim(), f.trim()),
            _ => anyhow::bail!("malformed reordering line {}", line_no + 1),
        };

        let raw: Vec<Score> = feats
            .split_whitespace()
            .map(|t| t.parse::<Score>())
            .collect::<Result<_, _>>()
            .map_err(|e| anyhow::anyhow!("bad weight at line {}: {}", line_no + 1, e))?;
        if raw.len() != NUM_RM_FEATURES {
            warn!(line = line_no + 1, count = raw.len(), "skipping line without six weights");
            continue;
        }

        let mut weights = [0.0 as Score; NUM_RM_FEATURES];
        for (idx, &value) in raw.iter().enumerate() {
            let weight = config.rm_feature_weights.get(idx).copied().unwrap_or(1.0);
            weights[idx] = if value <= 0.0 {
                ZERO_LOG_PROB
            } else {
                value.log10() * weight
            };
        }
        let entry = RmEntry::new(weights);

        if source == RM_UNKNOWN_PHRASE_STR && target == RM_UNKNOWN_PHRASE_STR {
            store.set_unk(entry);
            continue;
        }
        let source_ids: Vec<_> = source
            .split_whitespace()
            .map(|t| vocab.add_if_absent(t))
            .collect();
        let target_ids: Vec<_> = target
            .split_whitespace()
            .map(|t| vocab.add_if_absent(t))
            .collect();
        store.insert(
            combine_phrase_uids(phrase_uid(&source_ids), phrase_uid(&target_ids)),
            entry,
        );
    }

    debug!(pairs = store.len(), "reordering table loaded");
    Ok(store)
}

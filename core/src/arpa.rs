//! ARPA-format language model reader.
//!
//! Reads the textual ARPA format into an `LmModel`, converting every
//! stored value on the fly: probabilities and back-off weights arrive in
//! log10 and are multiplied by the single LM log-linear weight during the
//! pass, so the trie holds ready-to-sum scores.

use std::io::BufRead;

use tracing::{debug, warn};

use crate::lm::LmModel;
use crate::vocab::{Vocabulary, WordUid};
use crate::{Config, Score, ZERO_LOG_PROB};

/// ARPA marks "probability zero" with values around -99.
const ARPA_ZERO_THRESHOLD: Score = -99.0;

fn weighted(raw: Score, weight: Score) -> Score {
    if raw <= ARPA_ZERO_THRESHOLD {
        ZERO_LOG_PROB
    } else {
        raw * weight
    }
}

/// Read an ARPA file into a language model, registering every word in
/// the vocabulary.
///
/// The model order is taken from the `\data\` header. When the file
/// carries no `<unk>` unigram, the configured default is seeded so
/// unknown-word queries stay well defined.
pub fn read_arpa<R: BufRead>(
    reader: R,
    config: &Config,
    vocab: &mut Vocabulary,
) -> anyhow::Result<LmModel> {
    let weight = config.lm_feature_weights.first().copied().unwrap_or(1.0);

    let mut order = 0usize;
    let mut model: Option<LmModel> = None;
    let mut current_level = 0usize;
    let mut skipped = 0usize;
    let mut words: Vec<WordUid> = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line == "\\data\\" {
            continue;
        }
        if line == "\\end\\" {
            break;
        }
        if let Some(counts) = line.strip_prefix("ngram ") {
            // Header line "ngram N=count"
            let level: usize = counts
                .split('=')
                .next()
                .and_then(|n| n.trim().parse().ok())
                .ok_or_else(|| anyhow::anyhow!("bad ngram count header at line {}", line_no + 1))?;
            order = order.max(level);
            continue;
        }
        if line.starts_with('\\') && line.ends_with("-grams:") {
            let level: usize = line[1..line.len() - "-grams:".len()]
                .parse()
                .map_err(|_| anyhow::anyhow!("bad section header {:?}", line))?;
            anyhow::ensure!(order > 0, "m-gram section before the \\data\\ header");
            current_level = level;
            if model.is_none() {
                model = Some(LmModel::new(
                    order.max(2),
                    weighted(config.lm_unk_word_log_prob, weight),
                ));
            }
            continue;
        }

        let lm = model
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("entry line before any m-gram section"))?;
        let mut tokens = line.split_whitespace();
        let prob: Score = tokens
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("bad probability at line {}", line_no + 1))?;
        let rest: Vec<&str> = tokens.collect();
        anyhow::ensure!(
            rest.len() == current_level || rest.len() == current_level + 1,
            "expected {} words at line {}, got {}",
            current_level,
            line_no + 1,
            rest.len()
        );
        let back_off: Score = if rest.len() == current_level + 1 {
            rest[current_level].parse().unwrap_or(0.0)
        } else {
            0.0
        };

        words.clear();
        for token in &rest[..current_level] {
            words.push(vocab.add_if_absent(token));
        }
        // Entries whose prefix the file never listed cannot be keyed;
        // they are unreachable through back-off anyway.
        if lm
            .insert(&words, weighted(prob, weight), weighted(back_off, weight))
            .is_err()
        {
            skipped += 1;
        }
    }

    let mut lm =
        model.ok_or_else(|| anyhow::anyhow!("no m-gram sections found in the ARPA input"))?;
    if skipped > 0 {
        warn!(skipped, "dropped m-grams with unlisted prefixes");
    }
    // Guarantee a well-defined <unk> unigram
    if !lm.has_unigram(crate::vocab::UNKNOWN_WORD_ID) {
        lm.insert(
            &[crate::vocab::UNKNOWN_WORD_ID],
            weighted(config.lm_unk_word_log_prob, weight),
            0.0,
        )?;
    }
    for level in 1..=lm.order() {
        debug!(level, entries = lm.level_len(level), "loaded m-gram level");
    }
    Ok(lm)
}

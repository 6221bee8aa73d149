//! Line-oriented decoding against converted artifacts.

use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use libsmt_core::{Config, LmModel, Model, RmStore, TmStore, Translator, Vocabulary};

#[allow(clippy::too_many_arguments)]
pub fn run(
    lm_path: &Path,
    tm_fst: &Path,
    tm_bin: &Path,
    rm_fst: &Path,
    rm_bin: &Path,
    vocab_path: &Path,
    config: Config,
    json: bool,
) -> Result<()> {
    let vocab = Vocabulary::load_bincode(vocab_path)
        .with_context(|| format!("loading {}", vocab_path.display()))?;
    let lm = LmModel::load_bincode(lm_path)
        .with_context(|| format!("loading {}", lm_path.display()))?;
    let tm = TmStore::load_artifacts(tm_fst, tm_bin, &config).context("loading the TM artifacts")?;
    let rm = RmStore::load_artifacts(rm_fst, rm_bin).context("loading the RM artifacts")?;

    let translator = Translator::new(Model::new(vocab, lm, tm, rm, config));
    let is_stop = AtomicBool::new(false);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if json {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let outcome = translator.decode_with_stats(&tokens, &is_stop)?;
            println!(
                "{}",
                serde_json::json!({
                    "source": line,
                    "target": outcome.translation,
                    "score": outcome.score,
                    "stats": outcome.stats,
                })
            );
        } else {
            println!("{}", translator.translate(&line, &is_stop)?);
        }
    }
    Ok(())
}

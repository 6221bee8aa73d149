//! Text model -> binary artifact conversion.
//!
//! All three converters share one vocabulary artifact: it is created on
//! first use and extended by every later conversion, so the word ids in
//! the LM, TM and RM artifacts agree.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use libsmt_core::{arpa, rm, tm, Config, Vocabulary};

fn load_or_new_vocab(path: &Path) -> Result<Vocabulary> {
    if path.exists() {
        Vocabulary::load_bincode(path).with_context(|| format!("loading {}", path.display()))
    } else {
        Ok(Vocabulary::new())
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    Ok(BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    ))
}

pub fn lm(input: &Path, out: &Path, vocab_path: &Path, config: &Config) -> Result<()> {
    let mut vocab = load_or_new_vocab(vocab_path)?;
    let model = arpa::read_arpa(open(input)?, config, &mut vocab)
        .with_context(|| format!("reading ARPA model {}", input.display()))?;
    model.save_bincode(out)?;
    vocab.save_bincode(vocab_path)?;
    println!(
        "Wrote order-{} language model to {} ({} words indexed)",
        model.order(),
        out.display(),
        vocab.len()
    );
    Ok(())
}

pub fn tm(
    input: &Path,
    out_fst: &Path,
    out_bin: &Path,
    vocab_path: &Path,
    config: &Config,
) -> Result<()> {
    let mut vocab = load_or_new_vocab(vocab_path)?;
    let store = tm::read_phrase_table(open(input)?, config, &mut vocab)
        .with_context(|| format!("reading phrase table {}", input.display()))?;
    store.save_artifacts(out_fst, out_bin)?;
    vocab.save_bincode(vocab_path)?;
    println!(
        "Wrote {} source phrases to {} and {}",
        store.num_sources(),
        out_fst.display(),
        out_bin.display()
    );
    Ok(())
}

pub fn rm(
    input: &Path,
    out_fst: &Path,
    out_bin: &Path,
    vocab_path: &Path,
    config: &Config,
) -> Result<()> {
    let mut vocab = load_or_new_vocab(vocab_path)?;
    let store = rm::read_reordering_table(open(input)?, config, &mut vocab)
        .with_context(|| format!("reading reordering table {}", input.display()))?;
    store.save_artifacts(out_fst, out_bin)?;
    vocab.save_bincode(vocab_path)?;
    println!(
        "Wrote {} phrase pairs to {} and {}",
        store.len(),
        out_fst.display(),
        out_bin.display()
    );
    Ok(())
}

mod convert;
mod decode;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use anyhow::Result;
use libsmt_core::Config;

#[derive(Parser)]
#[command(name = "smt-tools", about = "Convert translation models and decode sentences")]
struct Cli {
    /// TOML configuration with decoder parameters and feature weights
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert an ARPA language model into the bincode artifact
    ConvertLm {
        input: PathBuf,
        #[arg(long, default_value = "lm.bin")]
        out: PathBuf,
        /// Shared vocabulary artifact, created or extended
        #[arg(long, default_value = "vocab.bin")]
        vocab: PathBuf,
    },
    /// Convert a Moses-style phrase table into fst + bincode artifacts
    ConvertTm {
        input: PathBuf,
        #[arg(long, default_value = "tm.fst")]
        out_fst: PathBuf,
        #[arg(long, default_value = "tm.bin")]
        out_bin: PathBuf,
        #[arg(long, default_value = "vocab.bin")]
        vocab: PathBuf,
    },
    /// Convert a lexicalised reordering table into fst + bincode artifacts
    ConvertRm {
        input: PathBuf,
        #[arg(long, default_value = "rm.fst")]
        out_fst: PathBuf,
        #[arg(long, default_value = "rm.bin")]
        out_bin: PathBuf,
        #[arg(long, default_value = "vocab.bin")]
        vocab: PathBuf,
    },
    /// Load the converted artifacts and decode stdin line by line
    Decode {
        #[arg(long, default_value = "lm.bin")]
        lm: PathBuf,
        #[arg(long, default_value = "tm.fst")]
        tm_fst: PathBuf,
        #[arg(long, default_value = "tm.bin")]
        tm_bin: PathBuf,
        #[arg(long, default_value = "rm.fst")]
        rm_fst: PathBuf,
        #[arg(long, default_value = "rm.bin")]
        rm_bin: PathBuf,
        #[arg(long, default_value = "vocab.bin")]
        vocab: PathBuf,
        /// Emit one JSON object per sentence with score and statistics
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_toml(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::ConvertLm { input, out, vocab } => convert::lm(&input, &out, &vocab, &config),
        Command::ConvertTm {
            input,
            out_fst,
            out_bin,
            vocab,
        } => convert::tm(&input, &out_fst, &out_bin, &vocab, &config),
        Command::ConvertRm {
            input,
            out_fst,
            out_bin,
            vocab,
        } => convert::rm(&input, &out_fst, &out_bin, &vocab, &config),
        Command::Decode {
            lm,
            tm_fst,
            tm_bin,
            rm_fst,
            rm_bin,
            vocab,
            json,
        } => decode::run(&lm, &tm_fst, &tm_bin, &rm_fst, &rm_bin, &vocab, config, json),
    }
}

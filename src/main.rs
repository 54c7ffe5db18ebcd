//! ddrfuzz CLI
//!
//! Trains a byte-level sequence model on sample files of one format, or loads the trained model
//! and writes generated fuzzing seeds.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, ValueEnum};
use log::info;

use ddrfuzz::data::{SequencePair, load_dataset, split};
use ddrfuzz::inference::{generate_all, write_seeds};
use ddrfuzz::model::{ModelConfig, Seq2SeqModel, Variant};
use ddrfuzz::tokenizer::ByteTokenizer;
use ddrfuzz::training::{TrainConfig, Trainer};
use ddrfuzz::weights::{self, CheckpointPaths};

/// What to do with the selected model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
enum Mode {
    /// Train on the dataset and save a checkpoint
    Train,
    /// Load the checkpoint and write generated seeds
    #[default]
    Test,
}

/// Generate file-format fuzzing seeds with sequence-to-sequence models.
#[derive(Debug, Parser)]
#[command(name = "ddrfuzz", version, about)]
struct Cli {
    /// [seq2seq | attention | transformer]
    #[arg(long, default_value = "seq2seq")]
    model: String,

    /// [train | test]
    #[arg(long, value_enum, default_value = "test")]
    mode: Mode,

    /// Directory of sample files
    #[arg(long, default_value = "../seq2seq/init_dataset/PNG/path")]
    path: PathBuf,

    /// Format label used in checkpoint and output paths
    #[arg(long, default_value = "AVIF")]
    format: String,

    /// Maximum sequence length
    #[arg(long, default_value = "1000")]
    maxlen: usize,

    /// Token embedding dimension
    #[arg(long = "emb_dim", default_value = "64")]
    emb_dim: usize,

    #[arg(long = "batch_size", default_value = "8")]
    batch_size: usize,

    #[arg(long, default_value = "2")]
    epochs: usize,

    /// Epochs without improvement before training stops
    #[arg(long, default_value = "10")]
    patience: usize,

    /// LSTM hidden units (recurrent models)
    #[arg(long, default_value = "256")]
    units: usize,

    /// Fraction of samples held out from training
    #[arg(long = "test_ratio", default_value = "0.0")]
    test_ratio: f32,

    #[arg(long = "learning_rate", default_value = "0.001")]
    learning_rate: f64,

    /// Seed for the training shuffle
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Root directory for checkpoints
    #[arg(long = "model_dir", default_value = "./model")]
    model_dir: PathBuf,

    /// Root directory for generated seeds
    #[arg(long = "output_dir", default_value = "./output")]
    output_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let Some(variant) = Variant::from_name(&cli.model) else {
        println!("Please enter the right model name");
        println!("ddrfuzz --model [seq2seq|attention|transformer]");
        return Ok(());
    };

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    print_settings(&cli);

    let tokenizer = ByteTokenizer::new();
    let dataset = load_dataset(&cli.path, cli.maxlen, tokenizer)
        .with_context(|| format!("load dataset {}", cli.path.display()))?;
    let (train, held_out) = split(dataset.pairs, cli.test_ratio)?;

    let device = Device::Cpu;
    let paths = CheckpointPaths::new(&cli.model_dir, variant, &cli.format);

    match cli.mode {
        Mode::Train => {
            println!("\n[*] Start training {variant} model ...");
            run_train(&cli, variant, &paths, &device, &train, &held_out)
        }
        Mode::Test => {
            println!("\n[*] Start testing {variant} model ...");
            let source = if held_out.is_empty() { &train } else { &held_out };
            let out_dir = cli.output_dir.join(variant.output_dir()).join(&cli.format);
            run_test(&paths, &device, source, &out_dir, tokenizer)
        }
    }
}

fn print_settings(cli: &Cli) {
    println!("\n[*] Setting Arguments");
    println!("- MODEL: {}", cli.model);
    println!("- MODE: {:?}", cli.mode);
    println!("- MAXLEN: {}", cli.maxlen);
    println!("- BATCH_SIZE: {}", cli.batch_size);
    println!("- EPOCHS: {}", cli.epochs);
    println!("- PATIENCE: {}", cli.patience);
    println!("- EMBEDDING_DIM: {}", cli.emb_dim);
    println!("- DATASET_PATH: {}", cli.path.display());
}

fn run_train(
    cli: &Cli,
    variant: Variant,
    paths: &CheckpointPaths,
    device: &Device,
    train: &[SequencePair],
    held_out: &[SequencePair],
) -> Result<()> {
    let config = ModelConfig::for_variant(variant, cli.maxlen, cli.emb_dim, cli.units);
    let mut model = Seq2SeqModel::fresh(config, device).context("build model")?;

    let train_config = TrainConfig {
        epochs: cli.epochs,
        patience: cli.patience,
        batch_size: cli.batch_size,
        learning_rate: cli.learning_rate,
        seed: cli.seed,
    };

    let start = Instant::now();
    let report = Trainer::new(&mut model, train_config)?
        .fit(train, held_out)
        .context("training failed")?;
    info!(
        "trained {} epochs in {:.1}s, best epoch {} (loss {:.4}){}",
        report.history.len(),
        start.elapsed().as_secs_f32(),
        report.best_epoch,
        report.best_loss,
        if report.stopped_early { ", stopped early" } else { "" }
    );

    weights::save(&model, paths)
        .with_context(|| format!("save checkpoint to {}", paths.dir().display()))?;
    Ok(())
}

fn run_test(
    paths: &CheckpointPaths,
    device: &Device,
    source: &[SequencePair],
    out_dir: &Path,
    tokenizer: ByteTokenizer,
) -> Result<()> {
    let model = weights::load(paths, device)
        .with_context(|| format!("load checkpoint from {}", paths.dir().display()))?;

    let start = Instant::now();
    let generated = generate_all(&model, source.iter().map(|pair| pair.input.as_slice()))
        .context("generation failed")?;
    info!(
        "generated {} sequences in {:.1}s",
        generated.len(),
        start.elapsed().as_secs_f32()
    );

    write_seeds(out_dir, &generated, tokenizer)
        .with_context(|| format!("write seeds to {}", out_dir.display()))?;
    Ok(())
}

//! splatpack command-line driver
//!
//! Reads a canonical record body, runs the compression pipeline and writes
//! the asset files. Also generates synthetic record bodies for testing.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use splatpack_core::records::{decode_records, encode_records, infer_record_count, RECORD_STRIDE};
use splatpack_core::synthetic::generate;
use splatpack_core::{compress, CompressionConfig, Quality, SyntheticKind, SyntheticParams};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "splatpack")]
#[command(version, about = "Offline Gaussian splat compression")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a synthetic cloud as a record body
    Synth {
        /// random-inside-sphere, random-inside-box or ordered-inside-box
        #[arg(short, long, default_value = "random-inside-sphere")]
        kind: SyntheticKind,
        #[arg(short, long, default_value = "10000")]
        count: usize,
        #[arg(long, default_value = "1")]
        seed: u64,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Compress a record body into asset files
    Pack {
        #[arg(short, long)]
        input: PathBuf,
        /// Number of records; inferred from the file size when omitted
        #[arg(long)]
        count: Option<usize>,
        /// very-high, high, medium, low or very-low
        #[arg(short, long, conflicts_with = "config")]
        quality: Option<Quality>,
        /// JSON file with a full compression config
        #[arg(long)]
        config: Option<PathBuf>,
        /// Worker threads (default: one per core)
        #[arg(long)]
        threads: Option<usize>,
        /// Seed for SH clustering
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = "out")]
        output_dir: PathBuf,
        /// Base name of the written files
        #[arg(short, long, default_value = "splats")]
        name: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Synth {
            kind,
            count,
            seed,
            output,
        } => synth(kind, count, seed, output),
        Commands::Pack {
            input,
            count,
            quality,
            config,
            threads,
            seed,
            output_dir,
            name,
        } => {
            let mut config = match config {
                Some(path) => CompressionConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => CompressionConfig::from_quality(quality.unwrap_or_default()),
            };
            if let Some(threads) = threads {
                if threads == 0 {
                    bail!("--threads must be at least 1");
                }
                config.threads = Some(threads);
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            pack(input, count, &config, output_dir, &name)
        }
    }
}

fn synth(kind: SyntheticKind, count: usize, seed: u64, output: PathBuf) -> Result<()> {
    let cloud = generate(&SyntheticParams {
        count,
        kind,
        seed,
        ..SyntheticParams::default()
    });
    let body = encode_records(&cloud);
    std::fs::write(&output, &body)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!("Wrote {} splats ({} bytes) to {}", count, body.len(), output.display());
    Ok(())
}

fn pack(
    input: PathBuf,
    count: Option<usize>,
    config: &CompressionConfig,
    output_dir: PathBuf,
    name: &str,
) -> Result<()> {
    let body =
        std::fs::read(&input).with_context(|| format!("Failed to read {}", input.display()))?;
    let count = match count {
        Some(n) => n,
        None => match infer_record_count(body.len()) {
            Some(n) => n,
            None => bail!(
                "{} is {} bytes, not a whole number of {}-byte records",
                input.display(),
                body.len(),
                RECORD_STRIDE
            ),
        },
    };

    let start = Instant::now();
    let cloud = decode_records(&body, count, RECORD_STRIDE)?;
    let asset = compress(cloud, config)?;
    let written = asset.write_to_dir(&output_dir, name)?;
    info!(
        "Packed {} splats in {:.2?}, wrote {} files to {}",
        asset.splat_count,
        start.elapsed(),
        written.len(),
        output_dir.display()
    );

    println!("{}", asset.size_report());
    println!("hash: {}", asset.hash_hex());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pack() {
        let cli = Cli::try_parse_from([
            "splatpack", "pack", "--input", "a.splats", "--quality", "very-low", "--threads", "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Pack {
                quality, threads, ..
            } => {
                assert_eq!(quality, Some(Quality::VeryLow));
                assert_eq!(threads, Some(2));
            }
            _ => panic!("expected pack"),
        }
    }

    #[test]
    fn test_quality_conflicts_with_config() {
        assert!(Cli::try_parse_from([
            "splatpack", "pack", "--input", "a", "--quality", "low", "--config", "c.json",
        ])
        .is_err());
    }

    #[test]
    fn test_parse_synth() {
        let cli =
            Cli::try_parse_from(["splatpack", "synth", "--kind", "ordered-inside-box", "-o", "x"])
                .unwrap();
        match cli.command {
            Commands::Synth { kind, count, .. } => {
                assert_eq!(kind, SyntheticKind::OrderedInsideBox);
                assert_eq!(count, 10_000);
            }
            _ => panic!("expected synth"),
        }
    }
}

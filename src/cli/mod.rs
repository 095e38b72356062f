use crate::tvm::{BocHeader, BocOptions, Cell, parse_boc_header, parse_dict_bit_string};
use anyhow::{Context, Result, bail};
use base64::Engine;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// tonboc CLI
#[derive(Parser, Debug)]
#[command(name = "tonboc")]
#[command(about = "Inspect and re-encode TON Bag of Cells", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print every root as a cell tree with its hash, depth and level
    Inspect {
        /// BoC as hex, base64, or @path to a raw file
        boc: String,
        /// Emit a JSON summary instead of the tree
        #[arg(long)]
        json: bool,
    },
    /// Print the representation hash of every root
    Hash {
        /// BoC as hex, base64, or @path to a raw file
        boc: String,
    },
    /// Serialize the roots again with the given options
    Reencode {
        /// BoC as hex, base64, or @path to a raw file
        boc: String,
        /// Leave out the offset index
        #[arg(long)]
        no_idx: bool,
        /// Leave out the CRC32C trailer
        #[arg(long)]
        no_crc32: bool,
        /// Mark shared cells in the index
        #[arg(long)]
        cache_bits: bool,
        /// Reserved 2-bit flags field
        #[arg(long, default_value = "0")]
        flags: u8,
        /// Print base64 instead of hex
        #[arg(long)]
        base64: bool,
    },
    /// Parse the first root as a dictionary and print its entries
    Dict {
        /// BoC as hex, base64, or @path to a raw file
        boc: String,
        /// Key width in bits
        #[arg(short = 'k', long)]
        key_size: usize,
    },
}

#[derive(Serialize)]
struct RootSummary {
    index: usize,
    cell_type: String,
    hash: String,
    depth: u16,
    level: u8,
    bits: usize,
    refs: usize,
}

#[derive(Serialize)]
struct InspectReport {
    header: BocHeader,
    roots: Vec<RootSummary>,
}

/// Reads the raw BoC bytes from hex, base64 or `@path`
fn read_input(src: &str) -> Result<Vec<u8>> {
    if let Some(path) = src.strip_prefix('@') {
        return std::fs::read(path).with_context(|| format!("Failed to read {path}"));
    }
    let src = src.trim();
    if !src.is_empty() && src.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex::decode(src) {
            return Ok(bytes);
        }
    }
    base64::engine::general_purpose::STANDARD
        .decode(src)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(src))
        .context("Input is neither hex nor base64")
}

fn load_roots(bytes: &[u8]) -> Result<Vec<Arc<Cell>>> {
    let start = Instant::now();
    let roots = Cell::from_boc(bytes).context("Failed to deserialize BoC")?;
    log::debug!(
        "Deserialized {} roots from {} bytes in {:.3}ms",
        roots.len(),
        bytes.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(roots)
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Execute the command
    pub fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Inspect { boc, json } => self.execute_inspect(boc, *json),
            Commands::Hash { boc } => self.execute_hash(boc),
            Commands::Reencode {
                boc,
                no_idx,
                no_crc32,
                cache_bits,
                flags,
                base64,
            } => {
                let options = BocOptions {
                    idx: !no_idx,
                    crc32: !no_crc32,
                    cache_bits: *cache_bits,
                    flags: *flags,
                };
                self.execute_reencode(boc, &options, *base64)
            }
            Commands::Dict { boc, key_size } => self.execute_dict(boc, *key_size),
        }
    }

    fn execute_inspect(&self, boc: &str, json: bool) -> Result<()> {
        let bytes = read_input(boc)?;
        let roots = load_roots(&bytes)?;

        if json {
            let report = InspectReport {
                header: parse_boc_header(&bytes)?,
                roots: roots
                    .iter()
                    .enumerate()
                    .map(|(index, root)| RootSummary {
                        index,
                        cell_type: root.cell_type().to_string(),
                        hash: hex::encode(root.repr_hash()),
                        depth: root.max_depth(),
                        level: root.max_level(),
                        bits: root.bit_len(),
                        refs: root.reference_count(),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        for (index, root) in roots.iter().enumerate() {
            println!(
                "root {index}: hash {} depth {} level {}",
                hex::encode_upper(root.repr_hash()),
                root.max_depth(),
                root.max_level()
            );
            print!("{}", root.to_debug_string());
        }
        Ok(())
    }

    fn execute_hash(&self, boc: &str) -> Result<()> {
        for root in load_roots(&read_input(boc)?)? {
            println!("{}", hex::encode(root.repr_hash()));
        }
        Ok(())
    }

    fn execute_reencode(&self, boc: &str, options: &BocOptions, base64: bool) -> Result<()> {
        let roots = load_roots(&read_input(boc)?)?;
        let out = if base64 {
            crate::tvm::boc_to_base64(&roots, options)?
        } else {
            crate::tvm::boc_to_hex(&roots, options)?
        };
        log::info!("Re-encoded {} roots with {:?}", roots.len(), options);
        println!("{out}");
        Ok(())
    }

    fn execute_dict(&self, boc: &str, key_size: usize) -> Result<()> {
        let roots = load_roots(&read_input(boc)?)?;
        let Some(root) = roots.first() else {
            bail!("BoC has no roots");
        };
        let mut slice = root.begin_parse()?;
        let entries = parse_dict_bit_string(&mut slice, key_size)
            .with_context(|| format!("Failed to parse a {key_size}-bit dictionary"))?;
        for (key, value) in &entries {
            println!("{key:x} => x{{{value}}}");
        }
        log::info!("{} entries", entries.len());
        Ok(())
    }
}

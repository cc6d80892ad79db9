mod print;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use gk_format::moe::{self, MIXTRAL_LAYERS};
use gk_format::{GgufFile, OpenMode};
use print::PrintVisitor;

/// `show` elides array values after this many elements.
const MAX_SHOWN_ARRAY_ITEMS: u64 = 30;

#[derive(Parser)]
#[command(name = "ggufkit")]
#[command(version)]
#[command(about = "Inspect and transform GGUF model files", long_about = None)]
struct Cli {
    /// Log per-item progress.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a model's metadata keys and tensors.
    Show { file: PathBuf },
    /// Dequantize a tensor and print its weights.
    InspectTensor {
        file: PathBuf,
        tensor: String,
        /// How many weights to print (0 = all).
        #[arg(default_value_t = 0)]
        count: u64,
    },
    /// Extract one expert per layer from a Mixtral model into a dense file.
    SplitMixtral {
        /// Per-layer expert ids, one digit 0-7 per layer; the last digit is
        /// repeated when fewer than 32 are given.
        experts: String,
        source: PathBuf,
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Show { file } => show(&file),
        Commands::InspectTensor {
            file,
            tensor,
            count,
        } => inspect_tensor(&file, &tensor, count),
        Commands::SplitMixtral {
            experts,
            source,
            output,
        } => split_mixtral(&experts, &source, &output),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn show(file: &Path) -> Result<()> {
    let mut ctx = GgufFile::open(file, OpenMode::Read)
        .with_context(|| format!("opening {}", file.display()))?;

    println!(
        "{} (ver {}): {} key-value pairs, {} tensors",
        file.display(),
        ctx.version(),
        ctx.metadata_kv_count(),
        ctx.tensor_count()
    );

    while let Some(key) = ctx.next_key()? {
        print!("{}: [{}] ", key.name, key.value_type.name());
        let mut printer = PrintVisitor::new(MAX_SHOWN_ARRAY_ITEMS);
        ctx.walk_value(key.value_type, &mut printer)?;
        println!();
    }

    let mut params: u64 = 0;
    while let Some(tensor) = ctx.next_tensor()? {
        println!(
            "{} tensor {} @{}, {} weights, {} bytes",
            tensor.dtype,
            tensor.name,
            tensor.abs_offset,
            tensor.num_weights,
            tensor.data_size()
        );
        params += tensor.num_weights;
    }
    println!("parameters: {:.02}B", params as f64 / 1e9);
    Ok(())
}

fn inspect_tensor(file: &Path, name: &str, count: u64) -> Result<()> {
    let mut ctx = GgufFile::open(file, OpenMode::Read)
        .with_context(|| format!("opening {}", file.display()))?;
    ctx.skip_metadata()?;

    let mut found = None;
    while let Some(tensor) = ctx.next_tensor()? {
        if tensor.name == name {
            found = Some(tensor);
            break;
        }
    }
    let tensor = found.ok_or_else(|| anyhow!("no tensor named {} in {}", name, file.display()))?;

    let weights = ctx.dequantize_f32(&tensor)?;
    let limit = if count == 0 {
        weights.len()
    } else {
        weights.len().min(count as usize)
    };
    for (i, w) in weights[..limit].iter().enumerate() {
        print!("{:.6}, ", w);
        if (i + 1) % 4 == 0 {
            println!();
        }
    }
    if limit % 4 != 0 {
        println!();
    }
    Ok(())
}

fn split_mixtral(digits: &str, source: &Path, output: &Path) -> Result<()> {
    let experts = parse_expert_ids(digits)?;
    moe::split_mixtral(source, output, &experts)
        .with_context(|| format!("splitting {}", source.display()))?;
    Ok(())
}

/// Parse a string of per-layer expert ids. Each character must be a digit
/// 0-7; when fewer than 32 are given, the last one covers the remaining
/// layers.
fn parse_expert_ids(digits: &str) -> Result<[u8; MIXTRAL_LAYERS]> {
    if digits.is_empty() {
        bail!("expert id list is empty");
    }
    let chars: Vec<char> = digits.chars().collect();
    let mut experts = [0u8; MIXTRAL_LAYERS];
    let mut last = 0u8;
    for (layer, slot) in experts.iter_mut().enumerate() {
        if layer < chars.len() {
            let id = chars[layer]
                .to_digit(10)
                .filter(|&d| d <= 7)
                .ok_or_else(|| anyhow!("Invalid expert ID: {}", chars[layer]))?;
            last = id as u8;
        }
        *slot = last;
    }
    Ok(experts)
}

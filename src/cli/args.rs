use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "kira-topk",
    version,
    about = "Exact top-K k-mer counts for FASTQ in bounded memory"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    Count(CountArgs),
}

#[derive(Parser)]
pub struct CountArgs {
    /// FASTQ input, plain or gzip-compressed.
    pub reads: PathBuf,

    /// K-mer length (1..=31).
    #[arg(short = 'k', long)]
    pub k: usize,

    /// Number of k-mers to report.
    #[arg(short = 'n', long)]
    pub top: usize,

    /// Leading symbols that select a pass; the corpus is read 4^P times.
    #[arg(long)]
    pub pass_prefix: Option<usize>,

    /// Symbols after the pass prefix that select a count table.
    #[arg(long)]
    pub bucket_prefix: Option<usize>,

    #[arg(long, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Pick the pass prefix so one pass's tables fit this many MiB.
    #[arg(long, conflicts_with = "pass_prefix")]
    pub max_memory_mb: Option<u64>,

    /// Output file; stdout when omitted.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

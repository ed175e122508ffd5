use crate::cli::args::{Cli, Commands, CountArgs};
use anyhow::{Context, Result, bail};
use clap::Parser;
use kira_topk::core::corpus::FastqCorpus;
use kira_topk::core::engine::{self, RunConfig};
use kira_topk::core::model;
use kira_topk::core::stats::{fmt_dur, log_stage, stats_enabled};
use kira_topk::report;
use std::fs;
use std::io::{self, Write};
use std::time::Instant;

pub fn entry() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Count(args) => count(args),
    }
}

fn count(args: CountArgs) -> Result<()> {
    let stats = stats_enabled();
    let t0 = Instant::now();

    stage(stats, "preflight", || {
        if args.reads.as_os_str() == "-" {
            bail!("stdin is not supported; every pass rereads the input, provide a FASTQ file path");
        }
        if !args.reads.is_file() {
            bail!("input file not found: {}", args.reads.display());
        }
        if args.threads == 0 {
            bail!("--threads must be >= 1");
        }
        Ok(())
    })?;

    let input_size = fs::metadata(&args.reads).map(|m| m.len()).unwrap_or(0);

    let t_open = Instant::now();
    let corpus = FastqCorpus::open(&args.reads, args.threads)?;
    log_stage(stats, "input-open", t_open);

    let mut pass_prefix = args.pass_prefix;
    if let Some(mb) = args.max_memory_mb {
        let budget = mb.saturating_mul(1024 * 1024);
        let p = model::plan_pass_prefix(args.k, corpus.estimated_kmers(), budget);
        if stats {
            eprintln!(
                "KIRA_STATS plan budget_mb={} estimated_kmers={} pass_prefix={}",
                mb,
                corpus.estimated_kmers(),
                p
            );
        }
        pass_prefix = Some(p);
    }

    let config = RunConfig {
        k: args.k,
        top_k: args.top,
        pass_prefix,
        bucket_prefix: args.bucket_prefix,
        threads: args.threads,
    };

    let t_engine = Instant::now();
    let output = engine::run(&config, &corpus)?;
    log_stage(stats, "engine", t_engine);
    if stats {
        eprintln!(
            "KIRA_STATS input={} bytes={} reads={} bases={} passes={}",
            args.reads.display(),
            input_size,
            output.scan.records,
            output.scan.bases,
            output.passes
        );
    }

    let t_write = Instant::now();
    match &args.out {
        Some(path) => report::topk_txt::write(path, &output)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            report::topk_txt::write_to(&mut lock, &output)
                .with_context(|| "failed to write results to stdout")?;
            lock.flush()?;
        }
    }
    log_stage(stats, "write", t_write);

    if stats {
        eprintln!("KIRA_STATS total={}", fmt_dur(t0.elapsed()));
    }
    Ok(())
}

fn stage<F>(stats: bool, name: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let t = Instant::now();
    let res = f();
    log_stage(stats, name, t);
    res
}

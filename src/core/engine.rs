use crate::core::accumulator::GlobalTopK;
use crate::core::codec;
use crate::core::corpus::{Corpus, SeqBatch};
use crate::core::counting::{PassCounter, ScanStats};
use crate::core::error::TopKError;
use crate::core::model::{KmerCount, KmerLayout};
use crate::core::reduce::BucketTopList;
use crate::core::stats::{fmt_dur, log_stage, stats_enabled};
use anyhow::{Context, Result, anyhow};
use crossbeam_channel as channel;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const LANE_QUEUE: usize = 4;

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub k: usize,
    pub top_k: usize,
    pub pass_prefix: Option<usize>,
    pub bucket_prefix: Option<usize>,
    pub threads: usize,
}

impl RunConfig {
    pub fn new(k: usize, top_k: usize) -> Self {
        Self {
            k,
            top_k,
            pass_prefix: None,
            bucket_prefix: None,
            threads: 1,
        }
    }

    pub fn validate(&self) -> Result<KmerLayout, TopKError> {
        if self.top_k == 0 {
            return Err(TopKError::invalid_parameter("result size must be > 0"));
        }
        if self.threads == 0 {
            return Err(TopKError::invalid_parameter("threads must be >= 1"));
        }
        KmerLayout::new(self.k, self.pass_prefix, self.bucket_prefix)
    }
}

#[derive(Debug)]
pub struct RunOutput {
    /// Highest counts first; equal counts in ascending k-mer order.
    pub top: Vec<KmerCount>,
    pub layout: KmerLayout,
    /// Corpus figures from the first pass; `counted` covers all passes.
    pub scan: ScanStats,
    pub passes: u64,
}

#[derive(Clone, Debug, Default)]
struct ProducerStats {
    batches: u64,
    bytes: u64,
    decompress: Duration,
    align: Duration,
}

impl ProducerStats {
    fn add(&mut self, batch: &SeqBatch) {
        self.batches += 1;
        self.bytes += batch.timing.bytes as u64;
        self.decompress += batch.timing.decompress;
        self.align += batch.timing.align;
    }
}

type LaneResult = (Vec<BucketTopList>, ScanStats);

/// Drives the passes over a corpus.
///
/// Created in its initial state by [`PassOrchestrator::new`]; each
/// [`run_pass`](Self::run_pass) rescans the corpus for one pass prefix and
/// folds the bucket results into the global top-K; [`finish`](Self::finish)
/// consumes it and yields the answer.
pub struct PassOrchestrator {
    layout: KmerLayout,
    top_k: usize,
    lanes: usize,
    global: GlobalTopK,
    scan: Option<ScanStats>,
    counted: u64,
    passes_done: u64,
    stats: bool,
}

impl PassOrchestrator {
    pub fn new(cfg: &RunConfig) -> Result<Self, TopKError> {
        let layout = cfg.validate()?;
        Ok(Self {
            layout,
            top_k: cfg.top_k,
            lanes: cfg.threads.min(layout.buckets()).max(1),
            global: GlobalTopK::new(cfg.top_k),
            scan: None,
            counted: 0,
            passes_done: 0,
            stats: stats_enabled(),
        })
    }

    pub fn layout(&self) -> KmerLayout {
        self.layout
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// The pass [`run_pass`](Self::run_pass) accepts next, or `None` once
    /// every pass has run.
    pub fn next_pass(&self) -> Option<u64> {
        (self.passes_done < self.layout.passes()).then_some(self.passes_done)
    }

    /// Runs `pass`, which must be [`next_pass`](Self::next_pass): passes go
    /// strictly in order and each runs once. A failed pass leaves the
    /// accumulator untouched and may be retried.
    pub fn run_pass(&mut self, corpus: &dyn Corpus, pass: u64) -> Result<()> {
        match self.next_pass() {
            Some(next) if next == pass => {}
            Some(next) => {
                return Err(TopKError::invalid_parameter(format!(
                    "pass {pass} requested out of order, next pass is {next}"
                ))
                .into());
            }
            None => {
                return Err(TopKError::invalid_parameter(format!(
                    "pass {pass} requested after all {} passes ran",
                    self.layout.passes()
                ))
                .into());
            }
        }
        let t_pass = Instant::now();
        let mut producer = ProducerStats::default();
        let results = if self.lanes == 1 {
            vec![self.count_single(corpus, pass, &mut producer)?]
        } else {
            self.count_lanes(corpus, pass, &mut producer)?
        };
        let t_count = t_pass.elapsed();

        let mut counted = 0u64;
        let mut lists = 0usize;
        let mut first_lane: Option<ScanStats> = None;
        for (bucket_lists, lane_stats) in results {
            for list in &bucket_lists {
                self.global.merge(list);
            }
            lists += bucket_lists.len();
            counted += lane_stats.counted;
            if first_lane.is_none() {
                first_lane = Some(lane_stats);
            }
        }
        self.counted += counted;
        if self.scan.is_none() {
            self.scan = first_lane;
        }
        self.passes_done += 1;

        if self.stats {
            eprintln!(
                "KIRA_STATS pass={}/{} counted={} buckets={} kept={} count_time={} time={}",
                pass + 1,
                self.layout.passes(),
                counted,
                lists,
                self.global.len(),
                fmt_dur(t_count),
                fmt_dur(t_pass.elapsed())
            );
            eprintln!(
                "KIRA_STATS producer.batches={} producer.bytes={} producer.decompress={} producer.chunk_align={}",
                producer.batches,
                producer.bytes,
                fmt_dur(producer.decompress),
                fmt_dur(producer.align)
            );
        }
        Ok(())
    }

    fn count_single(
        &self,
        corpus: &dyn Corpus,
        pass: u64,
        producer: &mut ProducerStats,
    ) -> Result<LaneResult> {
        let mut counter = PassCounter::new(self.layout, pass);
        let mut stream = corpus.scan()?;
        while let Some(batch) = stream.next_batch()? {
            producer.add(&batch);
            counter.count_batch(&batch);
        }
        Ok(counter.into_top_lists(self.top_k))
    }

    /// Broadcasts every batch to all lanes; each lane counts only its own
    /// buckets and reduces them when the corpus is exhausted.
    fn count_lanes(
        &self,
        corpus: &dyn Corpus,
        pass: u64,
        producer: &mut ProducerStats,
    ) -> Result<Vec<LaneResult>> {
        let layout = self.layout;
        let lanes = self.lanes;
        let top_k = self.top_k;
        thread::scope(|scope| -> Result<Vec<LaneResult>> {
            let mut senders = Vec::with_capacity(lanes);
            let mut workers = Vec::with_capacity(lanes);
            for lane in 0..lanes {
                let (tx, rx) = channel::bounded::<Arc<SeqBatch>>(LANE_QUEUE);
                senders.push(tx);
                workers.push(scope.spawn(move || {
                    let mut counter = PassCounter::for_lane(layout, pass, lane, lanes);
                    for batch in rx.iter() {
                        counter.count_batch(&batch);
                    }
                    counter.into_top_lists(top_k)
                }));
            }

            let produced = (|| -> Result<()> {
                let mut stream = corpus.scan()?;
                while let Some(batch) = stream.next_batch()? {
                    producer.add(&batch);
                    let batch = Arc::new(batch);
                    for (lane, tx) in senders.iter().enumerate() {
                        tx.send(Arc::clone(&batch))
                            .map_err(|_| anyhow!("counting lane {} stopped early", lane))?;
                    }
                }
                Ok(())
            })();
            drop(senders);

            let mut out = Vec::with_capacity(lanes);
            for (lane, worker) in workers.into_iter().enumerate() {
                let result = worker
                    .join()
                    .map_err(|_| anyhow!("counting lane {} panicked", lane))?;
                out.push(result);
            }
            produced?;
            Ok(out)
        })
    }

    /// Ends the run; the accumulator is read once and never mutated again.
    /// Fails unless every pass has completed.
    pub fn finish(self) -> Result<RunOutput, TopKError> {
        if self.passes_done < self.layout.passes() {
            return Err(TopKError::IncompleteRun {
                done: self.passes_done,
                total: self.layout.passes(),
            });
        }
        let k = self.layout.k;
        let mut scan = self.scan.unwrap_or_default();
        debug_assert_eq!(self.counted, scan.windows - scan.invalid_windows);
        scan.counted = self.counted;
        let top = self
            .global
            .into_sorted_vec()
            .into_iter()
            .map(|r| KmerCount {
                kmer: codec::decode(r.kmer, k),
                count: r.count,
            })
            .collect();
        Ok(RunOutput {
            top,
            layout: self.layout,
            scan,
            passes: self.passes_done,
        })
    }
}

/// Counts the corpus and returns its `top_k` most frequent k-mers.
pub fn run(cfg: &RunConfig, corpus: &dyn Corpus) -> Result<RunOutput> {
    let stats = stats_enabled();
    let t_total = Instant::now();
    let mut orchestrator = PassOrchestrator::new(cfg)?;
    let layout = orchestrator.layout();
    if stats {
        eprintln!(
            "KIRA_STATS corpus={} k={} top={} pass_prefix={} bucket_prefix={} suffix={} passes={} buckets={} lanes={}",
            corpus.name(),
            layout.k,
            cfg.top_k,
            layout.pass_prefix,
            layout.bucket_prefix,
            layout.suffix,
            layout.passes(),
            layout.buckets(),
            orchestrator.lanes()
        );
    }

    let passes = layout.passes();
    while let Some(pass) = orchestrator.next_pass() {
        orchestrator
            .run_pass(corpus, pass)
            .with_context(|| format!("pass {} of {} failed", pass + 1, passes))?;
    }

    let output = orchestrator.finish()?;
    if stats {
        let s = &output.scan;
        eprintln!(
            "KIRA_STATS reads={} short_reads={} bases={} windows={} invalid_windows={} counted={}",
            s.records, s.short_records, s.bases, s.windows, s.invalid_windows, s.counted
        );
    }
    log_stage(stats, "engine.total", t_total);
    Ok(output)
}

//! Worker-pool quantification loop and result emission.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use log::{info, warn};

use crate::cluster::{project_cluster_counts, ClusterForest};
use crate::em::{process_mini_batch, ForgettingMass};
use crate::index::KmerIndex;
use crate::io::{PairedReader, ReadRecord};
use crate::map::{Alignment, PairMapper};
use crate::math::LOG_0;
use crate::transcript::Transcript;
use crate::{Error, Result};

/// Read pairs handed to a worker as one mini-batch.
type ReadPairJob = Vec<(ReadRecord, ReadRecord)>;

const DEFAULT_JOB_SIZE: usize = 2000;
const PROGRESS_INTERVAL: u64 = 50_000;

pub fn default_thread_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

pub struct QuantConfig {
    pub num_threads: usize,
    pub job_size: usize,
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            num_threads: default_thread_count(),
            job_size: DEFAULT_JOB_SIZE,
        }
    }
}

/// Totals accumulated across the worker pool.
#[derive(Debug, Default)]
pub struct QuantStats {
    num_read_pairs: AtomicU64,
    num_mapped_pairs: AtomicU64,
    num_oversaturated: AtomicU64,
    num_zero_probability: AtomicU64,
    left_bases: AtomicU64,
    right_bases: AtomicU64,
}

impl QuantStats {
    pub fn num_read_pairs(&self) -> u64 {
        self.num_read_pairs.load(Ordering::Acquire)
    }

    pub fn num_mapped_pairs(&self) -> u64 {
        self.num_mapped_pairs.load(Ordering::Acquire)
    }

    pub fn num_oversaturated(&self) -> u64 {
        self.num_oversaturated.load(Ordering::Acquire)
    }

    pub fn num_zero_probability(&self) -> u64 {
        self.num_zero_probability.load(Ordering::Acquire)
    }

    pub fn total_bases(&self) -> (u64, u64) {
        (
            self.left_bases.load(Ordering::Acquire),
            self.right_bases.load(Ordering::Acquire),
        )
    }
}

/// Stream every read pair through the mapper and the online EM.
///
/// The reader is drained on the calling thread into a bounded job queue;
/// `num_threads` scoped workers compete for jobs, each mapping its reads and
/// folding the resulting mini-batch into the shared transcript table and
/// cluster forest.
pub fn quantify(
    index: &KmerIndex,
    transcripts: &[Transcript],
    forest: &ClusterForest,
    pairs: &mut PairedReader,
    config: &QuantConfig,
) -> Result<QuantStats> {
    let num_threads = config.num_threads.max(1);
    let job_size = config.job_size.max(1);
    let stats = QuantStats::default();
    let forgetting_mass = ForgettingMass::new();
    let mut read_error: Option<Error> = None;

    let (tx, rx) = bounded::<ReadPairJob>(4 * num_threads);

    thread::scope(|scope| {
        for _ in 0..num_threads {
            let rx = rx.clone();
            let stats = &stats;
            let forgetting_mass = &forgetting_mass;
            scope.spawn(move || {
                let mut mapper = PairMapper::new(index.k());
                let mut batch: Vec<Vec<Alignment>> = Vec::new();
                let mut warned_zero_probability = false;
                for job in rx.iter() {
                    batch.clear();
                    for (left, right) in &job {
                        let mut alignments = Vec::new();
                        let map_result = mapper.map_pair(
                            index,
                            transcripts.len(),
                            &left.seq,
                            &right.seq,
                            &mut alignments,
                        );

                        let pair_count =
                            stats.num_read_pairs.fetch_add(1, Ordering::AcqRel) + 1;
                        stats
                            .left_bases
                            .fetch_add(left.seq.len() as u64, Ordering::AcqRel);
                        stats
                            .right_bases
                            .fetch_add(right.seq.len() as u64, Ordering::AcqRel);
                        if map_result.oversaturated {
                            stats.num_oversaturated.fetch_add(1, Ordering::AcqRel);
                        }
                        if !alignments.is_empty() {
                            stats.num_mapped_pairs.fetch_add(1, Ordering::AcqRel);
                            let inv_hits = 1.0 / map_result.total_score as f64;
                            for aln in &alignments {
                                transcripts[aln.transcript_id as usize]
                                    .add_shared_count(aln.kmer_count as f64 * inv_hits);
                            }
                        }
                        if pair_count % PROGRESS_INTERVAL == 0 {
                            info!("processed {pair_count} read pairs");
                        }

                        batch.push(alignments);
                    }

                    let log_forgetting_mass = forgetting_mass.advance();
                    let summary = process_mini_batch(
                        log_forgetting_mass,
                        &mut batch,
                        transcripts,
                        forest,
                    );
                    if summary.zero_probability_reads > 0 {
                        stats
                            .num_zero_probability
                            .fetch_add(summary.zero_probability_reads, Ordering::AcqRel);
                        if !warned_zero_probability {
                            warn!("skipped zero-probability read pairs in this worker");
                            warned_zero_probability = true;
                        }
                    }
                }
            });
        }
        drop(rx);

        let mut job: ReadPairJob = Vec::with_capacity(job_size);
        while let Some(pair) = pairs.next_pair() {
            match pair {
                Ok((left, right)) => {
                    job.push((left, right));
                    if job.len() >= job_size {
                        let full = std::mem::replace(&mut job, Vec::with_capacity(job_size));
                        if tx.send(full).is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    read_error = Some(err);
                    break;
                }
            }
        }
        if read_error.is_none() && !job.is_empty() {
            let _ = tx.send(job);
        }
        drop(tx);
    });

    match read_error {
        Some(err) => Err(err),
        None => {
            info!(
                "processed {} read pairs, {} with candidate transcripts",
                stats.num_read_pairs(),
                stats.num_mapped_pairs()
            );
            Ok(stats)
        }
    }
}

/// Project every cluster and write `quant.sf`.
pub fn write_quant_sf(
    path: &Path,
    transcripts: &[Transcript],
    forest: &ClusterForest,
    total_read_pairs: u64,
) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, "# SDAFish v0.01")?;
    writeln!(out, "# ClusterID\tName\tLength\tFPKM\tNumReads")?;

    let log_billion = 1_000_000_000.0f64.ln();
    let log_num_fragments = (total_read_pairs as f64).ln();

    for (cluster_id, cluster) in forest.clusters().iter().enumerate() {
        if cluster.log_mass == LOG_0 {
            warn!("cluster {cluster_id} has 0 mass");
        }
        project_cluster_counts(cluster, transcripts);

        for &transcript_id in &cluster.members {
            let t = &transcripts[transcript_id as usize];
            let log_length = (t.ref_length as f64).ln();
            let fpkm_factor = (log_billion - log_length - log_num_fragments).exp();
            let count = t.projected_counts();
            let fpkm = if count > 0.0 { fpkm_factor * count } else { 0.0 };
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                cluster_id,
                t.name,
                t.ref_length,
                fpkm,
                t.total_count(),
                t.unique_count(),
                count,
                t.mass()
            )?;
        }
    }
    Ok(())
}

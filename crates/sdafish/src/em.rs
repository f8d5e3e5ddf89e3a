//! Mini-batch online EM over mapped read pairs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::warn;

use crate::cluster::ClusterForest;
use crate::map::Alignment;
use crate::math::{log_add, LOG_0, LOG_1};
use crate::transcript::Transcript;

/// Exponent of the Robbins-Monro-style forgetting schedule.
pub const FORGETTING_FACTOR: f64 = 0.65;

/// Decaying log-weight applied to each completed mini-batch.
///
/// After batch `n > 1` the accumulated mass is
/// `sum_{i=2..n} (phi*ln(i-1) - ln(i^phi - 1))`. The counter is advanced with
/// a fetch-add; the O(1) arithmetic update runs under a mutex.
pub struct ForgettingMass {
    batches: AtomicU64,
    log_mass: Mutex<f64>,
}

impl Default for ForgettingMass {
    fn default() -> Self {
        Self::new()
    }
}

impl ForgettingMass {
    pub fn new() -> Self {
        Self {
            batches: AtomicU64::new(0),
            log_mass: Mutex::new(LOG_1),
        }
    }

    /// Record one completed batch and return the forgetting mass to apply
    /// to it.
    pub fn advance(&self) -> f64 {
        let n = self.batches.fetch_add(1, Ordering::AcqRel) + 1;
        let mut log_mass = self.log_mass.lock().unwrap();
        if n > 1 {
            let n = n as f64;
            *log_mass += FORGETTING_FACTOR * (n - 1.0).ln() - (n.powf(FORGETTING_FACTOR) - 1.0).ln();
        }
        *log_mass
    }

    pub fn completed_batches(&self) -> u64 {
        self.batches.load(Ordering::Acquire)
    }
}

/// Per-batch outcome counters reported back to the worker.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchSummary {
    pub zero_probability_reads: u64,
}

/// One E-step and M-step over a mini-batch of per-read alignment groups.
///
/// The E-step distributes each read's mass over its candidates in proportion
/// to `kmer_count^2 * mass / ref_length`, normalizes within the read, and
/// books unique/total counts and cluster updates. The M-step folds the
/// batch's normalized hit mass, weighted by the forgetting mass, into each
/// observed transcript.
pub fn process_mini_batch(
    log_forgetting_mass: f64,
    batch: &mut [Vec<Alignment>],
    transcripts: &[Transcript],
    forest: &ClusterForest,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let mut observed: HashSet<u32> = HashSet::new();

    // E-step
    for group in batch.iter_mut() {
        if group.is_empty() {
            continue;
        }
        observed.clear();
        let first_transcript = group[0].transcript_id;
        let mut transcript_unique = true;
        let mut sum_of_align_probs = LOG_0;
        for aln in group.iter_mut() {
            let tid = aln.transcript_id;
            transcript_unique = transcript_unique && tid == first_transcript;
            let transcript = match transcripts.get(tid as usize) {
                Some(t) => t,
                None => {
                    warn!("transcript id {tid} out of bounds in E-step; dropping alignment");
                    aln.log_prob = LOG_0;
                    continue;
                }
            };
            let ref_length = transcript.ref_length.max(1) as f64;
            let log_count = transcript.mass();
            if log_count != LOG_0 {
                aln.log_prob =
                    (aln.kmer_count as f64).powi(2).ln() + (log_count - ref_length.ln());
                sum_of_align_probs = log_add(sum_of_align_probs, aln.log_prob);
                if observed.insert(tid) {
                    transcript.add_total_count(1);
                }
            } else {
                aln.log_prob = LOG_0;
            }
        }

        if sum_of_align_probs == LOG_0 {
            summary.zero_probability_reads += 1;
            continue;
        }
        for aln in group.iter_mut() {
            aln.log_prob -= sum_of_align_probs;
        }

        if first_transcript as usize >= transcripts.len() {
            continue;
        }
        if transcript_unique {
            transcripts[first_transcript as usize].add_unique_count(1);
            forest.update_cluster(first_transcript, 1, log_forgetting_mass);
        } else {
            forest.merge_clusters(
                group
                    .iter()
                    .map(|aln| aln.transcript_id)
                    .filter(|&tid| (tid as usize) < transcripts.len()),
            );
            forest.update_cluster(first_transcript, 1, log_forgetting_mass);
        }
    }

    // M-step
    let mut hit_mass: HashMap<u32, f64> = HashMap::new();
    for group in batch.iter() {
        for aln in group {
            if aln.log_prob.is_nan() {
                warn!(
                    "non-finite alignment probability for transcript {}; dropping",
                    aln.transcript_id
                );
                continue;
            }
            if aln.transcript_id as usize >= transcripts.len() {
                continue;
            }
            let entry = hit_mass.entry(aln.transcript_id).or_insert(LOG_0);
            *entry = log_add(*entry, aln.log_prob);
        }
    }
    for (tid, mass) in hit_mass {
        let update_mass = log_forgetting_mass + mass;
        transcripts[tid as usize].add_mass(update_mass);
    }

    summary
}

//! Per-read k-mer voting and candidate transcript scoring.

use std::collections::HashMap;

use log::warn;

use crate::index::{location_offset, location_transcript, KmerIndex};
use crate::kmer::KmerCodec;
use crate::math::LOG_0;

/// Fraction of a read end that must be covered by k-mer votes.
pub const COVERAGE_FRACTION: f64 = 0.80;
/// A read pair mapping to more transcripts than this is discarded outright.
pub const MAX_CANDIDATES: usize = 100;
/// Votes within this many bases of a cluster's start are absorbed into it.
const CLUSTER_SLOP: u32 = 10;

/// One candidate mapping of a read pair to a transcript. `log_prob` is
/// assigned by the E-step and stays `LOG_0` until then.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub transcript_id: u32,
    pub kmer_count: u32,
    pub log_prob: f64,
}

impl Alignment {
    pub fn new(transcript_id: u32, kmer_count: u32) -> Self {
        Self {
            transcript_id,
            kmer_count,
            log_prob: LOG_0,
        }
    }
}

/// A single k-mer's claim about where the read starts on a transcript.
#[derive(Debug, Clone, Copy)]
pub struct KmerVote {
    pub vote_pos: u32,
    pub read_pos: u32,
}

/// Votes from one read end against one transcript, plus the best hit found
/// by `compute_best_hit`.
#[derive(Debug, Default)]
pub struct TranscriptHitList {
    pub votes: Vec<KmerVote>,
    pub best_pos: u32,
    pub best_score: u32,
}

impl TranscriptHitList {
    /// Vote from a forward-strand k-mer hit at transcript offset `tpos`.
    pub fn add_vote(&mut self, tpos: u32, read_pos: u32) {
        let vote_pos = if read_pos > tpos { 0 } else { tpos - read_pos };
        self.votes.push(KmerVote { vote_pos, read_pos });
    }

    /// Vote from a reverse-complement k-mer hit.
    pub fn add_vote_rc(&mut self, tpos: u32, read_pos: u32) {
        let vote_pos = if read_pos > tpos { 0 } else { tpos + read_pos };
        self.votes.push(KmerVote { vote_pos, read_pos });
    }

    pub fn total_votes(&self) -> usize {
        self.votes.len()
    }

    /// Greedy single-pass clustering of the sorted votes. The cluster with
    /// the most covered read bases wins; its coverage becomes `best_score`.
    pub fn compute_best_hit(&mut self, k: u32) {
        if self.votes.is_empty() {
            self.best_pos = 0;
            self.best_score = 0;
            return;
        }
        self.votes.sort_by(|a, b| {
            (a.vote_pos, a.read_pos).cmp(&(b.vote_pos, b.read_pos))
        });

        struct ClusterInfo {
            coverage: u32,
            right_edge: u32,
        }

        let mut clusters: HashMap<u32, ClusterInfo> = HashMap::new();
        let mut curr_cluster = self.votes[0].vote_pos;
        let mut best_pos = 0u32;
        let mut best_score = 0u32;
        for vote in &self.votes {
            if vote.vote_pos.saturating_sub(curr_cluster) > CLUSTER_SLOP {
                curr_cluster = vote.vote_pos;
            }
            let entry = clusters.entry(curr_cluster).or_insert(ClusterInfo {
                coverage: 0,
                right_edge: 0,
            });
            let covered_end = vote.read_pos + k;
            entry.coverage += covered_end.saturating_sub(entry.right_edge).min(k);
            entry.right_edge = covered_end;
            if entry.coverage > best_score {
                best_score = entry.coverage;
                best_pos = curr_cluster;
            }
        }

        self.best_pos = best_pos;
        self.best_score = best_score;
    }
}

/// Result of mapping one read pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct PairMapResult {
    /// Sum of the combined scores of all emitted candidates.
    pub total_score: u64,
    /// True when the pair was dropped for exceeding `MAX_CANDIDATES`.
    pub oversaturated: bool,
}

/// Maps read pairs to candidate transcripts.
///
/// The per-transcript hit maps are the dominant allocation on this path, so
/// one mapper is kept per worker and the maps are cleared between reads
/// rather than rebuilt.
pub struct PairMapper {
    codec: KmerCodec,
    left_hits: HashMap<u32, TranscriptHitList>,
    right_hits: HashMap<u32, TranscriptHitList>,
    bad_transcript_ids: u64,
}

impl PairMapper {
    pub fn new(k: u32) -> Self {
        Self {
            codec: KmerCodec::new(k),
            left_hits: HashMap::new(),
            right_hits: HashMap::new(),
            bad_transcript_ids: 0,
        }
    }

    /// Map one read pair, appending passing candidates to `out`.
    ///
    /// Both forward and reverse-complement k-mer hits for an end vote into
    /// that end's hit map; each end must cover at least `COVERAGE_FRACTION`
    /// of its read for a transcript to survive.
    pub fn map_pair(
        &mut self,
        index: &KmerIndex,
        num_transcripts: usize,
        left: &[u8],
        right: &[u8],
        out: &mut Vec<Alignment>,
    ) -> PairMapResult {
        out.clear();
        self.left_hits.clear();
        self.right_hits.clear();

        self.collect_end(index, num_transcripts, left, true);
        self.collect_end(index, num_transcripts, right, false);

        let k = self.codec.k();
        for hit_list in self.left_hits.values_mut() {
            hit_list.compute_best_hit(k);
        }

        let cutoff_left = COVERAGE_FRACTION * left.len() as f64;
        let cutoff_right = COVERAGE_FRACTION * right.len() as f64;

        let mut result = PairMapResult::default();
        for (&transcript_id, right_list) in self.right_hits.iter_mut() {
            let left_list = match self.left_hits.get(&transcript_id) {
                Some(list) => list,
                None => continue,
            };
            if (left_list.best_score as f64) < cutoff_left {
                continue;
            }
            right_list.compute_best_hit(k);
            if (right_list.best_score as f64) < cutoff_right {
                continue;
            }
            let score = left_list.best_score + right_list.best_score;
            out.push(Alignment::new(transcript_id, score));
            result.total_score += score as u64;
        }

        if out.len() > MAX_CANDIDATES {
            out.clear();
            result.oversaturated = true;
        }
        result
    }

    fn collect_end(
        &mut self,
        index: &KmerIndex,
        num_transcripts: usize,
        seq: &[u8],
        left_end: bool,
    ) {
        let k = self.codec.k();
        self.codec.reset();
        let hits = if left_end {
            &mut self.left_hits
        } else {
            &mut self.right_hits
        };
        for (pos, &base) in seq.iter().enumerate() {
            let (fwd, rev) = match self.codec.push(base) {
                Some(pair) => pair,
                None => continue,
            };
            let read_pos = (pos + 1) as u32 - k;
            for &loc in index.locations(fwd) {
                let transcript_id = location_transcript(loc);
                if transcript_id as usize >= num_transcripts {
                    if self.bad_transcript_ids == 0 {
                        warn!("transcript id {transcript_id} out of bounds; skipping hit");
                    }
                    self.bad_transcript_ids += 1;
                    continue;
                }
                hits.entry(transcript_id)
                    .or_default()
                    .add_vote(location_offset(loc), read_pos);
            }
            for &loc in index.locations(rev) {
                let transcript_id = location_transcript(loc);
                if transcript_id as usize >= num_transcripts {
                    if self.bad_transcript_ids == 0 {
                        warn!("transcript id {transcript_id} out of bounds; skipping hit");
                    }
                    self.bad_transcript_ids += 1;
                    continue;
                }
                hits.entry(transcript_id)
                    .or_default()
                    .add_vote_rc(location_offset(loc), read_pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::pack_location;
    use crate::kmer::encode;

    const K: u32 = 5;

    /// Forward-index every k-mer of every transcript.
    fn build_index(transcripts: &[&[u8]]) -> KmerIndex {
        let mut by_kmer: HashMap<u64, Vec<u64>> = HashMap::new();
        for (tid, seq) in transcripts.iter().enumerate() {
            for pos in 0..=seq.len().saturating_sub(K as usize) {
                if let Some(code) = encode(&seq[pos..pos + K as usize]) {
                    by_kmer
                        .entry(code)
                        .or_default()
                        .push(pack_location(tid as u32, pos as u32));
                }
            }
        }
        let mut keys: Vec<u64> = by_kmer.keys().copied().collect();
        keys.sort_unstable();
        let mut offsets = Vec::with_capacity(keys.len() + 1);
        let mut locs = Vec::new();
        offsets.push(0u64);
        for key in &keys {
            locs.extend_from_slice(&by_kmer[key]);
            offsets.push(locs.len() as u64);
        }
        KmerIndex::from_parts(K, keys, offsets, locs).expect("valid index")
    }

    /// Pseudo-random sequence in which every k-mer occurs exactly once, so
    /// coverage scores are exact.
    fn distinct_seq(len: usize, seed: u64) -> Vec<u8> {
        let bases = [b'A', b'C', b'G', b'T'];
        let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15).max(1);
        let mut step = || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as usize & 3
        };
        let revcomp_code = |code: u64| -> u64 {
            let mut rc = 0u64;
            for i in 0..K {
                rc = (rc << 2) | (3 - ((code >> (2 * i)) & 3));
            }
            rc
        };
        let mut seq: Vec<u8> = (0..K as usize).map(|_| bases[step()]).collect();
        let mut seen = std::collections::HashSet::new();
        let first = encode(&seq).unwrap();
        seen.insert(first);
        seen.insert(revcomp_code(first));
        while seq.len() < len {
            let offset = step();
            let extended = (0..4).find_map(|i| {
                let base = bases[(offset + i) & 3];
                seq.push(base);
                let code = encode(&seq[seq.len() - K as usize..]).unwrap();
                if !seen.contains(&code) && !seen.contains(&revcomp_code(code)) {
                    seen.insert(code);
                    seen.insert(revcomp_code(code));
                    Some(base)
                } else {
                    seq.pop();
                    None
                }
            });
            assert!(extended.is_some(), "ran out of fresh k-mers");
        }
        seq
    }

    #[test]
    fn consistent_votes_cover_the_read() {
        let mut hits = TranscriptHitList::default();
        // Read of length 15 starting at transcript offset 30.
        for read_pos in 0..=10u32 {
            hits.add_vote(30 + read_pos, read_pos);
        }
        hits.compute_best_hit(K);
        assert_eq!(hits.best_pos, 30);
        assert_eq!(hits.best_score, 15);
    }

    #[test]
    fn distant_votes_form_separate_clusters() {
        let mut hits = TranscriptHitList::default();
        hits.add_vote(10, 0);
        hits.add_vote(100, 0);
        hits.add_vote(101, 1);
        hits.compute_best_hit(K);
        assert_eq!(hits.best_pos, 100);
        assert_eq!(hits.best_score, K + 1);
    }

    #[test]
    fn vote_before_read_start_clamps_to_zero() {
        let mut hits = TranscriptHitList::default();
        hits.add_vote(2, 7);
        assert_eq!(hits.votes[0].vote_pos, 0);
        let mut hits = TranscriptHitList::default();
        hits.add_vote_rc(4, 9);
        assert_eq!(hits.votes[0].vote_pos, 0);
    }

    #[test]
    fn pair_maps_to_source_transcript() {
        let seq = distinct_seq(80, 3);
        let index = build_index(&[&seq]);
        let mut mapper = PairMapper::new(K);
        let mut out = Vec::new();
        let result = mapper.map_pair(&index, 1, &seq[0..20], &seq[50..70], &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].transcript_id, 0);
        assert!(!result.oversaturated);
        assert_eq!(result.total_score as u32, out[0].kmer_count);
        // Full-length coverage on both ends.
        assert_eq!(out[0].kmer_count, 40);
    }

    #[test]
    fn low_coverage_end_fails_the_cutoff() {
        let seq = distinct_seq(80, 7);
        let index = build_index(&[&seq]);
        let mut mapper = PairMapper::new(K);
        let mut out = Vec::new();
        // The right end matches the transcript for only 14 of 20 bases
        // (70% < 80% cutoff): its tail is ambiguous and produces no votes.
        let mut right = seq[50..64].to_vec();
        right.extend_from_slice(b"NNNNNN");
        mapper.map_pair(&index, 1, &seq[0..20], &right, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn oversaturated_pair_is_dropped() {
        let seq = distinct_seq(60, 11);
        let copies: Vec<&[u8]> = (0..150).map(|_| seq.as_slice()).collect();
        let index = build_index(&copies);
        let mut mapper = PairMapper::new(K);
        let mut out = Vec::new();
        let result = mapper.map_pair(&index, copies.len(), &seq[0..20], &seq[30..50], &mut out);
        assert!(result.oversaturated);
        assert!(out.is_empty());
    }
}

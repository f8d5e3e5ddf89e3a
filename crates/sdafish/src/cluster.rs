//! Disjoint-set forest over transcripts, merged by ambiguous reads.

use std::sync::Mutex;

use log::debug;

use crate::math::{log_add, LOG_0};
use crate::transcript::Transcript;

/// A root cluster snapshot taken after quantification.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub members: Vec<u32>,
    pub log_mass: f64,
    pub hit_count: u64,
}

/// Union-find with path compression and union-by-rank. Mass and hit counts
/// live only at roots; unions transfer them. The whole forest sits behind a
/// single mutex held across one find/union/update at a time.
pub struct ClusterForest {
    inner: Mutex<Forest>,
}

struct Forest {
    parent: Vec<u32>,
    rank: Vec<u32>,
    log_mass: Vec<f64>,
    hit_count: Vec<u64>,
    members: Vec<Vec<u32>>,
}

impl Forest {
    fn find(&mut self, t: u32) -> u32 {
        let mut root = t;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cursor = t;
        while self.parent[cursor as usize] != root {
            let next = self.parent[cursor as usize];
            self.parent[cursor as usize] = root;
            cursor = next;
        }
        root
    }

    fn union(&mut self, a: u32, b: u32) -> u32 {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return ra;
        }
        let (parent, child) = if self.rank[ra as usize] >= self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        if self.rank[parent as usize] == self.rank[child as usize] {
            self.rank[parent as usize] += 1;
        }
        self.parent[child as usize] = parent;
        self.log_mass[parent as usize] = log_add(
            self.log_mass[parent as usize],
            self.log_mass[child as usize],
        );
        self.log_mass[child as usize] = LOG_0;
        self.hit_count[parent as usize] += self.hit_count[child as usize];
        self.hit_count[child as usize] = 0;
        let moved = std::mem::take(&mut self.members[child as usize]);
        self.members[parent as usize].extend(moved);
        parent
    }
}

impl ClusterForest {
    pub fn new(num_transcripts: usize) -> Self {
        Self {
            inner: Mutex::new(Forest {
                parent: (0..num_transcripts as u32).collect(),
                rank: vec![0; num_transcripts],
                log_mass: vec![LOG_0; num_transcripts],
                hit_count: vec![0; num_transcripts],
                members: (0..num_transcripts as u32).map(|t| vec![t]).collect(),
            }),
        }
    }

    /// Root of the cluster containing `t`.
    pub fn find(&self, t: u32) -> u32 {
        self.inner.lock().unwrap().find(t)
    }

    /// Merge the clusters of every transcript in `transcript_ids` into one.
    pub fn merge_clusters<I: IntoIterator<Item = u32>>(&self, transcript_ids: I) {
        let mut forest = self.inner.lock().unwrap();
        let mut iter = transcript_ids.into_iter();
        let mut root = match iter.next() {
            Some(first) => forest.find(first),
            None => return,
        };
        for t in iter {
            root = forest.union(root, t);
        }
    }

    /// Add `hits` and log-add `log_mass_inc` at the cluster of `t`.
    pub fn update_cluster(&self, t: u32, hits: u64, log_mass_inc: f64) {
        let mut forest = self.inner.lock().unwrap();
        let root = forest.find(t);
        forest.log_mass[root as usize] =
            log_add(forest.log_mass[root as usize], log_mass_inc);
        forest.hit_count[root as usize] += hits;
    }

    /// Snapshot every root cluster, in ascending root id order.
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut forest = self.inner.lock().unwrap();
        let n = forest.parent.len();
        let mut out = Vec::new();
        for t in 0..n as u32 {
            if forest.find(t) == t {
                out.push(Cluster {
                    members: forest.members[t as usize].clone(),
                    log_mass: forest.log_mass[t as usize],
                    hit_count: forest.hit_count[t as usize],
                });
            }
        }
        out
    }
}

/// Distribute a cluster's hit count over its members and store the result in
/// each transcript's `projected_counts`.
///
/// The initial split is proportional to member mass. When that violates a
/// member's `[unique_count, total_count]` box, the counts are projected onto
/// the box while preserving the cluster total: violators are clamped to the
/// nearest bound and the residual is redistributed proportionally across the
/// still-free members until a fixed point.
pub fn project_cluster_counts(cluster: &Cluster, transcripts: &[Transcript]) {
    if cluster.members.is_empty() || cluster.hit_count == 0 {
        for &t in &cluster.members {
            transcripts[t as usize].set_projected_counts(0.0);
        }
        return;
    }

    let total_hits = cluster.hit_count as f64;
    let log_mass_sum = cluster
        .members
        .iter()
        .fold(LOG_0, |acc, &t| log_add(acc, transcripts[t as usize].mass()));

    let mut counts: Vec<f64> = cluster
        .members
        .iter()
        .map(|&t| {
            let mass = transcripts[t as usize].mass();
            if log_mass_sum == LOG_0 {
                0.0
            } else {
                (mass - log_mass_sum + total_hits.ln()).exp()
            }
        })
        .collect();

    let lower: Vec<f64> = cluster
        .members
        .iter()
        .map(|&t| transcripts[t as usize].unique_count() as f64)
        .collect();
    let upper: Vec<f64> = cluster
        .members
        .iter()
        .map(|&t| transcripts[t as usize].total_count() as f64)
        .collect();

    let violates = |counts: &[f64]| {
        counts
            .iter()
            .zip(lower.iter().zip(upper.iter()))
            .any(|(&c, (&lo, &hi))| c < lo || c > hi)
    };

    if cluster.members.len() > 1 && violates(&counts) {
        project_to_box(&mut counts, &lower, &upper, total_hits);
    }

    for (&t, &count) in cluster.members.iter().zip(counts.iter()) {
        transcripts[t as usize].set_projected_counts(count);
    }
}

/// Capped-simplex projection: clamp out-of-box entries and rescale the free
/// ones so the total stays `target`. Each round fixes at least one entry, so
/// the loop runs at most `counts.len()` times.
fn project_to_box(counts: &mut [f64], lower: &[f64], upper: &[f64], target: f64) {
    let n = counts.len();
    let mut fixed = vec![false; n];
    for _ in 0..n {
        let mut clamped_any = false;
        for i in 0..n {
            if fixed[i] {
                continue;
            }
            if counts[i] < lower[i] {
                counts[i] = lower[i];
                fixed[i] = true;
                clamped_any = true;
            } else if counts[i] > upper[i] {
                counts[i] = upper[i];
                fixed[i] = true;
                clamped_any = true;
            }
        }
        if !clamped_any {
            return;
        }
        let fixed_sum: f64 = (0..n).filter(|&i| fixed[i]).map(|i| counts[i]).sum();
        let free_sum: f64 = (0..n).filter(|&i| !fixed[i]).map(|i| counts[i]).sum();
        let residual = target - fixed_sum;
        if free_sum <= 0.0 || residual <= 0.0 {
            // Nothing left to scale; the box itself is infeasible for this
            // target, leave the clamped values in place.
            if (0..n).any(|i| !fixed[i]) {
                debug!("cluster projection left {residual} unassigned hits");
                for i in 0..n {
                    if !fixed[i] {
                        counts[i] = lower[i].max(0.0);
                    }
                }
            }
            return;
        }
        let scale = residual / free_sum;
        for i in 0..n {
            if !fixed[i] {
                counts[i] *= scale;
            }
        }
    }
}

//! Per-transcript accumulators shared across workers.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::math::{log_add, LOG_1};

/// An `f64` cell updated through compare-and-swap on its bit pattern.
struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Release);
    }

    fn update<F: Fn(f64) -> f64>(&self, f: F) {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let next = f(f64::from_bits(current)).to_bits();
            match self.bits.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// A reference transcript and its concurrently-updated counters.
///
/// `unique_count` counts reads whose every alignment named this transcript;
/// `total_count` counts reads that named it at all, so
/// `unique_count <= total_count` at all times. `log_mass` starts at a unit
/// prior so the first mini-batch sees a non-degenerate abundance.
pub struct Transcript {
    pub id: u32,
    pub name: String,
    pub ref_length: u32,
    unique_count: AtomicU64,
    total_count: AtomicU64,
    shared_count: AtomicF64,
    log_mass: AtomicF64,
    projected_counts: AtomicF64,
}

impl Transcript {
    pub fn new(id: u32, name: String, ref_length: u32) -> Self {
        Self {
            id,
            name,
            ref_length,
            unique_count: AtomicU64::new(0),
            total_count: AtomicU64::new(0),
            shared_count: AtomicF64::new(0.0),
            log_mass: AtomicF64::new(LOG_1),
            projected_counts: AtomicF64::new(0.0),
        }
    }

    pub fn add_unique_count(&self, n: u64) {
        self.unique_count.fetch_add(n, Ordering::AcqRel);
    }

    pub fn add_total_count(&self, n: u64) {
        self.total_count.fetch_add(n, Ordering::AcqRel);
    }

    pub fn unique_count(&self) -> u64 {
        self.unique_count.load(Ordering::Acquire)
    }

    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Acquire)
    }

    pub fn add_shared_count(&self, amount: f64) {
        self.shared_count.update(|v| v + amount);
    }

    pub fn shared_count(&self) -> f64 {
        self.shared_count.load()
    }

    /// Log-add `log_mass_inc` into the transcript's accumulated mass.
    pub fn add_mass(&self, log_mass_inc: f64) {
        self.log_mass.update(|v| log_add(v, log_mass_inc));
    }

    pub fn mass(&self) -> f64 {
        self.log_mass.load()
    }

    pub fn set_projected_counts(&self, counts: f64) {
        self.projected_counts.store(counts);
    }

    pub fn projected_counts(&self) -> f64 {
        self.projected_counts.load()
    }
}

/// Build the transcript table from loaded metadata.
pub fn build_transcript_table(infos: Vec<crate::index::TranscriptInfo>) -> Vec<Transcript> {
    infos
        .into_iter()
        .map(|info| Transcript::new(info.id, info.name, info.length))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::LOG_0;

    #[test]
    fn counters_accumulate() {
        let t = Transcript::new(0, "t0".into(), 100);
        t.add_total_count(2);
        t.add_unique_count(1);
        t.add_shared_count(0.25);
        t.add_shared_count(0.75);
        assert_eq!(t.total_count(), 2);
        assert_eq!(t.unique_count(), 1);
        assert!((t.shared_count() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn mass_accumulates_in_log_space() {
        let t = Transcript::new(0, "t0".into(), 100);
        assert_eq!(t.mass(), LOG_1);
        t.add_mass(0.0);
        // exp(0) + exp(0) = 2
        assert!((t.mass() - 2.0f64.ln()).abs() < 1e-12);
        t.add_mass(LOG_0);
        assert!((t.mass() - 2.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn concurrent_mass_updates_commute() {
        let t = Transcript::new(0, "t0".into(), 100);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        t.add_mass(0.0);
                    }
                });
            }
        });
        // prior + 4000 unit masses
        assert!((t.mass() - 4001.0f64.ln()).abs() < 1e-9);
    }
}

// Work counters for the hierarchical search, per worker, merged into a
// shared aggregator under a mutex at the end of each worker's run.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, Default)]
pub struct HiMetrics {
    /// Hybrid-search invocations.
    pub local_atts: u64,
    /// Anchors taken through bidirectional extension.
    pub anchor_atts: u64,
    /// Local FM-index probes.
    pub local_index_atts: u64,
    /// Direct-comparison extension attempts.
    pub local_ext_atts: u64,
    /// Recursion steps of the hybrid search.
    pub local_search_recur: u64,
    /// SA elements resolved through the global index.
    pub global_genome_coords: u64,
    /// SA elements resolved through local indexes.
    pub local_genome_coords: u64,
    /// Burrows-Wheeler operations.
    pub bwops: u64,
}

impl HiMetrics {
    pub fn merge(&mut self, other: &HiMetrics) {
        self.local_atts += other.local_atts;
        self.anchor_atts += other.anchor_atts;
        self.local_index_atts += other.local_index_atts;
        self.local_ext_atts += other.local_ext_atts;
        self.local_search_recur += other.local_search_recur;
        self.global_genome_coords += other.global_genome_coords;
        self.local_genome_coords += other.local_genome_coords;
        self.bwops += other.bwops;
    }
}

/// Thread-shared metrics accumulator.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    inner: Mutex<HiMetrics>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        MetricsAggregator::default()
    }

    pub fn merge(&self, m: &HiMetrics) {
        self.inner.lock().unwrap().merge(m);
    }

    pub fn snapshot(&self) -> HiMetrics {
        *self.inner.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds() {
        let agg = MetricsAggregator::new();
        let mut a = HiMetrics::default();
        a.local_atts = 3;
        a.bwops = 10;
        agg.merge(&a);
        agg.merge(&a);
        let s = agg.snapshot();
        assert_eq!(s.local_atts, 6);
        assert_eq!(s.bwops, 20);
    }
}

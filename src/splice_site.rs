// Splice-site store and junction plausibility models.
//
// Known sites come from an annotation file; novel sites are inserted as
// spliced alignments are reported and become visible to later reads. The
// store is sharded into per-position buckets, each behind its own mutex, so
// concurrent workers contend only when touching the same genomic
// neighbourhood.

use crate::edit::SpliceDir;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Bases of upstream exon in the donor PWM window.
pub const DONOR_EXONIC_LEN: usize = 3;
/// Bases of intron start in the donor PWM window.
pub const DONOR_INTRONIC_LEN: usize = 5;
/// Bases of intron end in the acceptor PWM window.
pub const ACCEPTOR_INTRONIC_LEN: usize = 5;
/// Bases of downstream exon in the acceptor PWM window.
pub const ACCEPTOR_EXONIC_LEN: usize = 3;

const DONOR_WINDOW: usize = DONOR_EXONIC_LEN + DONOR_INTRONIC_LEN;
const ACCEPTOR_WINDOW: usize = ACCEPTOR_INTRONIC_LEN + ACCEPTOR_EXONIC_LEN;

const BUCKET_SHIFT: u64 = 16;

/// One splice junction. `left` is the last base of the upstream exon,
/// `right` the first base of the downstream exon; the intron is the open
/// interval between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceSite {
    pub tidx: usize,
    pub left: u64,
    pub right: u64,
    pub dir: SpliceDir,
    /// Loaded from an annotation rather than discovered by a read.
    pub from_file: bool,
    /// Id of the read that discovered a novel site.
    pub read_id: u64,
}

impl SpliceSite {
    pub fn intron_len(&self) -> u64 {
        debug_assert!(self.right > self.left);
        self.right - self.left - 1
    }

    fn same_junction(&self, other: &SpliceSite) -> bool {
        self.tidx == other.tidx && self.left == other.left && self.right == other.right
    }
}

/// Bucket-sharded splice-site store.
pub struct SpliceSiteDb {
    /// buckets[tidx][bucket] guarded individually.
    buckets: Vec<Vec<Mutex<Vec<SpliceSite>>>>,
    count: AtomicUsize,
}

impl SpliceSiteDb {
    /// `contig_lens` sizes the bucket grid.
    pub fn new(contig_lens: &[u64]) -> Self {
        let buckets = contig_lens
            .iter()
            .map(|&len| {
                let n = ((len >> BUCKET_SHIFT) + 1) as usize;
                (0..n).map(|_| Mutex::new(Vec::new())).collect()
            })
            .collect();
        SpliceSiteDb {
            buckets,
            count: AtomicUsize::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count.load(Ordering::Relaxed) == 0
    }

    fn bucket_of(&self, tidx: usize, pos: u64) -> usize {
        ((pos >> BUCKET_SHIFT) as usize).min(self.buckets[tidx].len() - 1)
    }

    /// Insert a site; a junction already present is not duplicated. The site
    /// is indexed under both of its flanking positions.
    pub fn add(&self, site: SpliceSite) {
        if site.tidx >= self.buckets.len() || site.right <= site.left {
            return;
        }
        let bl = self.bucket_of(site.tidx, site.left);
        let br = self.bucket_of(site.tidx, site.right);
        {
            let mut b = self.buckets[site.tidx][bl].lock().unwrap();
            if b.iter().any(|s| s.same_junction(&site)) {
                return;
            }
            b.push(site);
        }
        if br != bl {
            let mut b = self.buckets[site.tidx][br].lock().unwrap();
            if !b.iter().any(|s| s.same_junction(&site)) {
                b.push(site);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Sites whose downstream-exon start (`right`) lies within
    /// `[right_max - window, right_max]`; candidates for extending an
    /// alignment leftward across the junction.
    pub fn left_splice_sites(
        &self,
        tidx: usize,
        right_max: u64,
        window: u64,
        out: &mut Vec<SpliceSite>,
    ) {
        out.clear();
        if tidx >= self.buckets.len() {
            return;
        }
        let lo = right_max.saturating_sub(window);
        let (b0, b1) = (self.bucket_of(tidx, lo), self.bucket_of(tidx, right_max));
        for bi in b0..=b1 {
            let b = self.buckets[tidx][bi].lock().unwrap();
            for s in b.iter() {
                if s.right >= lo && s.right <= right_max && !out.iter().any(|o| o.same_junction(s))
                {
                    out.push(*s);
                }
            }
        }
    }

    /// Sites whose upstream-exon end (`left`) lies within
    /// `[left_min, left_min + window]`; candidates for extending rightward.
    pub fn right_splice_sites(
        &self,
        tidx: usize,
        left_min: u64,
        window: u64,
        out: &mut Vec<SpliceSite>,
    ) {
        out.clear();
        if tidx >= self.buckets.len() {
            return;
        }
        let hi = left_min + window;
        let (b0, b1) = (self.bucket_of(tidx, left_min), self.bucket_of(tidx, hi));
        for bi in b0..=b1 {
            let b = self.buckets[tidx][bi].lock().unwrap();
            for s in b.iter() {
                if s.left >= left_min && s.left <= hi && !out.iter().any(|o| o.same_junction(s)) {
                    out.push(*s);
                }
            }
        }
    }

    /// Is any junction flank inside `[l1, r1]` or `[l2, r2]`?
    pub fn has_splice_sites(
        &self,
        tidx: usize,
        l1: u64,
        r1: u64,
        l2: u64,
        r2: u64,
        include_novel: bool,
    ) -> bool {
        if tidx >= self.buckets.len() || self.is_empty() {
            return false;
        }
        let ranges = [(l1, r1), (l2, r2)];
        for &(lo, hi) in &ranges {
            if hi < lo {
                continue;
            }
            let (b0, b1) = (self.bucket_of(tidx, lo), self.bucket_of(tidx, hi));
            for bi in b0..=b1 {
                let b = self.buckets[tidx][bi].lock().unwrap();
                for s in b.iter() {
                    if !include_novel && !s.from_file {
                        continue;
                    }
                    if (s.left >= lo && s.left <= hi) || (s.right >= lo && s.right <= hi) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// PWM probability that the packed donor/acceptor windows flank a real
    /// junction, in [0, 1]; 1.0 for the consensus sequence.
    pub fn probscore(donor_seq: u64, acceptor_seq: u64) -> f32 {
        let mut p = 1.0f32;
        for (i, row) in DONOR_PWM.iter().enumerate() {
            let base = ((donor_seq >> (2 * (DONOR_WINDOW - 1 - i))) & 3) as usize;
            p *= row[base];
        }
        for (i, row) in ACCEPTOR_PWM.iter().enumerate() {
            let base = ((acceptor_seq >> (2 * (ACCEPTOR_WINDOW - 1 - i))) & 3) as usize;
            p *= row[base];
        }
        p
    }
}

// Position weight matrices over [A, C, G, T], normalized per position by the
// consensus base so the consensus window scores 1.0. Donor window is
// exon[-3..] + intron[..5] (consensus ..AG|GTAAG), acceptor window is
// intron[-5..] + exon[..3] (consensus ..TYAG|G..).
lazy_static::lazy_static! {
    static ref DONOR_PWM: [[f32; 4]; DONOR_WINDOW] = normalize([
        [0.33, 0.36, 0.18, 0.13],
        [0.60, 0.13, 0.14, 0.13],
        [0.08, 0.04, 0.81, 0.07],
        [0.001, 0.001, 0.997, 0.001],
        [0.001, 0.012, 0.001, 0.986],
        [0.55, 0.03, 0.36, 0.06],
        [0.71, 0.08, 0.12, 0.09],
        [0.07, 0.06, 0.82, 0.05],
    ]);
    static ref ACCEPTOR_PWM: [[f32; 4]; ACCEPTOR_WINDOW] = normalize([
        [0.10, 0.34, 0.06, 0.50],
        [0.08, 0.36, 0.06, 0.50],
        [0.25, 0.08, 0.05, 0.62],
        [0.997, 0.001, 0.001, 0.001],
        [0.001, 0.001, 0.997, 0.001],
        [0.25, 0.18, 0.50, 0.07],
        [0.27, 0.23, 0.23, 0.27],
        [0.20, 0.28, 0.27, 0.25],
    ]);
}

fn normalize<const N: usize>(freqs: [[f32; 4]; N]) -> [[f32; 4]; N] {
    let mut out = freqs;
    for row in out.iter_mut() {
        let max = row.iter().cloned().fold(f32::MIN, f32::max);
        for v in row.iter_mut() {
            *v /= max;
        }
    }
    out
}

/// Longest intron a canonical junction with the given anchor may claim
/// without further evidence; 0 when the anchor is below the minimum.
pub fn canonical_intron_cap(anchor: u32, min_anchor: u32) -> u64 {
    if anchor < min_anchor {
        return 0;
    }
    let shift = (2 * anchor).saturating_sub(4).clamp(13, 30);
    1u64 << shift
}

/// Non-canonical counterpart.
pub fn noncanonical_intron_cap(anchor: u32, min_anchor_noncan: u32) -> u64 {
    if anchor < min_anchor_noncan {
        return 0;
    }
    let shift = (2 * anchor).saturating_sub(10).min(30);
    1u64 << shift
}

/// Probability-like measure that an intron of `intron_len` is too long for a
/// canonical junction anchored by `anchor` bases. Non-increasing in `anchor`.
pub fn intron_len_prob(anchor: u32, intron_len: u64, max_intron_len: u64) -> f32 {
    let mut expected = max_intron_len;
    if anchor < 14 {
        expected = 1u64 << (2 * anchor + 4);
    }
    expected = expected.min(max_intron_len).max(1);
    ((intron_len as f64 / expected as f64) as f32).min(1.0)
}

/// Non-canonical counterpart of `intron_len_prob`.
pub fn intron_len_prob_noncan(anchor: u32, intron_len: u64, max_intron_len: u64) -> f32 {
    let mut expected = max_intron_len;
    if anchor < 16 {
        expected = 1u64 << (2 * anchor);
    }
    expected = expected.min(max_intron_len).max(1);
    ((intron_len as f64 / expected as f64) as f32).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dna::{encode_seq, pack_2bit};

    fn site(tidx: usize, left: u64, right: u64) -> SpliceSite {
        SpliceSite {
            tidx,
            left,
            right,
            dir: SpliceDir::Fw,
            from_file: true,
            read_id: 0,
        }
    }

    #[test]
    fn add_and_query() {
        let db = SpliceSiteDb::new(&[1 << 20]);
        assert!(db.is_empty());
        db.add(site(0, 1000, 11000));
        db.add(site(0, 1000, 11000)); // duplicate junction
        db.add(site(0, 200_000, 300_000));
        assert!(!db.is_empty());

        let mut out = Vec::new();
        db.left_splice_sites(0, 11005, 10, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].right, 11000);

        db.right_splice_sites(0, 995, 10, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].left, 1000);

        db.right_splice_sites(0, 1500, 10, &mut out);
        assert!(out.is_empty());

        assert!(db.has_splice_sites(0, 900, 1100, 0, 0, true));
        assert!(db.has_splice_sites(0, 0, 0, 299_000, 301_000, true));
        assert!(!db.has_splice_sites(0, 50_000, 60_000, 0, 0, true));
    }

    #[test]
    fn novel_filtering() {
        let db = SpliceSiteDb::new(&[1 << 20]);
        db.add(SpliceSite {
            from_file: false,
            read_id: 42,
            ..site(0, 5000, 9000)
        });
        assert!(db.has_splice_sites(0, 4900, 5100, 0, 0, true));
        assert!(!db.has_splice_sites(0, 4900, 5100, 0, 0, false));
    }

    #[test]
    fn probscore_consensus_tops() {
        // per-position consensus of the donor and acceptor matrices
        let donor = pack_2bit(&encode_seq(b"CAGGTAAG"));
        let acceptor = pack_2bit(&encode_seq(b"TTTAGGAC"));
        let best = SpliceSiteDb::probscore(donor, acceptor);
        assert!(best > 0.99);

        // breaking the GT dinucleotide collapses the score
        let bad_donor = pack_2bit(&encode_seq(b"CAGCTAAG"));
        assert!(SpliceSiteDb::probscore(bad_donor, acceptor) < 0.01);
    }

    #[test]
    fn intron_len_prob_monotone_in_anchor() {
        let max = 500_000u64;
        for intron in [1000u64, 50_000, 499_999] {
            let mut prev = f32::MAX;
            for anchor in 1..30u32 {
                let p = intron_len_prob(anchor, intron, max);
                assert!(p <= prev + f32::EPSILON);
                prev = p;
            }
            let mut prev = f32::MAX;
            for anchor in 1..30u32 {
                let p = intron_len_prob_noncan(anchor, intron, max);
                assert!(p <= prev + f32::EPSILON);
                prev = p;
            }
        }
    }

    #[test]
    fn intron_caps() {
        assert_eq!(canonical_intron_cap(6, 7), 0);
        assert_eq!(canonical_intron_cap(7, 7), 1 << 13);
        assert_eq!(canonical_intron_cap(25, 7), 1 << 30);
        assert_eq!(noncanonical_intron_cap(13, 14), 0);
        assert_eq!(noncanonical_intron_cap(14, 14), 1 << 18);
    }
}

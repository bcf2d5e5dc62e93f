// Per-read alignment collection.
//
// The search engine reports finished alignments into an `AlnSink`, one per
// read (or pair) being aligned; the sink tracks the running bests the
// search's early-termination heuristics query. A completed sink is handed to
// the caller as a `ReadAlignments`.

use crate::edit::{Edit, EditKind};

/// One finished alignment, edits expressed 5'->3'.
#[derive(Debug, Clone)]
pub struct AlnRes {
    pub score: i64,
    pub splice_score: f64,
    pub edits: Vec<Edit>,
    pub tidx: usize,
    /// Leftmost aligned reference position.
    pub toff: u64,
    pub fw: bool,
    pub read_len: usize,
    pub trim5: u32,
    pub trim3: u32,
    /// Alignment is spliced or lands near a known/novel splice site.
    pub near_splice_sites: bool,
}

impl AlnRes {
    /// Number of splice edits.
    pub fn spliced_count(&self) -> usize {
        self.edits
            .iter()
            .filter(|e| e.kind == EditKind::Splice)
            .count()
    }

    pub fn spliced(&self) -> bool {
        self.edits.iter().any(|e| e.kind == EditKind::Splice)
    }

    /// Rightmost aligned reference position (inclusive).
    pub fn right_off(&self) -> u64 {
        let aligned = (self.read_len as u64)
            .saturating_sub(u64::from(self.trim5) + u64::from(self.trim3));
        let shift: i64 = self.edits.iter().map(|e| e.ref_shift()).sum();
        (self.toff + aligned).saturating_add_signed(shift) - 1
    }
}

/// Reporting policy.
#[derive(Debug, Clone, Copy)]
pub struct ReportingParams {
    /// Stop collecting once this many alignments exist for a mate.
    pub k_hits: usize,
}

impl Default for ReportingParams {
    fn default() -> Self {
        ReportingParams { k_hits: 5 }
    }
}

/// Per-read sink with best-score bookkeeping.
#[derive(Debug)]
pub struct AlnSink {
    pub params: ReportingParams,
    unp: [Vec<AlnRes>; 2],
    pairs: Vec<(usize, usize)>,
    best_unp: [i64; 2],
    best_spliced: [usize; 2],
    best_pair: i64,
}

impl AlnSink {
    pub fn new(params: ReportingParams) -> Self {
        AlnSink {
            params,
            unp: [Vec::new(), Vec::new()],
            pairs: Vec::new(),
            best_unp: [i64::MIN, i64::MIN],
            best_spliced: [0, 0],
            best_pair: i64::MIN,
        }
    }

    pub fn reset(&mut self) {
        self.unp[0].clear();
        self.unp[1].clear();
        self.pairs.clear();
        self.best_unp = [i64::MIN, i64::MIN];
        self.best_spliced = [0, 0];
        self.best_pair = i64::MIN;
    }

    /// Record an unpaired alignment for mate `rdi`. Returns true when the
    /// sink has collected enough alignments for this mate.
    pub fn report_unp(&mut self, rdi: usize, res: AlnRes) -> bool {
        log::debug!(
            "report rdi={} tidx={} toff={} fw={} score={} edits={}",
            rdi,
            res.tidx,
            res.toff,
            res.fw,
            res.score,
            res.edits.len()
        );
        if res.score > self.best_unp[rdi] {
            self.best_unp[rdi] = res.score;
            self.best_spliced[rdi] = res.spliced_count();
        }
        self.unp[rdi].push(res);
        self.unp[rdi].len() >= self.params.k_hits
    }

    /// Record a concordant pair by unpaired-result indexes.
    pub fn report_pair(&mut self, i: usize, j: usize) {
        let sum = self.unp[0][i].score + self.unp[1][j].score;
        if sum > self.best_pair {
            self.best_pair = sum;
        }
        self.pairs.push((i, j));
    }

    #[inline]
    pub fn best_unp(&self, rdi: usize) -> i64 {
        self.best_unp[rdi]
    }

    /// Splice count of the best alignment for mate `rdi`.
    #[inline]
    pub fn best_spliced_unp(&self, rdi: usize) -> usize {
        self.best_spliced[rdi]
    }

    #[inline]
    pub fn best_pair(&self) -> i64 {
        self.best_pair
    }

    pub fn done_concordant(&self) -> bool {
        self.pairs.len() >= self.params.k_hits
    }

    #[inline]
    pub fn unp(&self, rdi: usize) -> &[AlnRes] {
        &self.unp[rdi]
    }

    #[inline]
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    /// Consume the sink into a caller-facing record.
    pub fn into_alignments(self) -> ReadAlignments {
        let [unp1, unp2] = self.unp;
        ReadAlignments {
            unp1,
            unp2,
            pairs: self.pairs,
        }
    }
}

/// Final alignments for one read or pair.
#[derive(Debug, Clone, Default)]
pub struct ReadAlignments {
    pub unp1: Vec<AlnRes>,
    pub unp2: Vec<AlnRes>,
    /// Concordant pairs as (unp1 index, unp2 index).
    pub pairs: Vec<(usize, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::{Edit, SpliceDir};

    fn res(score: i64, spliced: bool) -> AlnRes {
        let edits = if spliced {
            vec![Edit::splice(10, 1000, SpliceDir::Fw, false)]
        } else {
            Vec::new()
        };
        AlnRes {
            score,
            splice_score: 0.0,
            edits,
            tidx: 0,
            toff: 100,
            fw: true,
            read_len: 30,
            trim5: 0,
            trim3: 0,
            near_splice_sites: spliced,
        }
    }

    #[test]
    fn best_tracking() {
        let mut sink = AlnSink::new(ReportingParams { k_hits: 3 });
        assert_eq!(sink.best_unp(0), i64::MIN);
        assert!(!sink.report_unp(0, res(40, false)));
        assert!(!sink.report_unp(0, res(55, true)));
        assert_eq!(sink.best_unp(0), 55);
        assert_eq!(sink.best_spliced_unp(0), 1);
        assert!(sink.report_unp(0, res(30, false))); // third hit: done
    }

    #[test]
    fn pair_tracking() {
        let mut sink = AlnSink::new(ReportingParams::default());
        sink.report_unp(0, res(40, false));
        sink.report_unp(1, res(42, false));
        sink.report_pair(0, 0);
        assert_eq!(sink.best_pair(), 82);
        assert_eq!(sink.pairs(), &[(0, 0)]);
    }

    #[test]
    fn right_off_accounts_for_splices() {
        let r = res(40, true); // 30 bp read with a 1000 bp splice
        assert_eq!(r.right_off(), 100 + 30 + 1000 - 1);
    }
}

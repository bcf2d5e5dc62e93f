// Alignment policy knobs, gathered into one immutable value.

/// Linear function of read length producing a score threshold.
#[derive(Debug, Clone, Copy)]
pub struct ScoreFunc {
    pub constant: f64,
    pub coeff: f64,
}

impl ScoreFunc {
    pub fn new(constant: f64, coeff: f64) -> Self {
        ScoreFunc { constant, coeff }
    }

    pub fn eval(&self, read_len: usize) -> i64 {
        (self.constant + self.coeff * read_len as f64).round() as i64
    }
}

/// Immutable alignment options shared by every worker.
#[derive(Debug, Clone)]
pub struct AlignOpts {
    /// Gaps shorter than this are deletions, not introns.
    pub min_intron_len: u64,
    /// Largest intron the combiner will bridge.
    pub max_intron_len: u64,
    /// Largest insertion `combine_with` may place.
    pub max_ins_len: u32,
    /// Largest deletion `combine_with` may place.
    pub max_del_len: u32,
    /// Minimum anchor around a canonical junction (unless the length prior
    /// vouches for it).
    pub min_anchor_len: u32,
    /// Minimum anchor around a non-canonical junction.
    pub min_anchor_len_noncan: u32,
    /// Keep alignments beyond the best one.
    pub secondary: bool,
    /// Disable intron discovery entirely.
    pub no_spliced_alignment: bool,
    /// A read ignores novel splice sites contributed by reads whose id is
    /// within this distance, so concurrent workers cannot cite themselves.
    pub thread_rids_mindist: u64,
    /// Expected orientation of mate 1 in a concordant pair.
    pub mate1_fw: bool,
    /// Expected orientation of mate 2 in a concordant pair.
    pub mate2_fw: bool,
    /// Minimum acceptable alignment score as a function of read length.
    pub score_min: ScoreFunc,
    /// Maximum total penalty as a function of read length.
    pub max_pen: ScoreFunc,
}

impl Default for AlignOpts {
    fn default() -> Self {
        AlignOpts {
            min_intron_len: 20,
            max_intron_len: 500_000,
            max_ins_len: 3,
            max_del_len: 3,
            min_anchor_len: 7,
            min_anchor_len_noncan: 14,
            secondary: false,
            no_spliced_alignment: false,
            thread_rids_mindist: 0,
            mate1_fw: true,
            mate2_fw: false,
            score_min: ScoreFunc::new(-18.0, -0.6),
            max_pen: ScoreFunc::new(18.0, 0.6),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_func_eval() {
        let f = ScoreFunc::new(-18.0, -0.6);
        assert_eq!(f.eval(0), -18);
        assert_eq!(f.eval(100), -78);
    }

    #[test]
    fn defaults_sane() {
        let opts = AlignOpts::default();
        assert!(opts.min_intron_len > opts.max_del_len as u64);
        assert!(opts.min_anchor_len < opts.min_anchor_len_noncan);
    }
}

// Partial-hit chains produced by right-to-left FM search.
//
// One `ReadBwtHit` tracks the search state for one orientation of one read:
// an ordered chain of non-overlapping partial hits plus the next unsearched
// position (`cur`, measured from the read's right end).

use crate::index::FmRange;

/// Genomic coordinate with orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Coord {
    pub tidx: usize,
    pub toff: u64,
    pub fw: bool,
}

/// How a partial search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HitKind {
    /// Search died on a mismatch or ambiguous base; range may be wide.
    Candidate = 1,
    /// Range shrank slowly while staying small: the pattern of a processed
    /// pseudogene versus its parent locus.
    Pseudogene = 2,
    /// Unique and long enough to seed extension outright.
    Anchor = 3,
}

/// One partial seed hit.
#[derive(Debug, Clone)]
pub struct PartialHit {
    pub range: FmRange,
    pub fw: bool,
    /// Offset of the match start from the read's right end.
    pub bwoff: u32,
    pub len: u32,
    pub kind: HitKind,
    /// Genomic coordinates, filled lazily by the anchor selector.
    pub coords: Vec<Coord>,
    /// Hit has been through anchor promotion.
    pub anchor_examined: bool,
}

impl PartialHit {
    pub fn new(range: FmRange, fw: bool, bwoff: u32, len: u32, kind: HitKind) -> Self {
        PartialHit {
            range,
            fw,
            bwoff,
            len,
            kind,
            coords: Vec::new(),
            anchor_examined: false,
        }
    }

    /// A placeholder for a stretch of the read that yielded no range.
    pub fn empty_hit(fw: bool, bwoff: u32, len: u32) -> Self {
        PartialHit::new(FmRange::EMPTY, fw, bwoff, len, HitKind::Candidate)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.range.len()
    }

    pub fn has_genome_coords(&self) -> bool {
        !self.coords.is_empty()
    }
}

/// Chain of partial hits for one orientation of one read.
#[derive(Debug, Clone, Default)]
pub struct ReadBwtHit {
    pub fw: bool,
    pub len: u32,
    /// Next unsearched offset from the right end.
    pub cur: u32,
    done: bool,
    pub num_partial_search: u32,
    pub num_unique_search: u32,
    pub hits: Vec<PartialHit>,
}

impl ReadBwtHit {
    pub fn init(&mut self, fw: bool, len: usize) {
        self.fw = fw;
        self.len = len as u32;
        self.cur = 0;
        self.done = false;
        self.num_partial_search = 0;
        self.num_unique_search = 0;
        self.hits.clear();
    }

    #[inline]
    pub fn done(&self) -> bool {
        self.done
    }

    pub fn set_done(&mut self) {
        debug_assert!(!self.done);
        self.done = true;
    }

    /// Partial searches that were not cut short by a unique stop.
    pub fn num_actual_partial_search(&self) -> u32 {
        debug_assert!(self.num_unique_search <= self.num_partial_search);
        self.num_partial_search - self.num_unique_search
    }

    /// Width of the narrowest non-empty hit and its position in the chain.
    /// Ties prefer the longer hit.
    pub fn min_width(&self) -> (u64, usize) {
        let mut best = u64::MAX;
        let mut best_len = 0u32;
        let mut at = 0usize;
        for (i, h) in self.hits.iter().enumerate() {
            if h.is_empty() {
                continue;
            }
            if h.size() < best || (h.size() == best && h.len > best_len) {
                best = h.size();
                best_len = h.len;
                at = i;
            }
        }
        (best, at)
    }

    /// Priority of this orientation for the next partial search: long seeds
    /// are rewarded quadratically, every productive search beyond the first
    /// costs a quadratic-in-minK penalty plus an exponential term.
    pub fn search_score(&self, min_k: u32) -> i64 {
        let penalty_per_offset = i64::from(min_k) * i64::from(min_k);
        let mut score: i64 = self
            .hits
            .iter()
            .map(|h| i64::from(h.len) * i64::from(h.len))
            .sum();
        let actual = i64::from(self.num_actual_partial_search());
        score -= actual * penalty_per_offset;
        score -= 1i64 << ((2 * actual).min(62));
        score
    }

    /// Chain sanity: hits do not overlap and stay inside the read.
    pub fn rep_ok(&self) -> bool {
        for w in self.hits.windows(2) {
            if w[0].bwoff + w[0].len > w[1].bwoff {
                return false;
            }
        }
        self.hits.iter().all(|h| h.bwoff + h.len <= self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_invariants() {
        let mut h = ReadBwtHit::default();
        h.init(true, 50);
        h.hits
            .push(PartialHit::new(FmRange::new(10, 12), true, 0, 20, HitKind::Candidate));
        h.hits
            .push(PartialHit::new(FmRange::new(5, 6), true, 21, 15, HitKind::Anchor));
        assert!(h.rep_ok());
        h.hits[1].bwoff = 15;
        assert!(!h.rep_ok());
    }

    #[test]
    fn min_width_prefers_narrow_then_long() {
        let mut h = ReadBwtHit::default();
        h.init(true, 60);
        h.hits
            .push(PartialHit::new(FmRange::new(0, 4), true, 0, 20, HitKind::Candidate));
        h.hits.push(PartialHit::empty_hit(true, 20, 2));
        h.hits
            .push(PartialHit::new(FmRange::new(9, 11), true, 22, 10, HitKind::Candidate));
        h.hits
            .push(PartialHit::new(FmRange::new(30, 32), true, 32, 18, HitKind::Candidate));
        let (w, at) = h.min_width();
        assert_eq!(w, 2);
        assert_eq!(at, 3); // same width, longer hit wins
    }

    #[test]
    fn search_score_penalizes_extra_searches() {
        let mut h = ReadBwtHit::default();
        h.init(true, 40);
        h.hits
            .push(PartialHit::new(FmRange::new(0, 1), true, 0, 30, HitKind::Anchor));
        h.num_partial_search = 1;
        h.num_unique_search = 1;
        let s1 = h.search_score(7);
        assert_eq!(s1, 900 - 1); // no actual searches: only the 2^0 term

        h.num_unique_search = 0;
        let s2 = h.search_score(7);
        assert!(s2 < s1);
    }
}

// Dense checkpointed FM-index.
//
// BWT rows are grouped into 64-row blocks; each block stores cumulative
// occurrence counts plus one-hot encoded BWT bits so an occurrence query is
// one popcount. The suffix array is sampled on text-offset multiples and
// resolved by walking LF until a sampled row is reached.

use super::{FmIndex, FmRange, JoinedLoc};
use crate::dna::decode_base;
use bio::data_structures::suffix_array::suffix_array;

/// BWT code used for the text terminator row.
const SENTINEL: u8 = 4;

// one_hot_mask[y] has the top y bits set, so masking a block's one-hot row
// with it counts occurrences strictly before row offset y.
lazy_static::lazy_static! {
    static ref ONE_HOT_MASK: [u64; 64] = {
        let mut m = [0u64; 64];
        let base = 0x8000_0000_0000_0000u64;
        for y in 1..64 {
            m[y] = (m[y - 1] >> 1) | base;
        }
        m
    };
}

/// Occurrence checkpoint for one 64-row block.
#[derive(Debug, Clone, Copy, Default)]
struct CpOcc {
    counts: [u64; 4],
    one_hot: [u64; 4],
}

/// Row index storage width. The global index uses `u64`; local window
/// indexes use `u32`.
pub trait RowIdx: Copy + Send + Sync + 'static {
    const ABSENT: Self;
    fn from_u64(v: u64) -> Self;
    fn to_u64(self) -> u64;
    fn is_absent(self) -> bool;
}

impl RowIdx for u32 {
    const ABSENT: Self = u32::MAX;
    #[inline]
    fn from_u64(v: u64) -> Self {
        v as u32
    }
    #[inline]
    fn to_u64(self) -> u64 {
        u64::from(self)
    }
    #[inline]
    fn is_absent(self) -> bool {
        self == u32::MAX
    }
}

impl RowIdx for u64 {
    const ABSENT: Self = u64::MAX;
    #[inline]
    fn from_u64(v: u64) -> Self {
        v
    }
    #[inline]
    fn to_u64(self) -> u64 {
        self
    }
    #[inline]
    fn is_absent(self) -> bool {
        self == u64::MAX
    }
}

/// FM-index over the concatenation of one or more contigs.
#[derive(Debug, Clone)]
pub struct DenseFmIndex<Rw: RowIdx> {
    bwt: Vec<u8>,
    cp_occ: Vec<CpOcc>,
    /// counts[c] = 1 + number of text characters < c (the 1 is the sentinel).
    counts: [u64; 5],
    /// kmer -> SA range for the first `ftab_chars` pattern bases.
    ftab: Vec<(u64, u64)>,
    ftab_chars: usize,
    /// Sampled SA values, `ABSENT` where unsampled.
    sa_samples: Vec<Rw>,
    /// (start, len) of each contig within the concatenated text.
    contigs: Vec<(u64, u64)>,
    text_len: u64,
}

impl<Rw: RowIdx> DenseFmIndex<Rw> {
    /// Build from contig base-code sequences. Ambiguous codes index as A;
    /// search never initiates through an ambiguous read base, so this only
    /// affects pathological references.
    pub fn build(contig_seqs: &[&[u8]], ftab_chars: usize, sa_sample_rate: u64) -> Self {
        let mut contigs = Vec::with_capacity(contig_seqs.len());
        let mut text: Vec<u8> = Vec::new();
        for seq in contig_seqs {
            contigs.push((text.len() as u64, seq.len() as u64));
            text.extend(seq.iter().map(|&c| if c > 3 { 0 } else { c }));
        }
        let n = text.len();

        // bio's builder wants ASCII with a terminal sentinel.
        let mut ascii: Vec<u8> = text.iter().map(|&c| decode_base(c)).collect();
        ascii.push(b'$');
        let sa = suffix_array(&ascii);
        debug_assert_eq!(sa.len(), n + 1);

        let rows = n + 1;
        let mut bwt = vec![0u8; rows];
        let mut sa_samples = vec![Rw::ABSENT; rows];
        for (row, &suf) in sa.iter().enumerate() {
            bwt[row] = if suf == 0 { SENTINEL } else { text[suf - 1] };
            if (suf as u64) % sa_sample_rate == 0 {
                sa_samples[row] = Rw::from_u64(suf as u64);
            }
        }

        let mut counts = [0u64; 5];
        counts[0] = 1; // sentinel sorts first
        let mut tally = [0u64; 4];
        for &c in &text {
            tally[c as usize] += 1;
        }
        for c in 0..4 {
            counts[c + 1] = counts[c] + tally[c];
        }

        let n_blocks = (rows >> 6) + 1;
        let mut cp_occ = vec![CpOcc::default(); n_blocks];
        let mut running = [0u64; 4];
        for block in 0..n_blocks {
            cp_occ[block].counts = running;
            for j in 0..64 {
                let row = (block << 6) + j;
                if row >= rows {
                    break;
                }
                let c = bwt[row];
                if c < 4 {
                    cp_occ[block].one_hot[c as usize] |= 0x8000_0000_0000_0000u64 >> j;
                    running[c as usize] += 1;
                }
            }
        }

        // The SA is kmer-sorted, so each full-length kmer owns a contiguous
        // row range; sweep once to record it.
        let mut ftab = vec![(0u64, 0u64); 1usize << (2 * ftab_chars)];
        let mut cur_kmer = usize::MAX;
        for (row, &suf) in sa.iter().enumerate() {
            if suf + ftab_chars > n {
                continue;
            }
            let mut kmer = 0usize;
            for &c in &text[suf..suf + ftab_chars] {
                kmer = (kmer << 2) | c as usize;
            }
            if kmer != cur_kmer {
                ftab[kmer].0 = row as u64;
                cur_kmer = kmer;
            }
            ftab[kmer].1 = row as u64 + 1;
        }

        DenseFmIndex {
            bwt,
            cp_occ,
            counts,
            ftab,
            ftab_chars,
            sa_samples,
            contigs,
            text_len: n as u64,
        }
    }

    /// Occurrences of `c` among BWT rows strictly before `row`.
    #[inline]
    fn occ(&self, row: u64, c: u8) -> u64 {
        let block = (row >> 6) as usize;
        let y = (row & 63) as usize;
        let cp = &self.cp_occ[block];
        let masked = cp.one_hot[c as usize] & ONE_HOT_MASK[y];
        cp.counts[c as usize] + u64::from(masked.count_ones())
    }
}

impl<Rw: RowIdx> FmIndex for DenseFmIndex<Rw> {
    fn text_len(&self) -> u64 {
        self.text_len
    }

    fn ftab_chars(&self) -> usize {
        self.ftab_chars
    }

    fn ftab_lo_hi(&self, pat: &[u8]) -> FmRange {
        debug_assert_eq!(pat.len(), self.ftab_chars);
        let mut kmer = 0usize;
        for &c in pat {
            if c > 3 {
                return FmRange::EMPTY;
            }
            kmer = (kmer << 2) | c as usize;
        }
        let (top, bot) = self.ftab[kmer];
        FmRange::new(top, bot)
    }

    #[inline]
    fn map_lf(&self, row: u64, c: u8) -> u64 {
        self.counts[c as usize] + self.occ(row, c)
    }

    #[inline]
    fn map_lf1(&self, row: u64, c: u8) -> Option<u64> {
        if self.bwt[row as usize] == c {
            Some(self.counts[c as usize] + self.occ(row, c))
        } else {
            None
        }
    }

    fn resolve_row(&self, row: u64) -> u64 {
        let mut row = row;
        let mut steps = 0u64;
        loop {
            let s = self.sa_samples[row as usize];
            if !s.is_absent() {
                return s.to_u64() + steps;
            }
            let c = self.bwt[row as usize];
            debug_assert!(c < 4, "sentinel row must be sampled");
            row = self.counts[c as usize] + self.occ(row, c);
            steps += 1;
        }
    }

    fn num_refs(&self) -> usize {
        self.contigs.len()
    }

    fn contig_len(&self, tidx: usize) -> u64 {
        self.contigs[tidx].1
    }

    fn joined_to_text_off(&self, len: u64, joined: u64, reject_straddle: bool) -> JoinedLoc {
        let tidx = match self
            .contigs
            .binary_search_by(|&(start, _)| start.cmp(&joined))
        {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let (start, tlen) = self.contigs[tidx];
        let toff = joined - start;
        let straddled = toff + len > tlen;
        if straddled && reject_straddle {
            JoinedLoc::Rejected
        } else {
            JoinedLoc::Mapped {
                tidx,
                toff,
                tlen,
                straddled,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dna::encode_seq;

    fn backward_search(idx: &DenseFmIndex<u64>, pat: &[u8]) -> FmRange {
        let k = idx.ftab_chars();
        assert!(pat.len() >= k);
        let mut range = idx.ftab_lo_hi(&pat[pat.len() - k..]);
        for &c in pat[..pat.len() - k].iter().rev() {
            if range.is_empty() {
                break;
            }
            range = FmRange::new(idx.map_lf(range.top, c), idx.map_lf(range.bot, c));
        }
        range
    }

    fn naive_occurrences(text: &[u8], pat: &[u8]) -> Vec<u64> {
        let mut hits = Vec::new();
        if pat.len() > text.len() {
            return hits;
        }
        for i in 0..=(text.len() - pat.len()) {
            if &text[i..i + pat.len()] == pat {
                hits.push(i as u64);
            }
        }
        hits
    }

    #[test]
    fn search_matches_naive() {
        let text = encode_seq(b"GATTACAGATTACATTACAGGGATTACA");
        let idx: DenseFmIndex<u64> = DenseFmIndex::build(&[&text], 3, 4);
        for pat_str in [&b"ATTACA"[..], b"GAT", b"TACA", b"GGG", b"ACAG"] {
            let pat = encode_seq(pat_str);
            let range = backward_search(&idx, &pat);
            let mut got: Vec<u64> = (range.top..range.bot).map(|r| idx.resolve_row(r)).collect();
            got.sort_unstable();
            assert_eq!(got, naive_occurrences(&text, &pat), "pattern {:?}", pat_str);
        }
        // absent pattern
        let pat = encode_seq(b"CCCC");
        assert!(backward_search(&idx, &pat).is_empty());
    }

    #[test]
    fn contig_mapping() {
        let a = encode_seq(b"ACGTACGTAC");
        let b = encode_seq(b"TTTTGGGG");
        let idx: DenseFmIndex<u64> = DenseFmIndex::build(&[&a, &b], 2, 4);
        assert_eq!(idx.num_refs(), 2);
        assert_eq!(idx.contig_len(0), 10);
        assert_eq!(idx.contig_len(1), 8);
        match idx.joined_to_text_off(4, 12, false) {
            JoinedLoc::Mapped {
                tidx,
                toff,
                straddled,
                ..
            } => {
                assert_eq!((tidx, toff), (1, 2));
                assert!(!straddled);
            }
            _ => panic!("expected mapped"),
        }
        // span crossing from contig 0 into contig 1
        assert_eq!(idx.joined_to_text_off(6, 8, true), JoinedLoc::Rejected);
        match idx.joined_to_text_off(6, 8, false) {
            JoinedLoc::Mapped { tidx, straddled, .. } => {
                assert_eq!(tidx, 0);
                assert!(straddled);
            }
            _ => panic!("expected mapped"),
        }
    }

    #[test]
    fn map_lf1_singleton() {
        let text = encode_seq(b"ACGTACGA");
        let idx: DenseFmIndex<u32> = DenseFmIndex::build(&[&text], 2, 1);
        // "GT" occurs once, at text offset 2.
        let r = idx.ftab_lo_hi(&encode_seq(b"GT"));
        assert_eq!(r.len(), 1);
        // Prepend C: the BWT character at the singleton row is the preceding
        // text base, so the single-row step succeeds and lands on "CGT".
        let row = idx.map_lf1(r.top, 1).expect("C precedes the only GT");
        assert_eq!(idx.resolve_row(row), 1);
        // Prepending anything else fails the single-row step.
        assert!(idx.map_lf1(r.top, 3).is_none());
    }
}

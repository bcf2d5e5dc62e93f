// Hierarchical index: one global FM-index over the whole reference plus
// overlapping local FM-indexes tiling each contig. Local windows overlap by
// a fixed amount so any anchor within a window can extend a little past it
// before the search moves to the neighbouring window.

use super::fm::DenseFmIndex;
use super::{FmIndex, FmRange, HierIndex, JoinedLoc, LocalIndex};
use crate::reference::{PackedReference, Reference};

/// Construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct HierIndexParams {
    /// Local window length.
    pub window: u64,
    /// Overlap between adjacent windows.
    pub overlap: u64,
    pub ftab_chars_global: usize,
    pub ftab_chars_local: usize,
    pub sa_sample_rate: u64,
}

impl Default for HierIndexParams {
    fn default() -> Self {
        HierIndexParams {
            window: 1 << 16,
            overlap: 1 << 10,
            ftab_chars_global: 6,
            ftab_chars_local: 4,
            sa_sample_rate: 4,
        }
    }
}

/// FM-index over one window of one contig.
#[derive(Debug, Clone)]
pub struct LocalFmIndex {
    fm: DenseFmIndex<u32>,
    tidx: usize,
    /// Position of this window in its contig's window list.
    widx: usize,
    local_offset: u64,
}

impl FmIndex for LocalFmIndex {
    fn text_len(&self) -> u64 {
        self.fm.text_len()
    }
    fn ftab_chars(&self) -> usize {
        self.fm.ftab_chars()
    }
    fn ftab_lo_hi(&self, pat: &[u8]) -> FmRange {
        self.fm.ftab_lo_hi(pat)
    }
    fn map_lf(&self, row: u64, c: u8) -> u64 {
        self.fm.map_lf(row, c)
    }
    fn map_lf1(&self, row: u64, c: u8) -> Option<u64> {
        self.fm.map_lf1(row, c)
    }
    fn resolve_row(&self, row: u64) -> u64 {
        self.fm.resolve_row(row)
    }
    fn num_refs(&self) -> usize {
        1
    }
    fn contig_len(&self, _tidx: usize) -> u64 {
        self.fm.text_len()
    }
    fn joined_to_text_off(&self, len: u64, joined: u64, reject_straddle: bool) -> JoinedLoc {
        // A local window is a single pseudo-contig; straddling means running
        // past the window end.
        let straddled = joined + len > self.fm.text_len();
        if straddled && reject_straddle {
            JoinedLoc::Rejected
        } else {
            JoinedLoc::Mapped {
                tidx: 0,
                toff: joined,
                tlen: self.fm.text_len(),
                straddled,
            }
        }
    }
}

impl LocalIndex for LocalFmIndex {
    fn tidx(&self) -> usize {
        self.tidx
    }
    fn local_offset(&self) -> u64 {
        self.local_offset
    }
}

/// Global index plus per-contig window lists.
pub struct HierarchicalIndex {
    global: DenseFmIndex<u64>,
    locals: Vec<Vec<LocalFmIndex>>,
    stride: u64,
}

impl HierarchicalIndex {
    /// Build both levels from a packed reference.
    pub fn build(reference: &PackedReference, params: &HierIndexParams) -> Self {
        assert!(params.overlap < params.window);
        let stride = params.window - params.overlap;

        let contig_codes: Vec<Vec<u8>> = (0..reference.num_refs())
            .map(|t| reference.contig_codes(t))
            .collect();
        let contig_slices: Vec<&[u8]> = contig_codes.iter().map(|c| c.as_slice()).collect();
        let global = DenseFmIndex::build(
            &contig_slices,
            params.ftab_chars_global,
            params.sa_sample_rate,
        );

        let mut locals = Vec::with_capacity(contig_codes.len());
        for (tidx, codes) in contig_codes.iter().enumerate() {
            let mut windows = Vec::new();
            let clen = codes.len() as u64;
            let mut start = 0u64;
            loop {
                let end = (start + params.window).min(clen);
                if end <= start {
                    break;
                }
                let slice = &codes[start as usize..end as usize];
                let fm = DenseFmIndex::build(
                    &[slice],
                    params.ftab_chars_local,
                    params.sa_sample_rate,
                );
                windows.push(LocalFmIndex {
                    fm,
                    tidx,
                    widx: windows.len(),
                    local_offset: start,
                });
                if end >= clen {
                    break;
                }
                start += stride;
            }
            locals.push(windows);
        }

        HierarchicalIndex {
            global,
            locals,
            stride,
        }
    }

    pub fn windows(&self, tidx: usize) -> usize {
        self.locals[tidx].len()
    }
}

impl HierIndex for HierarchicalIndex {
    type Global = DenseFmIndex<u64>;
    type Local = LocalFmIndex;

    fn global(&self) -> &DenseFmIndex<u64> {
        &self.global
    }

    fn local_at(&self, tidx: usize, toff: u64) -> Option<&LocalFmIndex> {
        let windows = self.locals.get(tidx)?;
        if windows.is_empty() {
            return None;
        }
        let widx = ((toff / self.stride) as usize).min(windows.len() - 1);
        let w = &windows[widx];
        debug_assert!(w.local_offset <= toff);
        Some(w)
    }

    fn prev_local<'a>(&'a self, local: &'a LocalFmIndex) -> Option<&'a LocalFmIndex> {
        if local.widx == 0 {
            None
        } else {
            self.locals[local.tidx].get(local.widx - 1)
        }
    }

    fn next_local<'a>(&'a self, local: &'a LocalFmIndex) -> Option<&'a LocalFmIndex> {
        self.locals[local.tidx].get(local.widx + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dna::decode_base;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn random_reference(len: usize, seed: u64) -> PackedReference {
        let mut rng = SmallRng::seed_from_u64(seed);
        let ascii: Vec<u8> = (0..len)
            .map(|_| decode_base(rng.gen_range(0..4u8)))
            .collect();
        let mut r = PackedReference::new();
        r.push_contig("c0", &ascii);
        r
    }

    #[test]
    fn window_placement() {
        let reference = random_reference(10_000, 11);
        let params = HierIndexParams {
            window: 4096,
            overlap: 512,
            ftab_chars_global: 4,
            ftab_chars_local: 3,
            sa_sample_rate: 4,
        };
        let idx = HierarchicalIndex::build(&reference, &params);
        assert!(idx.windows(0) >= 3);

        for &off in &[0u64, 100, 4000, 5000, 9999] {
            let local = idx.local_at(0, off).expect("window");
            assert!(local.local_offset() <= off);
            assert!(off < local.local_offset() + local.text_len());
        }

        let first = idx.local_at(0, 0).unwrap();
        assert!(idx.prev_local(first).is_none());
        let second = idx.next_local(first).unwrap();
        assert_eq!(second.local_offset(), params.window - params.overlap);
    }

    #[test]
    fn local_search_translates_to_global() {
        let reference = random_reference(6_000, 23);
        let params = HierIndexParams {
            window: 2048,
            overlap: 256,
            ftab_chars_global: 4,
            ftab_chars_local: 3,
            sa_sample_rate: 4,
        };
        let idx = HierarchicalIndex::build(&reference, &params);

        // Take 20 bases from the middle of the second window and find them
        // through the local index.
        let local = idx.local_at(0, 3000).unwrap();
        let global_off = 3000u64;
        let mut pat = Vec::new();
        for i in 0..20u64 {
            pat.push(reference.get_base(0, global_off + i));
        }
        let k = local.ftab_chars();
        let mut range = local.ftab_lo_hi(&pat[pat.len() - k..]);
        for &c in pat[..pat.len() - k].iter().rev() {
            assert!(!range.is_empty());
            range = FmRange::new(local.map_lf(range.top, c), local.map_lf(range.bot, c));
        }
        assert_eq!(range.len(), 1);
        let local_off = local.resolve_row(range.top);
        assert_eq!(local_off + local.local_offset(), global_off);
    }
}

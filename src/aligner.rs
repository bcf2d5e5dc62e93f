// Per-read alignment driver.
//
// Owns all mutable per-task state: the partial-hit chains for each
// read/orientation, anchor candidates, scratch buffers, metrics, and the
// memoization set of the hybrid search. The driver loop repeatedly picks the
// most promising unfinished orientation, advances its right-to-left partial
// FM search, and hands completed chains to anchor selection plus hybrid
// extension. For pairs it attempts concordant pairing after each mate and
// falls back to mate alignment seeded from the aligned mate's coordinate.

use crate::config::AlignOpts;
use crate::edit::{invert_poss, Edit, EditKind};
use crate::genome_hit::{GenomeHit, SharedTempVars};
use crate::hit::{Coord, HitKind, PartialHit, ReadBwtHit};
use crate::index::{FmIndex, FmRange, HierIndex, JoinedLoc, LocalIndex};
use crate::metrics::HiMetrics;
use crate::read::Read;
use crate::reference::Reference;
use crate::scoring::Scoring;
use crate::sink::{AlnRes, AlnSink};
use crate::splice_site::{SpliceSite, SpliceSiteDb};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Minimum exact-match length inside a local index window.
pub const MIN_K_LOCAL: u32 = 8;

/// Window on either side of an exonic alignment probed for nearby splice
/// sites when flagging reported hits.
const MAX_EXON_SIZE: u64 = 2000;

/// Read-only collaborators of one alignment run.
pub struct AlignContext<'a, H: HierIndex, R: Reference> {
    pub scoring: &'a Scoring,
    pub opts: &'a AlignOpts,
    pub index: &'a H,
    pub reference: &'a R,
    pub ssdb: &'a SpliceSiteDb,
}

/// Mismatch budget implied by a score deficit.
pub(crate) fn max_mismatches(best_score: i64, mmp_max: i64) -> u32 {
    if best_score >= 0 {
        0
    } else {
        ((-best_score + mmp_max - 1) / mmp_max) as u32
    }
}

/// One backward-extension step; a singleton range uses the cheaper
/// single-row map.
pub(crate) fn lf_step<G: FmIndex + ?Sized>(
    g: &G,
    range: FmRange,
    c: u8,
    bwops: &mut u64,
) -> FmRange {
    if range.len() == 1 {
        *bwops += 1;
        match g.map_lf1(range.top, c) {
            Some(r) => FmRange::new(r, r + 1),
            None => FmRange::EMPTY,
        }
    } else {
        *bwops += 2;
        FmRange::new(g.map_lf(range.top, c), g.map_lf(range.bot, c))
    }
}

/// Right-to-left exact search on the global index starting at read offset
/// `hitoff` (inclusive) and walking toward the read's 5' end. Returns
/// (elements, matched length, range, stopped-unique).
pub(crate) fn global_search<G: FmIndex>(
    g: &G,
    seq: &[u8],
    min_k: u32,
    hitoff: u32,
    unique_stop_req: bool,
    bwops: &mut u64,
) -> (u64, u32, FmRange, bool) {
    let len = seq.len() as u32;
    let ftab_len = g.ftab_chars() as u32;
    let offset = len - hitoff - 1;
    let mut dep = offset;
    let left = len - dep;
    if left < ftab_len {
        return (0, left, FmRange::EMPTY, false);
    }
    for i in 0..ftab_len {
        if seq[(len - dep - 1 - i) as usize] > 3 {
            return (0, i + 1, FmRange::EMPTY, false);
        }
    }
    let start = (len - dep - ftab_len) as usize;
    let mut range = g.ftab_lo_hi(&seq[start..start + ftab_len as usize]);
    dep += ftab_len;
    if range.is_empty() {
        return (0, ftab_len, FmRange::EMPTY, false);
    }
    let mut unique = false;
    while dep < len {
        let c = seq[(len - dep - 1) as usize];
        let next = if c > 3 {
            FmRange::EMPTY
        } else {
            lf_step(g, range, c, bwops)
        };
        if next.is_empty() {
            break;
        }
        range = next;
        dep += 1;
        if unique_stop_req && range.len() == 1 && dep - offset >= min_k {
            unique = true;
            break;
        }
    }
    (range.len(), dep - offset, range, unique)
}

/// Right-to-left exact search in a local window, starting at read offset
/// `rdoff` and walking toward the 5' end, capped at `max_hit_len` matched
/// bases. Returns (elements, matched length, range, stopped-unique).
pub(crate) fn local_search<L: FmIndex>(
    local: &L,
    seq: &[u8],
    rdoff: u32,
    min_unique_len: u32,
    max_hit_len: u32,
    unique_stop_req: bool,
    bwops: &mut u64,
) -> (u64, u32, FmRange, bool) {
    let len = seq.len() as u32;
    let ftab_len = local.ftab_chars() as u32;
    let offset = len - rdoff - 1;
    let mut dep = offset;
    let left = len - dep;
    if left < ftab_len {
        return (0, left, FmRange::EMPTY, false);
    }
    for i in 0..ftab_len {
        if seq[(len - dep - 1 - i) as usize] > 3 {
            return (0, i + 1, FmRange::EMPTY, false);
        }
    }
    let start = (len - dep - ftab_len) as usize;
    let mut range = local.ftab_lo_hi(&seq[start..start + ftab_len as usize]);
    dep += ftab_len;
    if range.is_empty() {
        return (0, ftab_len, FmRange::EMPTY, false);
    }
    let mut unique = false;
    while dep < len {
        let c = seq[(len - dep - 1) as usize];
        let next = if c > 3 {
            FmRange::EMPTY
        } else {
            lf_step(local, range, c, bwops)
        };
        if next.is_empty() {
            break;
        }
        range = next;
        dep += 1;
        if unique_stop_req && range.len() == 1 && dep - offset >= min_unique_len {
            unique = true;
            break;
        }
        if dep - offset >= max_hit_len {
            break;
        }
    }
    (range.len(), dep - offset, range, unique)
}

/// Per-thread alignment worker.
pub struct HiAligner {
    pub(crate) reads: [Read; 2],
    pub(crate) paired: bool,
    pub(crate) right_end_only: bool,
    pub(crate) nofw: [bool; 2],
    pub(crate) norc: [bool; 2],
    pub(crate) minsc: [i64; 2],
    max_pen: [i64; 2],

    pub(crate) hits: [[ReadBwtHit; 2]; 2],
    pub(crate) genome_hits: Vec<GenomeHit>,
    pub(crate) genome_hits_done: Vec<bool>,
    pub(crate) shared: SharedTempVars,

    // recursion-depth-indexed scratch
    pub(crate) coords_by_dep: Vec<Vec<Coord>>,
    pub(crate) local_hits_by_dep: Vec<Vec<GenomeHit>>,
    pub(crate) sites_by_dep: Vec<Vec<SpliceSite>>,
    pub(crate) anchors_added: Vec<u32>,

    pub(crate) searched: [Vec<GenomeHit>; 2],
    pub(crate) concordant: Vec<(usize, usize)>,

    pub(crate) metrics: HiMetrics,
    pub(crate) rng: SmallRng,
    pub(crate) min_k: u32,
    pub(crate) max_local_index_atts: u64,
}

impl HiAligner {
    pub fn new(seed: u64) -> Self {
        HiAligner {
            reads: [Read::default(), Read::default()],
            paired: false,
            right_end_only: false,
            nofw: [false; 2],
            norc: [false; 2],
            minsc: [i64::MIN; 2],
            max_pen: [i64::MAX; 2],
            hits: Default::default(),
            genome_hits: Vec::new(),
            genome_hits_done: Vec::new(),
            shared: SharedTempVars::default(),
            coords_by_dep: Vec::new(),
            local_hits_by_dep: Vec::new(),
            sites_by_dep: Vec::new(),
            anchors_added: Vec::new(),
            searched: [Vec::new(), Vec::new()],
            concordant: Vec::new(),
            metrics: HiMetrics::default(),
            rng: SmallRng::seed_from_u64(seed),
            min_k: 0,
            max_local_index_atts: 0,
        }
    }

    fn reset_per_read(&mut self) {
        self.shared.reset();
        self.genome_hits.clear();
        self.genome_hits_done.clear();
        for v in &mut self.coords_by_dep {
            v.clear();
        }
        for v in &mut self.local_hits_by_dep {
            v.clear();
        }
        for v in &mut self.sites_by_dep {
            v.clear();
        }
        self.anchors_added.clear();
        self.searched[0].clear();
        self.searched[1].clear();
        self.concordant.clear();
    }

    /// Prepare for one unpaired read.
    pub fn init_read(
        &mut self,
        rd: Read,
        nofw: bool,
        norc: bool,
        minsc: i64,
        maxpen: i64,
        right_end_only: bool,
    ) {
        debug_assert!(!rd.is_empty());
        self.reset_per_read();
        self.paired = false;
        self.right_end_only = right_end_only;
        self.nofw = [nofw, true];
        self.norc = [norc, true];
        self.minsc = [minsc, i64::MIN];
        self.max_pen = [maxpen, i64::MAX];
        for fwi in 0..2 {
            self.hits[0][fwi].init(fwi == 0, rd.len());
            self.hits[1][fwi].init(fwi == 0, 1);
            self.hits[1][fwi].set_done();
        }
        self.reads[0] = rd;
        self.reads[1] = Read::default();
    }

    /// Prepare for a mate pair.
    pub fn init_pair(
        &mut self,
        rd1: Read,
        rd2: Read,
        nofw: [bool; 2],
        norc: [bool; 2],
        minsc: [i64; 2],
        maxpen: [i64; 2],
    ) {
        debug_assert!(!rd1.is_empty() && !rd2.is_empty());
        self.reset_per_read();
        self.paired = true;
        self.right_end_only = false;
        self.nofw = nofw;
        self.norc = norc;
        self.minsc = minsc;
        self.max_pen = maxpen;
        for fwi in 0..2 {
            self.hits[0][fwi].init(fwi == 0, rd1.len());
            self.hits[1][fwi].init(fwi == 0, rd2.len());
        }
        self.reads = [rd1, rd2];
    }

    pub fn metrics(&self) -> &HiMetrics {
        &self.metrics
    }

    /// Maximum-penalty budget recorded at init time.
    pub fn max_pen(&self, rdi: usize) -> i64 {
        self.max_pen[rdi]
    }

    /// Align the prepared read or pair, reporting into `sink`.
    pub fn run<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
    ) {
        let mut glen = ctx.index.global().text_len();
        self.min_k = 0;
        while glen > 0 {
            glen >>= 2;
            self.min_k += 1;
        }

        let mut found = [true, self.paired];
        while let Some((rdi, fw)) = self.next_bwt(ctx, sink) {
            found[rdi] = self.align_candidates(ctx, sink, rdi, fw);
            if !found[0] && !found[1] {
                break;
            }
            if self.paired {
                self.pair_reads(ctx, sink);
            }
        }

        // Mate rescue: seed a local search for the unaligned end from the
        // aligned end's coordinate.
        if self.paired
            && self.concordant.is_empty()
            && (sink.best_unp(0) >= self.minsc[0] || sink.best_unp(1) >= self.minsc[1])
        {
            let mut seeds: Vec<(usize, bool, usize, u64)> = Vec::new();
            for rdi in 0..2 {
                for res in sink.unp(rdi) {
                    seeds.push((rdi, res.fw, res.tidx, res.toff));
                }
            }
            let mut mate_found = false;
            for (rdi, fw, tidx, toff) in seeds {
                mate_found |= self.align_mate(ctx, sink, rdi, fw, tidx, toff);
            }
            if mate_found {
                self.pair_reads(ctx, sink);
            }
        }
    }

    /// Pick the unfinished orientation with the best search score.
    fn pick_next_read_to_search(&self) -> Option<(usize, bool)> {
        let mut best = i64::MIN;
        let mut pick = None;
        let ends = if self.paired { 2 } else { 1 };
        for rdi in 0..ends {
            for fwi in 0..2 {
                if (fwi == 0 && self.nofw[rdi]) || (fwi == 1 && self.norc[rdi]) {
                    continue;
                }
                if self.hits[rdi][fwi].done() {
                    continue;
                }
                let score = if self.hits[rdi][fwi].cur == 0 {
                    i64::MAX
                } else {
                    self.hits[rdi][fwi].search_score(self.min_k)
                };
                if score > best {
                    best = score;
                    pick = Some((rdi, fwi == 0));
                }
            }
        }
        pick
    }

    /// Advance the partial search of the best candidate orientation until a
    /// chain completes. Returns the orientation whose chain is ready for
    /// anchor selection, or None when all work is exhausted or cut off.
    fn next_bwt<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &AlnSink,
    ) -> Option<(usize, bool)> {
        while let Some((rdi, fw)) = self.pick_next_read_to_search() {
            let fwi = if fw { 0 } else { 1 };
            let mut pseudogene_stop = true;
            let mut anchor_stop = true;

            if !ctx.opts.secondary {
                let num_searched = self.hits[rdi][fwi].num_actual_partial_search();
                let best_score = sink.best_unp(rdi);
                if best_score >= self.minsc[rdi] {
                    // A good alignment exists; only keep searching while this
                    // orientation could still match it.
                    let maxmm = max_mismatches(best_score, ctx.scoring.mm_pen_max);
                    if num_searched > maxmm + sink.best_spliced_unp(rdi) as u32 + 1 {
                        self.hits[rdi][fwi].set_done();
                        if self.paired {
                            if sink.best_unp(1 - rdi) >= self.minsc[1 - rdi]
                                && !self.concordant.is_empty()
                            {
                                return None;
                            }
                            continue;
                        } else {
                            return None;
                        }
                    }
                }
                let sibling = &self.hits[rdi][1 - fwi];
                if sibling.done() && best_score < self.minsc[rdi] {
                    let sibling_searched = sibling.num_actual_partial_search();
                    if num_searched > sibling_searched + 1 {
                        self.hits[rdi][fwi].set_done();
                        return None;
                    }
                }
            }

            self.partial_search(ctx.index.global(), rdi, fwi, &mut pseudogene_stop, &mut anchor_stop);
            debug_assert!(self.hits[rdi][fwi].rep_ok());
            if self.hits[rdi][fwi].done() {
                return Some((rdi, fw));
            }
            if !pseudogene_stop {
                // skip the offending base before the next search
                let h = &mut self.hits[rdi][fwi];
                if h.cur + 1 < h.len {
                    h.cur += 1;
                }
            }
            if anchor_stop {
                self.hits[rdi][fwi].set_done();
                return Some((rdi, fw));
            }
        }
        None
    }

    /// One right-to-left exact walk appending a partial hit to the chain.
    /// The in/out stop flags request and report the pseudogene and anchor
    /// stop rules.
    fn partial_search<G: FmIndex>(
        &mut self,
        global: &G,
        rdi: usize,
        fwi: usize,
        pseudogene_stop: &mut bool,
        anchor_stop: &mut bool,
    ) -> u64 {
        let mut pseudogene_req = *pseudogene_stop;
        let mut anchor_req = *anchor_stop;
        *pseudogene_stop = false;
        *anchor_stop = false;

        let min_k = self.min_k;
        let Self {
            reads,
            hits,
            metrics,
            ..
        } = self;
        let rd = &reads[rdi];
        let hit = &mut hits[rdi][fwi];
        let fw = fwi == 0;
        let seq = rd.seq(fw);
        let len = hit.len;
        let ftab_len = global.ftab_chars() as u32;

        hit.num_partial_search += 1;
        let offset = hit.cur;
        let mut dep = offset;
        debug_assert!(dep < len);

        if len - dep < ftab_len {
            hit.cur = len;
            let l = hit.cur - offset;
            hit.hits.push(PartialHit::empty_hit(fw, offset, l));
            hit.set_done();
            return 0;
        }
        // An ambiguous base inside the ftab window: skip past it.
        for i in 0..ftab_len {
            if seq[(len - dep - 1 - i) as usize] > 3 {
                hit.cur += i + 1;
                let l = hit.cur - offset;
                hit.hits.push(PartialHit::empty_hit(fw, offset, l));
                if hit.cur >= hit.len {
                    hit.set_done();
                }
                return 0;
            }
        }

        let start = (len - dep - ftab_len) as usize;
        let mut range = global.ftab_lo_hi(&seq[start..start + ftab_len as usize]);
        dep += ftab_len;
        if range.is_empty() {
            hit.cur = dep;
            hit.hits.push(PartialHit::empty_hit(fw, offset, dep - offset));
            if hit.cur >= hit.len {
                hit.set_done();
            }
            return 0;
        }

        let mut same_range = 0u32;
        let mut similar_range = 0u32;
        while dep < len {
            let c = seq[(len - dep - 1) as usize];
            let next = if c > 3 {
                FmRange::EMPTY
            } else {
                lf_step(global, range, c, &mut metrics.bwops)
            };
            if next.is_empty() {
                break;
            }

            if pseudogene_req {
                if next.len() < range.len() && range.len() <= 5 {
                    let min_len_for_pseudogene = min_k + 6;
                    if dep - offset >= min_len_for_pseudogene && similar_range >= 5 {
                        hit.num_unique_search += 1;
                        *pseudogene_stop = true;
                        break;
                    }
                }
                if next.len() != 1 {
                    if next.len() + 2 >= range.len() {
                        similar_range += 1;
                    } else if next.len() + 4 < range.len() {
                        similar_range = 0;
                    }
                } else {
                    pseudogene_req = false;
                }
            }

            if anchor_req {
                if next.len() != 1 && next.len() == range.len() {
                    same_range += 1;
                    if same_range >= 5 {
                        anchor_req = false;
                    }
                } else {
                    same_range = 0;
                }
                if dep - offset >= min_k + 8 && next.len() >= 4 {
                    anchor_req = false;
                }
            }

            range = next;
            dep += 1;

            if anchor_req && dep - offset >= min_k + 12 && range.len() == 1 {
                hit.num_unique_search += 1;
                *anchor_stop = true;
                break;
            }
        }

        let mut nelt = 0;
        if !range.is_empty() {
            let kind = if *anchor_stop {
                HitKind::Anchor
            } else if *pseudogene_stop {
                HitKind::Pseudogene
            } else {
                HitKind::Candidate
            };
            log::trace!(
                "partial hit rdi={} fw={} [{}, {}) kind={:?} width={}",
                rdi,
                fw,
                offset,
                dep,
                kind,
                range.len()
            );
            hit.hits
                .push(PartialHit::new(range, fw, offset, dep - offset, kind));
            nelt = range.len();
            hit.cur = dep;
            if hit.cur >= hit.len {
                if kind == HitKind::Candidate {
                    hit.num_unique_search += 1;
                }
                hit.set_done();
            }
        }
        nelt
    }

    /// Completed chain -> anchors -> hybrid extension.
    fn align_candidates<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        fw: bool,
    ) -> bool {
        let fwi = if fw { 0 } else { 1 };
        let khits = sink.params.k_hits;
        {
            let chain = &self.hits[rdi][fwi];
            debug_assert!(chain.done());
            let (min_width, _) = chain.min_width();
            if min_width > (khits * 2) as u64 {
                return false;
            }
        }

        let best_score = sink.best_unp(rdi).max(self.minsc[rdi]);
        let num_spliced = sink.best_spliced_unp(rdi) as u32;
        let maxmm = max_mismatches(best_score, ctx.scoring.mm_pen_max);
        let num_searched = self.hits[rdi][fwi].num_actual_partial_search();
        if !ctx.opts.secondary && num_searched > maxmm + num_spliced + 1 {
            return true;
        }

        let num_hits = self.anchor_hits(ctx, rdi, fw, khits);
        if num_hits == 0 {
            return false;
        }

        // Budget for local-index probes during this extension round.
        let per_hit = (-self.minsc[rdi] / ctx.scoring.mm_pen_max).max(0) as u64;
        let mult = if ctx.opts.secondary { 2 } else { 1 };
        let add = (per_hit * num_hits as u64 * mult).max(10);
        self.max_local_index_atts = self.metrics.local_index_atts + add;

        self.hybrid_search(ctx, sink, rdi, fw);
        true
    }

    /// Choose the best partial hits, resolve their SA ranges to genome
    /// coordinates, and seed deduplicated anchors.
    fn anchor_hits<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        rdi: usize,
        fw: bool,
        max_genome_hits: usize,
    ) -> usize {
        let fwi = if fw { 0 } else { 1 };
        while let Some(h) = self.genome_hits.pop() {
            h.free(&mut self.shared);
        }

        let global = ctx.index.global();
        let min_k = self.min_k;
        let max_intron_len = ctx.opts.max_intron_len;
        let Self {
            hits,
            genome_hits,
            shared,
            rng,
            metrics,
            ..
        } = self;
        let chain = &mut hits[rdi][fwi];
        let offset_size = chain.hits.len();
        if offset_size == 0 {
            return 0;
        }
        let read_len = chain.len;
        let max_size: u64 = if chain.cur >= chain.len {
            max_genome_hits as u64
        } else {
            1
        };

        let skip = |h: &PartialHit| {
            h.is_empty()
                || (h.kind == HitKind::Candidate && h.size() > max_size)
                || h.has_genome_coords()
                || h.anchor_examined
                || h.len <= min_k + 2
        };

        'outer: for _ in 0..offset_size {
            // best not-yet-resolved hit: kind first, then narrower range,
            // then longer match
            let mut hj = usize::MAX;
            for j in 0..offset_size {
                if !skip(&chain.hits[j]) {
                    hj = j;
                    break;
                }
            }
            if hj == usize::MAX {
                break;
            }
            for hk in hj + 1..offset_size {
                if skip(&chain.hits[hk]) {
                    continue;
                }
                let (a, b) = (&chain.hits[hj], &chain.hits[hk]);
                if a.kind == b.kind {
                    if a.size() > b.size() || (a.size() == b.size() && a.len < b.len) {
                        hj = hk;
                    }
                } else if b.kind > a.kind {
                    hj = hk;
                }
            }

            // Resolve the winner's SA range with the walk-left procedure.
            let (range, bwoff, seed_len, kind) = {
                let p = &chain.hits[hj];
                (p.range, p.bwoff, p.len, p.kind)
            };
            let seed_rdoff = read_len - bwoff - seed_len;
            let nelt = range.len();
            metrics.global_genome_coords += nelt;
            let mut straddled = false;
            {
                let p = &mut chain.hits[hj];
                p.anchor_examined = true;
                for row in range.top..range.bot {
                    let joined = global.resolve_row(row);
                    match global.joined_to_text_off(u64::from(seed_len), joined, false) {
                        JoinedLoc::Mapped {
                            tidx,
                            toff,
                            straddled: s,
                            ..
                        } => {
                            straddled |= s;
                            if toff < u64::from(seed_rdoff) {
                                continue;
                            }
                            p.coords.push(Coord { tidx, toff, fw });
                        }
                        JoinedLoc::Rejected => {}
                    }
                }
            }
            if !chain.hits[hj].has_genome_coords() {
                continue;
            }

            if genome_hits.len() + chain.hits[hj].coords.len() > max_genome_hits {
                chain.hits[hj].coords.shuffle(rng);
            }
            let coords = std::mem::take(&mut chain.hits[hj].coords);
            let mut cap_reached = false;
            for ci in 0..coords.len() {
                let coord = coords[ci];
                let mut overlapped = false;
                for gh in genome_hits.iter_mut() {
                    if gh.tidx != coord.tidx || gh.fw != coord.fw {
                        continue;
                    }
                    // project both seeds to the read's right end and compare
                    let proj1 = gh.toff + u64::from(read_len) - u64::from(gh.rdoff);
                    let proj2 = coord.toff + u64::from(read_len) - u64::from(seed_rdoff);
                    if proj1.abs_diff(proj2) <= max_intron_len {
                        overlapped = true;
                        gh.hitcount += 1;
                        break;
                    }
                }
                if !overlapped {
                    genome_hits.push(GenomeHit::new(
                        coord.fw,
                        seed_rdoff,
                        if straddled { 1 } else { seed_len },
                        0,
                        0,
                        coord.tidx,
                        coord.toff,
                        shared,
                    ));
                }
                if kind == HitKind::Candidate && genome_hits.len() >= max_genome_hits {
                    cap_reached = true;
                    break;
                }
            }
            chain.hits[hj].coords = coords;
            if cap_reached {
                break 'outer;
            }
        }
        genome_hits.len()
    }

    /// Align the other mate near `(tidx, toff)` where this mate aligned.
    pub(crate) fn align_mate<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        fw: bool,
        tidx: usize,
        toff: u64,
    ) -> bool {
        debug_assert!(rdi < 2);
        let ordi = 1 - rdi;
        let ofw = if fw == ctx.opts.mate2_fw {
            ctx.opts.mate1_fw
        } else {
            ctx.opts.mate2_fw
        };
        let rdlen = self.reads[ordi].len() as u32;
        if rdlen == 0 {
            return false;
        }

        while let Some(h) = self.genome_hits.pop() {
            h.free(&mut self.shared);
        }

        let mut local = match ctx.index.local_at(tidx, toff) {
            Some(l) => l,
            None => return false,
        };
        let mut max_hitlen = 0u32;
        let mut count = 0;
        let mut first = true;
        while count < 2 {
            count += 1;
            if first {
                first = false;
            } else {
                local = match ctx.index.prev_local(local) {
                    Some(l) if !l.is_empty_index() => l,
                    _ => break,
                };
            }
            let mut hitoff: i64 = i64::from(rdlen) - 1;
            while hitoff >= i64::from(MIN_K_LOCAL) - 1 {
                let seq = self.reads[ordi].seq(ofw);
                let (nelt, hitlen, range, _uniq) = local_search(
                    local,
                    seq,
                    hitoff as u32,
                    MIN_K_LOCAL,
                    u32::MAX,
                    false,
                    &mut self.metrics.bwops,
                );
                debug_assert!(hitlen <= hitoff as u32 + 1);
                if nelt > 0 && nelt <= 5 && hitlen > max_hitlen {
                    let seed_rdoff = hitoff as u32 + 1 - hitlen;
                    let mut coords: Vec<Coord> = Vec::new();
                    resolve_local_range(
                        local,
                        range,
                        ofw,
                        seed_rdoff,
                        hitlen,
                        &mut coords,
                        &mut self.metrics,
                    );
                    while let Some(h) = self.genome_hits.pop() {
                        h.free(&mut self.shared);
                    }
                    for coord in &coords {
                        self.genome_hits.push(GenomeHit::new(
                            coord.fw,
                            seed_rdoff,
                            hitlen,
                            0,
                            0,
                            coord.tidx,
                            coord.toff,
                            &mut self.shared,
                        ));
                    }
                    max_hitlen = hitlen;
                }
                hitoff -= i64::from(hitlen.saturating_sub(1));
                if hitoff > 0 {
                    hitoff -= 1;
                } else {
                    break;
                }
            }
        }

        if max_hitlen < MIN_K_LOCAL {
            return false;
        }

        const MAX_MATE_SEEDS: usize = 5;
        if self.genome_hits.len() > MAX_MATE_SEEDS {
            let mut hits = std::mem::take(&mut self.genome_hits);
            hits.shuffle(&mut self.rng);
            while hits.len() > MAX_MATE_SEEDS {
                if let Some(h) = hits.pop() {
                    h.free(&mut self.shared);
                }
            }
            self.genome_hits = hits;
        }

        let mut hits = std::mem::take(&mut self.genome_hits);
        for gh in hits.drain(..) {
            self.metrics.anchor_atts += 1;
            let mut gh = gh;
            let mut leftext = u32::MAX;
            let mut rightext = u32::MAX;
            gh.extend(
                &self.reads[ordi],
                ctx.reference,
                ctx.scoring,
                ctx.opts,
                &mut self.shared,
                MIN_K_LOCAL,
                &mut leftext,
                &mut rightext,
                0,
            );
            let hitoff = gh.rdoff;
            let hitlen = gh.len;
            self.hybrid_search_recur(ctx, sink, ordi, &gh, hitoff, hitlen, 0);
            gh.free(&mut self.shared);
        }
        self.genome_hits = hits;
        true
    }

    /// Pair up reported unpaired alignments into concordant pairs.
    pub(crate) fn pair_reads<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
    ) -> bool {
        debug_assert!(self.paired);
        let n1 = sink.unp(0).len();
        let n2 = sink.unp(1).len();
        for i in 0..n1 {
            for j in 0..n2 {
                if self.concordant.iter().any(|&(a, b)| a == i && b == j) {
                    continue;
                }
                if sink.done_concordant() {
                    return true;
                }
                let accept = {
                    let r1 = &sink.unp(0)[i];
                    let r2 = &sink.unp(1)[j];
                    if r1.tidx != r2.tidx {
                        continue;
                    }
                    let (mut l1, mut rt1) = (r1.toff, r1.right_off());
                    let (mut l2, mut rt2) = (r2.toff, r2.right_off());
                    if r1.fw == ctx.opts.mate1_fw {
                        if r2.fw != ctx.opts.mate2_fw {
                            continue;
                        }
                    } else {
                        if r2.fw == ctx.opts.mate2_fw {
                            continue;
                        }
                        std::mem::swap(&mut l1, &mut l2);
                        std::mem::swap(&mut rt1, &mut rt2);
                    }
                    if l1 > l2 || rt1 > rt2 {
                        continue;
                    }
                    if rt1 + ctx.opts.max_intron_len < l2 {
                        continue;
                    }
                    debug_assert!(r1.score >= self.minsc[0] && r2.score >= self.minsc[1]);
                    r1.score + r2.score >= sink.best_pair() || ctx.opts.secondary
                };
                if accept {
                    sink.report_pair(i, j);
                    self.concordant.push((i, j));
                }
            }
        }
        true
    }

    /// Emit a full-coverage hit meeting the score minimum; also registers
    /// novel splice junctions and flags exonic alignments near known sites.
    pub(crate) fn report_hit<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        hit: &GenomeHit,
    ) -> bool {
        let rd = &self.reads[rdi];
        let rdlen = rd.len() as u32;
        if hit.rdoff - hit.trim5 > 0 || hit.len + hit.trim5 + hit.trim3 < rdlen {
            return false;
        }
        if hit.score() < self.minsc[rdi] {
            return false;
        }
        debug_assert!(hit.matches_reference(rd, ctx.reference, &self.shared));

        let mut edits: Vec<Edit> = hit.edits(&self.shared).to_vec();
        if hit.trim5 > 0 {
            for e in &mut edits {
                e.pos += hit.trim5;
            }
        }

        // Register novel junctions before orientation flipping; positions in
        // the edit list are alignment-oriented.
        if !ctx.opts.no_spliced_alignment {
            let mut shift: i64 = 0;
            for e in hit.edits(&self.shared) {
                if e.kind == EditKind::Splice && !e.known_spl {
                    let intron_start =
                        (hit.toff + u64::from(e.pos)).saturating_add_signed(shift);
                    ctx.ssdb.add(SpliceSite {
                        tidx: hit.tidx,
                        left: intron_start - 1,
                        right: intron_start + u64::from(e.spl_len),
                        dir: e.spl_dir,
                        from_file: false,
                        read_id: rd.rdid,
                    });
                }
                shift += e.ref_shift();
            }
        }

        let mut near_splice_sites = hit.spliced(&self.shared);
        if !ctx.opts.no_spliced_alignment && !near_splice_sites {
            // prefer loci near known junctions over pseudogene copies
            let left1 = hit.toff.saturating_sub(MAX_EXON_SIZE);
            let right1 = hit.toff;
            let left2 = hit.right_off(&self.shared).saturating_sub(1);
            let right2 = left2 + MAX_EXON_SIZE;
            near_splice_sites =
                ctx.ssdb
                    .has_splice_sites(hit.tidx, left1, right1, left2, right2, true);
        }

        if !hit.fw {
            invert_poss(&mut edits, rdlen as usize);
        }
        let res = AlnRes {
            score: hit.score(),
            splice_score: hit.splice_score(),
            edits,
            tidx: hit.tidx,
            toff: hit.toff,
            fw: hit.fw,
            read_len: rdlen as usize,
            trim5: if hit.fw { hit.trim5 } else { hit.trim3 },
            trim3: if hit.fw { hit.trim3 } else { hit.trim5 },
            near_splice_sites,
        };
        let slot = if rdi == 0 && !self.right_end_only { 0 } else { 1 };
        sink.report_unp(slot, res)
    }

    /// Already reported with the same leftmost coordinate and edits?
    pub(crate) fn redundant(&mut self, sink: &AlnSink, rdi: usize, hit: &GenomeHit) -> bool {
        let slot = if rdi == 0 && !self.right_end_only { 0 } else { 1 };
        let rdlen = self.reads[rdi].len();
        for res in sink.unp(slot) {
            if res.tidx != hit.tidx || res.toff != hit.toff || res.fw != hit.fw {
                continue;
            }
            let he = hit.edits(&self.shared);
            if he.len() != res.edits.len() {
                continue;
            }
            let mut tmp: Vec<Edit> = he.to_vec();
            if hit.trim5 > 0 {
                for e in &mut tmp {
                    e.pos += hit.trim5;
                }
            }
            if !hit.fw {
                invert_poss(&mut tmp, rdlen);
            }
            if tmp == res.edits {
                return true;
            }
        }
        false
    }

    /// Memoization of fully-claimed hits so the recursion never expands the
    /// same state twice.
    pub(crate) fn is_searched(&self, hit: &GenomeHit, rdi: usize) -> bool {
        self.searched[rdi]
            .iter()
            .any(|s| s.same_alignment(hit, &self.shared))
    }

    pub(crate) fn add_searched(&mut self, hit: &GenomeHit, rdi: usize) {
        debug_assert!(!self.is_searched(hit, rdi));
        let dup = hit.duplicate(&mut self.shared);
        self.searched[rdi].push(dup);
    }
}

/// Resolve a local-index SA range to global coordinates. Resolution stops at
/// the first window-straddling element; earlier coordinates are kept.
pub(crate) fn resolve_local_range<L: LocalIndex>(
    local: &L,
    range: FmRange,
    fw: bool,
    seed_rdoff: u32,
    seed_len: u32,
    coords: &mut Vec<Coord>,
    metrics: &mut HiMetrics,
) {
    coords.clear();
    metrics.local_genome_coords += range.len();
    for row in range.top..range.bot {
        let local_off = local.resolve_row(row);
        match local.joined_to_text_off(u64::from(seed_len), local_off, true) {
            JoinedLoc::Mapped { toff, .. } => {
                let global_toff = toff + local.local_offset();
                if global_toff < u64::from(seed_rdoff) {
                    continue;
                }
                coords.push(Coord {
                    tidx: local.tidx(),
                    toff: global_toff,
                    fw,
                });
            }
            JoinedLoc::Rejected => break,
        }
    }
    coords.sort_unstable();
}

/// Resolve a global-index SA range, rejecting contig straddlers.
pub(crate) fn resolve_global_range<G: FmIndex>(
    global: &G,
    range: FmRange,
    fw: bool,
    seed_rdoff: u32,
    seed_len: u32,
    coords: &mut Vec<Coord>,
    metrics: &mut HiMetrics,
) {
    coords.clear();
    metrics.global_genome_coords += range.len();
    for row in range.top..range.bot {
        let joined = global.resolve_row(row);
        match global.joined_to_text_off(u64::from(seed_len), joined, true) {
            JoinedLoc::Mapped { tidx, toff, .. } => {
                if toff < u64::from(seed_rdoff) {
                    continue;
                }
                coords.push(Coord { tidx, toff, fw });
            }
            JoinedLoc::Rejected => break,
        }
    }
    coords.sort_unstable();
}

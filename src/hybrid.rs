// Recursive bidirectional hybrid extension.
//
// An anchor claims a covered read interval [hitoff, hitoff+hitlen). Each
// recursion step dispatches on coverage: a fully covered hit is reported
// (after splice-site completion against the site store), otherwise the
// larger strategy ladder runs on the smaller uncovered side: known-site
// jump, up to two local FM-index probes, one global probe for long introns,
// direct mismatch extension, and finally a skip-ahead that trades one
// expected mismatch for progress. A shared local-index-probe budget bounds
// the fan-out.

use crate::aligner::{
    global_search, local_search, resolve_global_range, resolve_local_range, AlignContext,
    HiAligner, MIN_K_LOCAL,
};
use crate::genome_hit::GenomeHit;
use crate::index::{HierIndex, LocalIndex};
use crate::reference::Reference;
use crate::sink::AlnSink;

impl HiAligner {
    /// Extend every anchor bidirectionally, best (most corroborated, then
    /// longest) first.
    pub(crate) fn hybrid_search<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        fw: bool,
    ) {
        let _ = fw;
        self.metrics.local_atts += 1;

        let mut ghits = std::mem::take(&mut self.genome_hits);
        // First pass: exact extension against the reference, no mismatches.
        for gh in ghits.iter_mut() {
            let mut leftext = u32::MAX;
            let mut rightext = u32::MAX;
            gh.extend(
                &self.reads[rdi],
                ctx.reference,
                ctx.scoring,
                ctx.opts,
                &mut self.shared,
                MIN_K_LOCAL,
                &mut leftext,
                &mut rightext,
                0,
            );
        }

        let n = ghits.len();
        let mut done = std::mem::take(&mut self.genome_hits_done);
        done.clear();
        done.resize(n, false);
        for _ in 0..n {
            let mut hj = usize::MAX;
            for j in 0..n {
                if !done[j] {
                    hj = j;
                    break;
                }
            }
            if hj == usize::MAX {
                break;
            }
            for hk in hj + 1..n {
                if done[hk] {
                    continue;
                }
                if ghits[hk].hitcount > ghits[hj].hitcount
                    || (ghits[hk].hitcount == ghits[hj].hitcount && ghits[hk].len > ghits[hj].len)
                {
                    hj = hk;
                }
            }
            self.metrics.anchor_atts += 1;
            let (hitoff, hitlen) = (ghits[hj].rdoff, ghits[hj].len);
            self.hybrid_search_recur(ctx, sink, rdi, &ghits[hj], hitoff, hitlen, 0);
            done[hj] = true;
        }
        self.genome_hits_done = done;
        for gh in ghits.drain(..) {
            gh.free(&mut self.shared);
        }
        self.genome_hits = ghits;
    }

    /// One recursion step. Returns the best full-alignment score reached in
    /// this subtree.
    pub(crate) fn hybrid_search_recur<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        hit: &GenomeHit,
        hitoff: u32,
        hitlen: u32,
        dep: usize,
    ) -> i64 {
        self.metrics.local_search_recur += 1;
        let maxsc = i64::MIN;
        if hit.score() < self.minsc[rdi] {
            return maxsc;
        }
        // A hit claiming exactly its own extent is a candidate state:
        // expand it at most once.
        if hitoff == hit.rdoff - hit.trim5 && hitlen == hit.len + hit.trim5 + hit.trim3 {
            if self.is_searched(hit, rdi) {
                return maxsc;
            }
            self.add_searched(hit, rdi);
        }

        while self.coords_by_dep.len() <= dep {
            self.coords_by_dep.push(Vec::new());
            self.local_hits_by_dep.push(Vec::new());
            self.sites_by_dep.push(Vec::new());
        }
        let mut coords = std::mem::take(&mut self.coords_by_dep[dep]);
        let mut local_hits = std::mem::take(&mut self.local_hits_by_dep[dep]);
        let mut sites = std::mem::take(&mut self.sites_by_dep[dep]);

        let ret = self.recur_dispatch(
            ctx,
            sink,
            rdi,
            hit,
            hitoff,
            hitlen,
            dep,
            &mut coords,
            &mut local_hits,
            &mut sites,
        );

        for h in local_hits.drain(..) {
            h.free(&mut self.shared);
        }
        coords.clear();
        sites.clear();
        self.coords_by_dep[dep] = coords;
        self.local_hits_by_dep[dep] = local_hits;
        self.sites_by_dep[dep] = sites;
        ret
    }

    #[allow(clippy::too_many_arguments)]
    fn recur_dispatch<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        hit: &GenomeHit,
        hitoff: u32,
        hitlen: u32,
        dep: usize,
        coords: &mut Vec<crate::hit::Coord>,
        local_hits: &mut Vec<GenomeHit>,
        sites: &mut Vec<crate::splice_site::SpliceSite>,
    ) -> i64 {
        let mut maxsc = i64::MIN;
        let rdlen = self.reads[rdi].len() as u32;
        debug_assert!(hitoff + hitlen <= rdlen);
        log::trace!(
            "recur rdi={} fw={} claim=[{},{}) hit=[{},{}) toff={} score={} dep={}",
            rdi,
            hit.fw,
            hitoff,
            hitoff + hitlen,
            hit.rdoff,
            hit.rdoff + hit.len,
            hit.toff,
            hit.score(),
            dep
        );

        if hitoff == 0 && hitlen == rdlen {
            // (a) fully covered
            if self.redundant(sink, rdi, hit) {
                return maxsc;
            }
            if ctx.ssdb.is_empty() {
                self.report_hit(ctx, sink, rdi, hit);
                return maxsc.max(hit.score());
            }
            maxsc = self.complete_with_splice_sites(ctx, sink, rdi, hit, local_hits, sites);
        } else if hitoff > 0 && (hitoff + hitlen == rdlen || hitoff + hitoff < rdlen - hitlen) {
            // (b) extend into the uncovered left region
            maxsc = self.extend_left(
                ctx, sink, rdi, hit, hitoff, hitlen, dep, coords, local_hits, sites,
            );
        } else {
            // (c) extend into the uncovered right region
            maxsc = self.extend_right(
                ctx, sink, rdi, hit, hitoff, hitlen, dep, coords, local_hits, sites,
            );
        }
        maxsc
    }

    /// Fully-covered case: report, plus alternate spliced placements built
    /// from known/novel splice sites near either end. Only alternates with
    /// the maximum anchor count are emitted.
    fn complete_with_splice_sites<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        hit: &GenomeHit,
        local_hits: &mut Vec<GenomeHit>,
        sites: &mut Vec<crate::splice_site::SpliceSite>,
    ) -> i64 {
        let mut maxsc = i64::MIN;
        let rdlen = self.reads[rdi].len() as u32;
        let rdid = self.reads[rdi].rdid;
        let mut best_score = hit.score();
        let min_match_len = self.min_k;

        local_hits.clear();
        let mut anchors_added = std::mem::take(&mut self.anchors_added);
        anchors_added.clear();
        let dup = hit.duplicate(&mut self.shared);
        local_hits.push(dup);
        anchors_added.push(0);

        // Left-side alternates: a known junction landing inside the leading
        // fragment re-anchors the prefix on the far side of the intron.
        let fl = hit.get_left(&self.shared, None);
        if fl.len >= min_match_len
            && fl.toff >= u64::from(min_match_len)
            && hit.trim5 == 0
            && !ctx.opts.no_spliced_alignment
        {
            ctx.ssdb.left_splice_sites(
                hit.tidx,
                fl.toff + u64::from(min_match_len),
                u64::from(min_match_len),
                sites,
            );
            for si in 0..sites.len() {
                let ss = sites[si];
                if !ss.from_file && ss.read_id + ctx.opts.thread_rids_mindist > rdid {
                    continue;
                }
                if fl.toff + u64::from(fl.len) - 1 < ss.right {
                    continue;
                }
                if ss.right - fl.toff > ss.left {
                    continue;
                }
                let frag2off = ss.left - (ss.right - fl.toff);
                let mut temp =
                    GenomeHit::new(hit.fw, 0, 0, 0, 0, hit.tidx, frag2off + 1, &mut self.shared);
                if !temp.compatible_with(hit, &self.shared, ctx.opts) {
                    temp.free(&mut self.shared);
                    continue;
                }
                let minsc0 = self.minsc[rdi].max(best_score);
                let combined = temp.combine_with(
                    hit,
                    &self.reads[rdi],
                    ctx.reference,
                    ctx.scoring,
                    ctx.opts,
                    &mut self.shared,
                    minsc0,
                    1,
                    1,
                    Some(&ss),
                );
                let minsc0 = minsc0.max(sink.best_unp(rdi));
                let (left_anchor, nedits) = temp.left_anchor(&self.shared);
                if combined
                    && temp.score() >= minsc0
                    && nedits <= left_anchor / 4
                    && !self.redundant(sink, rdi, &temp)
                {
                    if temp.score() > best_score {
                        best_score = temp.score();
                    }
                    local_hits.push(temp);
                    anchors_added.push(1);
                } else {
                    temp.free(&mut self.shared);
                }
            }
        }

        // Right-side alternates, including on alternates just added.
        let num_initial = local_hits.len();
        for i in 0..num_initial {
            let (fr, cur_score, cur_trim3, cur_tidx, cur_fw) = {
                let h = &local_hits[i];
                (h.get_right(&self.shared, None), h.score(), h.trim3, h.tidx, h.fw)
            };
            if cur_score < best_score {
                continue;
            }
            if fr.len >= min_match_len && cur_trim3 == 0 && !ctx.opts.no_spliced_alignment {
                ctx.ssdb.right_splice_sites(
                    cur_tidx,
                    fr.toff + u64::from(fr.len) - u64::from(min_match_len),
                    u64::from(min_match_len),
                    sites,
                );
                for si in 0..sites.len() {
                    let ss = sites[si];
                    if !ss.from_file && ss.read_id + ctx.opts.thread_rids_mindist > rdid {
                        continue;
                    }
                    if fr.toff > ss.left {
                        continue;
                    }
                    let frag2off = ss.right - ss.left + fr.toff + u64::from(fr.len) - 1;
                    let temp = GenomeHit::new(
                        cur_fw,
                        fr.rdoff + fr.len,
                        rdlen - fr.rdoff - fr.len,
                        0,
                        0,
                        cur_tidx,
                        frag2off,
                        &mut self.shared,
                    );
                    if !local_hits[i].compatible_with(&temp, &self.shared, ctx.opts) {
                        temp.free(&mut self.shared);
                        continue;
                    }
                    let mut combined_hit = local_hits[i].duplicate(&mut self.shared);
                    let minsc0 = self.minsc[rdi].max(best_score);
                    let combined = combined_hit.combine_with(
                        &temp,
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        minsc0,
                        1,
                        1,
                        Some(&ss),
                    );
                    temp.free(&mut self.shared);
                    let minsc0 = minsc0.max(sink.best_unp(rdi));
                    let (right_anchor, nedits) = combined_hit.right_anchor(&self.shared);
                    if combined
                        && combined_hit.score() >= minsc0
                        && nedits <= right_anchor / 4
                        && !self.redundant(sink, rdi, &combined_hit)
                    {
                        if combined_hit.score() > best_score {
                            best_score = combined_hit.score();
                        }
                        anchors_added.push(anchors_added[i] + 1);
                        local_hits.push(combined_hit);
                    } else {
                        combined_hit.free(&mut self.shared);
                    }
                }
            }
        }

        debug_assert_eq!(local_hits.len(), anchors_added.len());
        let max_added = anchors_added.iter().copied().max().unwrap_or(0);
        for i in 0..local_hits.len() {
            if !ctx.opts.secondary && local_hits[i].score() < best_score {
                continue;
            }
            if anchors_added[i] < max_added {
                continue;
            }
            let can = &local_hits[i];
            if !self.redundant(sink, rdi, can) {
                let score = can.score();
                self.report_hit(ctx, sink, rdi, can);
                maxsc = maxsc.max(score);
            }
        }
        self.anchors_added = anchors_added;
        maxsc
    }

    /// Case (b): the uncovered left region is next.
    #[allow(clippy::too_many_arguments)]
    fn extend_left<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        hit: &GenomeHit,
        hitoff: u32,
        hitlen: u32,
        dep: usize,
        coords: &mut Vec<crate::hit::Coord>,
        local_hits: &mut Vec<GenomeHit>,
        sites: &mut Vec<crate::splice_site::SpliceSite>,
    ) -> i64 {
        let mut maxsc = i64::MIN;
        let rdlen = self.reads[rdi].len() as u32;
        let rdid = self.reads[rdi].rdid;
        let min_k = self.min_k;
        let mmp = ctx.scoring.mm_pen_max;

        // (1) known-splice-site jump across the intron left of the anchor
        if !ctx.ssdb.is_empty() {
            let fl = hit.get_left(&self.shared, None);
            let min_match_len = MIN_K_LOCAL;
            if fl.len >= min_match_len
                && fl.toff >= u64::from(min_match_len)
                && !ctx.opts.no_spliced_alignment
            {
                let window = min_match_len + min_match_len.min(fl.rdoff);
                ctx.ssdb.left_splice_sites(
                    hit.tidx,
                    fl.toff + u64::from(min_match_len),
                    u64::from(window),
                    sites,
                );
                for si in 0..sites.len() {
                    let ss = sites[si];
                    if !ss.from_file && ss.read_id + ctx.opts.thread_rids_mindist > rdid {
                        continue;
                    }
                    if fl.toff + u64::from(fl.len) - 1 < ss.right {
                        continue;
                    }
                    if ss.right - fl.toff > ss.left {
                        continue;
                    }
                    let frag2off = ss.left - (ss.right - fl.toff);
                    if frag2off + 1 < u64::from(hitoff) || frag2off + 1 < u64::from(fl.rdoff) {
                        continue;
                    }
                    let mut temp = GenomeHit::new(
                        hit.fw,
                        0,
                        fl.rdoff,
                        0,
                        0,
                        hit.tidx,
                        frag2off + 1 - u64::from(fl.rdoff),
                        &mut self.shared,
                    );
                    if !temp.compatible_with(hit, &self.shared, ctx.opts) {
                        temp.free(&mut self.shared);
                        continue;
                    }
                    let mut minsc = self.minsc[rdi];
                    let combined = temp.combine_with(
                        hit,
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        minsc,
                        1,
                        1,
                        Some(&ss),
                    );
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    let (left_anchor, nedits) = temp.left_anchor(&self.shared);
                    if combined && temp.score() >= minsc && nedits <= left_anchor / 4 {
                        debug_assert_eq!(temp.trim5, 0);
                        let off2 = temp.rdoff;
                        let len2 = temp.len + temp.trim3;
                        let sub = self.hybrid_search_recur(ctx, sink, rdi, &temp, off2, len2, dep + 1);
                        maxsc = maxsc.max(sub);
                    }
                    temp.free(&mut self.shared);
                }
            }
        }

        // If the uncovered part is small, a single extension attempt may
        // cover it without any index probe.
        let mut use_localindex = true;
        if hitoff == hit.rdoff && hitoff <= min_k {
            let mut temp = hit.duplicate(&mut self.shared);
            let mut l = u32::MAX;
            let mut r = 0u32;
            temp.extend(
                &self.reads[rdi],
                ctx.reference,
                ctx.scoring,
                ctx.opts,
                &mut self.shared,
                MIN_K_LOCAL,
                &mut l,
                &mut r,
                1,
            );
            if temp.rdoff == 0 {
                use_localindex = false;
            }
            temp.free(&mut self.shared);
        }

        // (2) up to two local FM-index probes, walking leftward
        let mut local = ctx.index.local_at(hit.tidx, hit.toff);
        let mut success = false;
        let mut count = 0u32;
        let mut first = true;
        let prev_score = hit.score();
        local_hits.clear();
        while !success && count < 2 && use_localindex {
            count += 1;
            if self.metrics.local_index_atts >= self.max_local_index_atts {
                break;
            }
            if first {
                first = false;
            } else {
                local = local.and_then(|l| ctx.index.prev_local(l));
            }
            let loc = match local {
                Some(l) if !l.is_empty_index() => l,
                _ => break,
            };

            let mut extoff = hitoff - 1;
            if extoff > 0 {
                extoff -= 1;
            }
            if extoff < ctx.opts.min_anchor_len {
                extoff = ctx.opts.min_anchor_len;
            }
            let max_nelt = 5u64;
            let mut no_extension = false;
            let mut nelt = 0u64;
            let mut extlen = 0u32;
            let mut range = crate::index::FmRange::EMPTY;
            let mut unique = false;
            while extoff < rdlen {
                self.metrics.local_index_atts += 1;
                let (n, el, r, u) = local_search(
                    loc,
                    self.reads[rdi].seq(hit.fw),
                    extoff,
                    MIN_K_LOCAL,
                    u32::MAX,
                    true,
                    &mut self.metrics.bwops,
                );
                nelt = n;
                extlen = el;
                range = r;
                unique = u;
                if extoff + 1 - extlen >= hitoff {
                    no_extension = true;
                    break;
                }
                if nelt <= max_nelt {
                    break;
                }
                extoff += 1;
            }
            debug_assert!(extlen <= extoff + 1);

            if nelt > 0 && nelt <= max_nelt && extlen >= ctx.opts.min_anchor_len && !no_extension {
                resolve_local_range(
                    loc,
                    range,
                    hit.fw,
                    extoff + 1 - extlen,
                    extlen,
                    coords,
                    &mut self.metrics,
                );
                for ri in (0..coords.len()).rev() {
                    let coord = coords[ri];
                    let mut temp = GenomeHit::new(
                        coord.fw,
                        extoff + 1 - extlen,
                        extlen,
                        0,
                        0,
                        coord.tidx,
                        coord.toff,
                        &mut self.shared,
                    );
                    if !temp.compatible_with(hit, &self.shared, ctx.opts) {
                        temp.free(&mut self.shared);
                        if count == 1 {
                            continue;
                        } else {
                            break;
                        }
                    }
                    if unique {
                        debug_assert_eq!(coords.len(), 1);
                        let mut l = u32::MAX;
                        let mut r = 0u32;
                        temp.extend(
                            &self.reads[rdi],
                            ctx.reference,
                            ctx.scoring,
                            ctx.opts,
                            &mut self.shared,
                            MIN_K_LOCAL,
                            &mut l,
                            &mut r,
                            0,
                        );
                    }
                    let mut minsc = self.minsc[rdi];
                    let combined = temp.combine_with(
                        hit,
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        minsc,
                        ctx.opts.min_anchor_len,
                        ctx.opts.min_anchor_len_noncan,
                        None,
                    );
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    if combined && temp.score() >= minsc {
                        debug_assert_eq!(temp.trim5, 0);
                        if temp.score() >= prev_score - mmp {
                            let off2 = temp.rdoff;
                            let len2 = temp.len + temp.trim3;
                            let sub =
                                self.hybrid_search_recur(ctx, sink, rdi, &temp, off2, len2, dep + 1);
                            maxsc = maxsc.max(sub);
                            temp.free(&mut self.shared);
                        } else {
                            // weaker placement: keep, expand only if nothing
                            // better pans out
                            local_hits.push(temp);
                        }
                    } else {
                        temp.free(&mut self.shared);
                    }
                }
            }

            if maxsc >= prev_score - mmp {
                success = true;
            }
            let exhausted = local.and_then(|l| ctx.index.prev_local(l)).is_none();
            if !success
                && (self.metrics.local_index_atts >= self.max_local_index_atts
                    || count == 2
                    || exhausted)
            {
                let mut deferred = std::mem::take(local_hits);
                for temp in deferred.drain(..) {
                    let mut minsc = self.minsc[rdi];
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    if temp.score() >= minsc {
                        let off2 = temp.rdoff;
                        let len2 = temp.len + temp.trim3;
                        let sub =
                            self.hybrid_search_recur(ctx, sink, rdi, &temp, off2, len2, dep + 1);
                        maxsc = maxsc.max(sub);
                    }
                    temp.free(&mut self.shared);
                }
                *local_hits = deferred;
            }
        }

        if success {
            return maxsc;
        }

        // (3) one global probe: the partner exon may sit beyond any local
        // window
        if hitoff > min_k && self.metrics.local_index_atts < self.max_local_index_atts {
            let extoff = hitoff - 1;
            let (nelt, extlen, range, unique) = global_search(
                ctx.index.global(),
                self.reads[rdi].seq(hit.fw),
                min_k,
                extoff,
                true,
                &mut self.metrics.bwops,
            );
            if nelt > 0 && nelt <= 5 && extlen >= min_k {
                resolve_global_range(
                    ctx.index.global(),
                    range,
                    hit.fw,
                    extoff + 1 - extlen,
                    extlen,
                    coords,
                    &mut self.metrics,
                );
                for ri in (0..coords.len()).rev() {
                    let coord = coords[ri];
                    let mut temp = GenomeHit::new(
                        coord.fw,
                        extoff + 1 - extlen,
                        extlen,
                        0,
                        0,
                        coord.tidx,
                        coord.toff,
                        &mut self.shared,
                    );
                    if !temp.compatible_with(hit, &self.shared, ctx.opts) {
                        temp.free(&mut self.shared);
                        continue;
                    }
                    if unique {
                        let mut l = u32::MAX;
                        let mut r = 0u32;
                        temp.extend(
                            &self.reads[rdi],
                            ctx.reference,
                            ctx.scoring,
                            ctx.opts,
                            &mut self.shared,
                            MIN_K_LOCAL,
                            &mut l,
                            &mut r,
                            0,
                        );
                    }
                    let mut minsc = self.minsc[rdi];
                    let combined = temp.combine_with(
                        hit,
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        minsc,
                        ctx.opts.min_anchor_len,
                        ctx.opts.min_anchor_len_noncan,
                        None,
                    );
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    if combined && temp.score() >= minsc {
                        debug_assert_eq!(temp.trim5, 0);
                        let off2 = temp.rdoff;
                        let len2 = temp.len + temp.trim3;
                        let sub =
                            self.hybrid_search_recur(ctx, sink, rdi, &temp, off2, len2, dep + 1);
                        maxsc = maxsc.max(sub);
                    }
                    temp.free(&mut self.shared);
                }
            }
        }

        // (4) direct mismatch extension, (5) skip-ahead
        let mut temp = hit.duplicate(&mut self.shared);
        let minsc0 = self.minsc[rdi];
        debug_assert!(temp.score() >= minsc0);
        let mm_budget = ((temp.score() - minsc0) / mmp).max(0) as u32;
        let mut num_mm_allowed = 1u32;
        if hitoff <= MIN_K_LOCAL {
            num_mm_allowed = temp.rdoff.min(mm_budget);
        }
        self.metrics.local_ext_atts += 1;
        let mut l = u32::MAX;
        let mut r = 0u32;
        temp.extend(
            &self.reads[rdi],
            ctx.reference,
            ctx.scoring,
            ctx.opts,
            &mut self.shared,
            MIN_K_LOCAL,
            &mut l,
            &mut r,
            num_mm_allowed,
        );
        let mut minsc = minsc0;
        if !ctx.opts.secondary {
            minsc = minsc.max(sink.best_unp(rdi));
        }
        if temp.score() >= minsc && l >= MIN_K_LOCAL.min(hit.rdoff) {
            debug_assert_eq!(temp.trim5, 0);
            let off2 = temp.rdoff;
            let len2 = temp.len + temp.trim3;
            let sub = self.hybrid_search_recur(ctx, sink, rdi, &temp, off2, len2, dep + 1);
            maxsc = maxsc.max(sub);
            temp.free(&mut self.shared);
        } else {
            temp.free(&mut self.shared);
            if hitoff > MIN_K_LOCAL {
                let jumplen = if hitoff > min_k { min_k } else { MIN_K_LOCAL };
                debug_assert!(hitoff <= hit.rdoff);
                let expected = hit.score()
                    - i64::from((hit.rdoff - hitoff) / jumplen) * mmp
                    - mmp;
                if expected >= minsc0 {
                    let sub = self.hybrid_search_recur(
                        ctx,
                        sink,
                        rdi,
                        hit,
                        hitoff - jumplen,
                        hitlen + jumplen,
                        dep + 1,
                    );
                    maxsc = maxsc.max(sub);
                }
            }
        }
        maxsc
    }

    /// Case (c): the uncovered right region is next; mirror of `extend_left`
    /// with local windows walked rightward.
    #[allow(clippy::too_many_arguments)]
    fn extend_right<H: HierIndex, R: Reference>(
        &mut self,
        ctx: &AlignContext<'_, H, R>,
        sink: &mut AlnSink,
        rdi: usize,
        hit: &GenomeHit,
        hitoff: u32,
        hitlen: u32,
        dep: usize,
        coords: &mut Vec<crate::hit::Coord>,
        local_hits: &mut Vec<GenomeHit>,
        sites: &mut Vec<crate::splice_site::SpliceSite>,
    ) -> i64 {
        let mut maxsc = i64::MIN;
        let rdlen = self.reads[rdi].len() as u32;
        let rdid = self.reads[rdi].rdid;
        let min_k = self.min_k;
        let mmp = ctx.scoring.mm_pen_max;
        debug_assert!(hitoff + hitlen < rdlen);

        // (1) known-splice-site jump right of the anchor
        if !ctx.ssdb.is_empty() {
            let fr = hit.get_right(&self.shared, None);
            let min_match_len = MIN_K_LOCAL;
            if fr.len >= min_match_len && !ctx.opts.no_spliced_alignment {
                debug_assert!(fr.rdoff + fr.len <= rdlen);
                let right_unmapped = rdlen - fr.rdoff - fr.len;
                let window = min_match_len + min_match_len.min(right_unmapped);
                ctx.ssdb.right_splice_sites(
                    hit.tidx,
                    fr.toff + u64::from(fr.len) - u64::from(min_match_len),
                    u64::from(window),
                    sites,
                );
                for si in 0..sites.len() {
                    let ss = sites[si];
                    if !ss.from_file && ss.read_id + ctx.opts.thread_rids_mindist > rdid {
                        continue;
                    }
                    if fr.toff > ss.left {
                        continue;
                    }
                    let frag2off = ss.right - ss.left + fr.toff + u64::from(fr.len) - 1;
                    let temp = GenomeHit::new(
                        hit.fw,
                        fr.rdoff + fr.len,
                        rdlen - fr.rdoff - fr.len,
                        0,
                        0,
                        hit.tidx,
                        frag2off,
                        &mut self.shared,
                    );
                    if !hit.compatible_with(&temp, &self.shared, ctx.opts) {
                        temp.free(&mut self.shared);
                        continue;
                    }
                    let mut combined_hit = hit.duplicate(&mut self.shared);
                    let mut minsc = self.minsc[rdi];
                    let combined = combined_hit.combine_with(
                        &temp,
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        minsc,
                        1,
                        1,
                        Some(&ss),
                    );
                    temp.free(&mut self.shared);
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    let (right_anchor, nedits) = combined_hit.right_anchor(&self.shared);
                    if combined && combined_hit.score() >= minsc && nedits <= right_anchor / 4 {
                        debug_assert!(combined_hit.trim5 <= combined_hit.rdoff);
                        let off2 = combined_hit.rdoff - combined_hit.trim5;
                        let len2 = combined_hit.len + combined_hit.trim5;
                        let sub = self
                            .hybrid_search_recur(ctx, sink, rdi, &combined_hit, off2, len2, dep + 1);
                        maxsc = maxsc.max(sub);
                    }
                    combined_hit.free(&mut self.shared);
                }
            }
        }

        let mut use_localindex = true;
        if hit.len == hitlen && hitoff + hitlen + min_k > rdlen {
            let mut temp = hit.duplicate(&mut self.shared);
            let mut l = 0u32;
            let mut r = u32::MAX;
            temp.extend(
                &self.reads[rdi],
                ctx.reference,
                ctx.scoring,
                ctx.opts,
                &mut self.shared,
                MIN_K_LOCAL,
                &mut l,
                &mut r,
                1,
            );
            if temp.rdoff + temp.len == rdlen {
                use_localindex = false;
            }
            temp.free(&mut self.shared);
        }

        // (2) up to two local windows, walking rightward
        let mut local = ctx.index.local_at(hit.tidx, hit.toff);
        let mut success = false;
        let mut count = 0u32;
        let mut first = true;
        let prev_score = hit.score();
        local_hits.clear();
        while !success && count < 2 && use_localindex {
            count += 1;
            if self.metrics.local_index_atts >= self.max_local_index_atts {
                break;
            }
            if first {
                first = false;
            } else {
                local = local.and_then(|l| ctx.index.next_local(l));
            }
            let loc = match local {
                Some(l) if !l.is_empty_index() => l,
                _ => break,
            };

            let mut extoff = hitoff + hitlen + MIN_K_LOCAL;
            if extoff + 1 < rdlen {
                extoff += 1;
            }
            if extoff >= rdlen {
                extoff = rdlen - 1;
            }
            let mut max_hit_len = (extoff - hitoff - hitlen).max(MIN_K_LOCAL);
            let max_nelt = 5u64;
            let mut no_extension = false;
            let mut nelt = 0u64;
            let mut extlen = 0u32;
            let mut range = crate::index::FmRange::EMPTY;
            while max_hit_len < extoff + 1 && extoff < rdlen {
                self.metrics.local_index_atts += 1;
                let (n, el, r, _u) = local_search(
                    loc,
                    self.reads[rdi].seq(hit.fw),
                    extoff,
                    MIN_K_LOCAL,
                    max_hit_len,
                    false,
                    &mut self.metrics.bwops,
                );
                nelt = n;
                extlen = el;
                range = r;
                if extoff < hitoff + hitlen {
                    no_extension = true;
                    break;
                }
                if nelt <= max_nelt {
                    break;
                }
                if extoff + 1 < rdlen {
                    extoff += 1;
                } else if extlen < max_hit_len {
                    break;
                } else {
                    max_hit_len += 1;
                }
            }
            debug_assert!(extlen <= extoff + 1);

            if nelt > 0 && nelt <= max_nelt && extlen >= ctx.opts.min_anchor_len && !no_extension {
                resolve_local_range(
                    loc,
                    range,
                    hit.fw,
                    extoff + 1 - extlen,
                    extlen,
                    coords,
                    &mut self.metrics,
                );
                for ri in 0..coords.len() {
                    let coord = coords[ri];
                    let mut temp = GenomeHit::new(
                        coord.fw,
                        extoff + 1 - extlen,
                        extlen,
                        0,
                        0,
                        coord.tidx,
                        coord.toff,
                        &mut self.shared,
                    );
                    if !hit.compatible_with(&temp, &self.shared, ctx.opts) {
                        temp.free(&mut self.shared);
                        if count == 1 {
                            continue;
                        } else {
                            break;
                        }
                    }
                    let mut l = 0u32;
                    let mut r = u32::MAX;
                    temp.extend(
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        MIN_K_LOCAL,
                        &mut l,
                        &mut r,
                        0,
                    );
                    let mut combined_hit = hit.duplicate(&mut self.shared);
                    let mut minsc = self.minsc[rdi];
                    let combined = combined_hit.combine_with(
                        &temp,
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        minsc,
                        ctx.opts.min_anchor_len,
                        ctx.opts.min_anchor_len_noncan,
                        None,
                    );
                    temp.free(&mut self.shared);
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    if combined && combined_hit.score() >= minsc {
                        debug_assert!(combined_hit.trim5 <= combined_hit.rdoff);
                        if combined_hit.score() >= prev_score - mmp {
                            let off2 = combined_hit.rdoff - combined_hit.trim5;
                            let len2 = combined_hit.len + combined_hit.trim5;
                            let sub = self.hybrid_search_recur(
                                ctx,
                                sink,
                                rdi,
                                &combined_hit,
                                off2,
                                len2,
                                dep + 1,
                            );
                            maxsc = maxsc.max(sub);
                            combined_hit.free(&mut self.shared);
                        } else {
                            local_hits.push(combined_hit);
                        }
                    } else {
                        combined_hit.free(&mut self.shared);
                    }
                }
            }

            if maxsc >= prev_score - mmp {
                success = true;
            }
            let exhausted = local.and_then(|l| ctx.index.next_local(l)).is_none();
            if !success
                && (self.metrics.local_index_atts >= self.max_local_index_atts
                    || count == 2
                    || exhausted)
            {
                let mut deferred = std::mem::take(local_hits);
                for temp in deferred.drain(..) {
                    let mut minsc = self.minsc[rdi];
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    if temp.score() >= minsc {
                        let off2 = temp.rdoff - temp.trim5;
                        let len2 = temp.len + temp.trim5;
                        let sub =
                            self.hybrid_search_recur(ctx, sink, rdi, &temp, off2, len2, dep + 1);
                        maxsc = maxsc.max(sub);
                    }
                    temp.free(&mut self.shared);
                }
                *local_hits = deferred;
            }
        }

        if success {
            return maxsc;
        }

        // (3) one global probe rightward
        if hitoff + hitlen + min_k + 1 < rdlen
            && self.metrics.local_index_atts < self.max_local_index_atts
        {
            let extoff = hitoff + hitlen + min_k + 1;
            let (nelt, extlen, range, _unique) = global_search(
                ctx.index.global(),
                self.reads[rdi].seq(hit.fw),
                min_k,
                extoff,
                true,
                &mut self.metrics.bwops,
            );
            if nelt > 0 && nelt <= 5 && extlen >= min_k {
                resolve_global_range(
                    ctx.index.global(),
                    range,
                    hit.fw,
                    extoff + 1 - extlen,
                    extlen,
                    coords,
                    &mut self.metrics,
                );
                for ri in 0..coords.len() {
                    let coord = coords[ri];
                    let mut temp = GenomeHit::new(
                        coord.fw,
                        extoff + 1 - extlen,
                        extlen,
                        0,
                        0,
                        coord.tidx,
                        coord.toff,
                        &mut self.shared,
                    );
                    if !hit.compatible_with(&temp, &self.shared, ctx.opts) {
                        temp.free(&mut self.shared);
                        continue;
                    }
                    let mut l = 0u32;
                    let mut r = u32::MAX;
                    temp.extend(
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        MIN_K_LOCAL,
                        &mut l,
                        &mut r,
                        0,
                    );
                    let mut combined_hit = hit.duplicate(&mut self.shared);
                    let mut minsc = self.minsc[rdi];
                    let combined = combined_hit.combine_with(
                        &temp,
                        &self.reads[rdi],
                        ctx.reference,
                        ctx.scoring,
                        ctx.opts,
                        &mut self.shared,
                        minsc,
                        ctx.opts.min_anchor_len,
                        ctx.opts.min_anchor_len_noncan,
                        None,
                    );
                    temp.free(&mut self.shared);
                    if !ctx.opts.secondary {
                        minsc = minsc.max(sink.best_unp(rdi));
                    }
                    if combined && combined_hit.score() >= minsc {
                        let off2 = combined_hit.rdoff - combined_hit.trim5;
                        let len2 = combined_hit.len + combined_hit.trim5;
                        let sub = self
                            .hybrid_search_recur(ctx, sink, rdi, &combined_hit, off2, len2, dep + 1);
                        maxsc = maxsc.max(sub);
                    }
                    combined_hit.free(&mut self.shared);
                }
            }
        }

        // (4) direct mismatch extension, (5) skip-ahead
        let mut temp = hit.duplicate(&mut self.shared);
        let minsc0 = self.minsc[rdi];
        debug_assert!(temp.score() >= minsc0);
        let mm_budget = ((temp.score() - minsc0) / mmp).max(0) as u32;
        let mut num_mm_allowed = 1u32;
        if rdlen - hitoff - hitlen <= MIN_K_LOCAL {
            num_mm_allowed = (rdlen - temp.rdoff - temp.len).min(mm_budget);
        }
        self.metrics.local_ext_atts += 1;
        let mut l = 0u32;
        let mut r = u32::MAX;
        temp.extend(
            &self.reads[rdi],
            ctx.reference,
            ctx.scoring,
            ctx.opts,
            &mut self.shared,
            MIN_K_LOCAL,
            &mut l,
            &mut r,
            num_mm_allowed,
        );
        let mut minsc = minsc0;
        if !ctx.opts.secondary {
            minsc = minsc.max(sink.best_unp(rdi));
        }
        if temp.score() >= minsc && r >= MIN_K_LOCAL.min(rdlen - hit.len - hit.rdoff) {
            debug_assert_eq!(temp.trim3, 0);
            let off2 = temp.rdoff - temp.trim5;
            let len2 = temp.len + temp.trim5;
            let sub = self.hybrid_search_recur(ctx, sink, rdi, &temp, off2, len2, dep + 1);
            maxsc = maxsc.max(sub);
            temp.free(&mut self.shared);
        } else {
            temp.free(&mut self.shared);
            if hitoff + hitlen + MIN_K_LOCAL < rdlen {
                let jumplen = if hitoff + hitlen + min_k < rdlen {
                    min_k
                } else {
                    MIN_K_LOCAL
                };
                debug_assert!(hitlen >= hit.len);
                let expected = hit.score()
                    - i64::from(hitlen.saturating_sub(hit.len) / jumplen) * mmp
                    - mmp;
                if expected >= minsc0 {
                    let sub = self.hybrid_search_recur(
                        ctx,
                        sink,
                        rdi,
                        hit,
                        hitoff,
                        hitlen + jumplen,
                        dep + 1,
                    );
                    maxsc = maxsc.max(sub);
                }
            }
        }
        maxsc
    }
}

// Placed alignment fragments and the machinery that merges them.
//
// A `GenomeHit` is a contiguous placed alignment of part of a read. Two
// compatible hits are merged by `combine_with`, which decides between a
// plain join, an insertion, a deletion, or a spliced junction, scanning
// every cut position with prefix/suffix mismatch-score tables. Edit lists
// live in a per-thread arena so the recursive search allocates nothing.

use crate::config::AlignOpts;
use crate::edit::{Edit, EditKind, SpliceDir};
use crate::hit::Coord;
use crate::read::Read;
use crate::reference::Reference;
use crate::scoring::Scoring;
use crate::splice_site::{
    canonical_intron_cap, intron_len_prob, intron_len_prob_noncan, noncanonical_intron_cap,
    SpliceSite, SpliceSiteDb, ACCEPTOR_EXONIC_LEN, ACCEPTOR_INTRONIC_LEN, DONOR_EXONIC_LEN,
    DONOR_INTRONIC_LEN,
};

/// Score stored on a hit whose edit list failed a post-check; far below any
/// reachable minimum so threshold comparisons compose.
pub const SCORE_REJECTED: i64 = i64::MIN / 4;

/// Outcome of scoring an edit list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreOutcome {
    Accept(i64),
    Reject,
}

/// Handle into the edit arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditsHandle(u32);

/// Arena of edit vectors. Slots are recycled through a free list and the
/// whole arena resets between reads, so abandoned scratch hits cost at most
/// one slot until the next read.
#[derive(Debug, Default)]
pub struct EditArena {
    slots: Vec<Vec<Edit>>,
    free: Vec<u32>,
}

impl EditArena {
    pub fn alloc(&mut self) -> EditsHandle {
        if let Some(i) = self.free.pop() {
            self.slots[i as usize].clear();
            EditsHandle(i)
        } else {
            self.slots.push(Vec::new());
            EditsHandle((self.slots.len() - 1) as u32)
        }
    }

    pub fn release(&mut self, h: EditsHandle) {
        debug_assert!(!self.free.contains(&h.0));
        self.free.push(h.0);
    }

    pub fn reset(&mut self) {
        self.free.clear();
        self.free.extend((0..self.slots.len() as u32).rev());
        for s in &mut self.slots {
            s.clear();
        }
    }

    #[inline]
    pub fn get(&self, h: EditsHandle) -> &[Edit] {
        &self.slots[h.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, h: EditsHandle) -> &mut Vec<Edit> {
        &mut self.slots[h.0 as usize]
    }

    /// Allocate a new slot holding a copy of `src`.
    pub fn duplicate(&mut self, src: EditsHandle) -> EditsHandle {
        let dst = self.alloc();
        let (si, di) = (src.0 as usize, dst.0 as usize);
        if si == di {
            return dst;
        }
        if si < di {
            let (a, b) = self.slots.split_at_mut(di);
            b[0].clear();
            b[0].extend_from_slice(&a[si]);
        } else {
            let (a, b) = self.slots.split_at_mut(si);
            a[di].clear();
            let src_slice: &[Edit] = &b[0];
            a[di].extend_from_slice(src_slice);
        }
        dst
    }
}

/// Per-thread scratch shared by all hits of the read being aligned.
#[derive(Debug, Default)]
pub struct SharedTempVars {
    pub arena: EditArena,
    pub raw_refbuf: Vec<u8>,
    pub raw_refbuf2: Vec<u8>,
    pub temp_scores: Vec<i64>,
    pub temp_scores2: Vec<i64>,
    pub tmp_edits: Vec<Edit>,
}

impl SharedTempVars {
    pub fn reset(&mut self) {
        self.arena.reset();
        self.raw_refbuf.clear();
        self.raw_refbuf2.clear();
        self.temp_scores.clear();
        self.temp_scores2.clear();
        self.tmp_edits.clear();
    }
}

/// A fragment of a hit bounded by gap/splice edits, with the mismatch score
/// accumulated over its edits when requested.
#[derive(Debug, Clone, Copy)]
pub struct Frag {
    pub rdoff: u32,
    pub len: u32,
    pub toff: u64,
    pub score: i64,
}

/// One contiguous placed alignment (possibly spanning introns via edits).
#[derive(Debug)]
pub struct GenomeHit {
    pub fw: bool,
    pub rdoff: u32,
    pub len: u32,
    pub trim5: u32,
    pub trim3: u32,
    pub tidx: usize,
    pub toff: u64,
    score: i64,
    splice_score: f64,
    pub hitcount: u32,
    edits: EditsHandle,
}

impl GenomeHit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fw: bool,
        rdoff: u32,
        len: u32,
        trim5: u32,
        trim3: u32,
        tidx: usize,
        toff: u64,
        shared: &mut SharedTempVars,
    ) -> Self {
        GenomeHit {
            fw,
            rdoff,
            len,
            trim5,
            trim3,
            tidx,
            toff,
            score: 0,
            splice_score: 0.0,
            hitcount: 1,
            edits: shared.arena.alloc(),
        }
    }

    /// Deep copy; the new hit owns a fresh arena slot.
    pub fn duplicate(&self, shared: &mut SharedTempVars) -> GenomeHit {
        GenomeHit {
            fw: self.fw,
            rdoff: self.rdoff,
            len: self.len,
            trim5: self.trim5,
            trim3: self.trim3,
            tidx: self.tidx,
            toff: self.toff,
            score: self.score,
            splice_score: self.splice_score,
            hitcount: self.hitcount,
            edits: shared.arena.duplicate(self.edits),
        }
    }

    /// Return the arena slot; call where a scratch hit is discarded early.
    pub fn free(self, shared: &mut SharedTempVars) {
        shared.arena.release(self.edits);
    }

    #[inline]
    pub fn edits<'a>(&self, shared: &'a SharedTempVars) -> &'a [Edit] {
        shared.arena.get(self.edits)
    }

    #[inline]
    pub fn score(&self) -> i64 {
        self.score
    }

    #[inline]
    pub fn splice_score(&self) -> f64 {
        self.splice_score
    }

    pub fn coord(&self) -> Coord {
        Coord {
            tidx: self.tidx,
            toff: self.toff,
            fw: self.fw,
        }
    }

    pub fn spliced(&self, shared: &SharedTempVars) -> bool {
        self.edits(shared).iter().any(|e| e.kind == EditKind::Splice)
    }

    /// Same placement and identical edits.
    pub fn same_alignment(&self, other: &GenomeHit, shared: &SharedTempVars) -> bool {
        self.fw == other.fw
            && self.rdoff == other.rdoff
            && self.len == other.len
            && self.tidx == other.tidx
            && self.toff == other.toff
            && self.trim5 == other.trim5
            && self.trim3 == other.trim3
            && self.edits(shared) == other.edits(shared)
    }

    /// Genomic offset one past the last aligned base.
    pub fn right_off(&self, shared: &SharedTempVars) -> u64 {
        let mut toff = self.toff + u64::from(self.len);
        for e in self.edits(shared) {
            match e.kind {
                EditKind::Splice => toff += u64::from(e.spl_len),
                EditKind::ReadGap => toff += 1,
                EditKind::RefGap => toff -= 1,
                EditKind::Mismatch => {}
            }
        }
        toff
    }

    /// Leading fragment: from the start of the hit to the first gap/splice.
    /// With `scored`, accumulates the mismatch penalties inside it.
    pub fn get_left(
        &self,
        shared: &SharedTempVars,
        scored: Option<(&Read, &Scoring)>,
    ) -> Frag {
        let mut frag = Frag {
            rdoff: self.rdoff,
            len: self.len,
            toff: self.toff,
            score: 0,
        };
        let qual = scored.map(|(rd, _)| rd.qual(self.fw));
        for e in self.edits(shared) {
            if e.is_break() {
                frag.len = e.pos;
                break;
            }
            if let (Some(q), Some((_, sc))) = (qual, scored) {
                if e.kind == EditKind::Mismatch {
                    frag.score += sc.mismatch_penalty(e.rd, e.rf, q[(self.rdoff + e.pos) as usize]);
                }
            }
        }
        frag
    }

    /// Trailing fragment: from the last gap/splice to the end of the hit.
    pub fn get_right(
        &self,
        shared: &SharedTempVars,
        scored: Option<(&Read, &Scoring)>,
    ) -> Frag {
        let mut frag = Frag {
            rdoff: self.rdoff,
            len: self.len,
            toff: self.toff,
            score: 0,
        };
        let qual = scored.map(|(rd, _)| rd.qual(self.fw));
        let edits = self.edits(shared);
        for e in edits.iter().rev() {
            if e.is_break() {
                frag.rdoff = self.rdoff + e.pos;
                debug_assert!(e.pos < self.len);
                frag.len = self.len - e.pos;
                if e.kind == EditKind::RefGap {
                    frag.rdoff += 1;
                    frag.len -= 1;
                }
                frag.toff = self.right_off(shared) - u64::from(frag.len);
                break;
            }
            if let (Some(q), Some((_, sc))) = (qual, scored) {
                if e.kind == EditKind::Mismatch {
                    frag.score += sc.mismatch_penalty(e.rd, e.rf, q[(self.rdoff + e.pos) as usize]);
                }
            }
        }
        frag
    }

    /// Length of the anchor left of the first splice, and the number of
    /// non-splice edits inside it.
    pub fn left_anchor(&self, shared: &SharedTempVars) -> (u32, u32) {
        let mut anchor = self.len;
        let mut nedits = 0;
        for e in self.edits(shared) {
            match e.kind {
                EditKind::Splice => {
                    anchor = e.pos;
                    break;
                }
                _ => nedits += 1,
            }
        }
        (anchor, nedits)
    }

    /// Anchor right of the last splice and its edit count.
    pub fn right_anchor(&self, shared: &SharedTempVars) -> (u32, u32) {
        let mut anchor = self.len;
        let mut nedits = 0;
        for e in self.edits(shared).iter().rev() {
            match e.kind {
                EditKind::Splice => {
                    anchor = self.len - e.pos - 1;
                    break;
                }
                _ => nedits += 1,
            }
        }
        (anchor, nedits)
    }

    /// Compatibility precondition for `combine_with`: same contig/strand,
    /// read and reference order agree, and the implied gap is a small indel
    /// or an intron within bounds.
    pub fn compatible_with(
        &self,
        other: &GenomeHit,
        shared: &SharedTempVars,
        opts: &AlignOpts,
    ) -> bool {
        if std::ptr::eq(self, other) {
            return false;
        }
        if self.fw != other.fw || self.tidx != other.tidx {
            return false;
        }
        if self.rdoff > other.rdoff {
            return false;
        }
        if self.rdoff + self.len > other.rdoff + other.len {
            return false;
        }
        if self.toff > other.toff {
            return false;
        }

        let tr = self.get_right(shared, None);
        let ol = other.get_left(shared, None);
        if tr.rdoff > ol.rdoff {
            return false;
        }
        if tr.rdoff + tr.len > ol.rdoff + ol.len {
            return false;
        }
        if tr.toff > ol.toff {
            return false;
        }

        let refdif = ol.toff - tr.toff;
        let rddif = u64::from(ol.rdoff - tr.rdoff);
        if rddif != refdif {
            if rddif > refdif {
                if rddif - refdif > u64::from(opts.max_ins_len) {
                    return false;
                }
            } else {
                let gap = refdif - rddif;
                if gap < opts.min_intron_len {
                    if gap > u64::from(opts.max_del_len) {
                        return false;
                    }
                } else {
                    if opts.no_spliced_alignment {
                        return false;
                    }
                    if gap > opts.max_intron_len {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Merge `other` into `self` across whatever separates them: nothing, up
    /// to `max_ins_len` inserted read bases, up to `max_del_len` deleted
    /// reference bases, or an intron. Returns false if no acceptable cut
    /// position exists; `self` should be treated as spent in that case.
    #[allow(clippy::too_many_arguments)]
    pub fn combine_with<R: Reference>(
        &mut self,
        other: &GenomeHit,
        rd: &Read,
        reference: &R,
        sc: &Scoring,
        opts: &AlignOpts,
        shared: &mut SharedTempVars,
        minsc: i64,
        can_mal: u32,
        noncan_mal: u32,
        known_site: Option<&SpliceSite>,
    ) -> bool {
        if std::ptr::eq(self, other) {
            return false;
        }
        debug_assert!(self.compatible_with(other, shared, opts));
        debug_assert_eq!(self.tidx, other.tidx);

        let tr = self.get_right(shared, Some((rd, sc)));
        let ol = other.get_left(shared, Some((rd, sc)));
        debug_assert!(tr.rdoff <= ol.rdoff);
        if tr.len != 0 && ol.len != 0 && tr.rdoff + tr.len >= ol.rdoff + ol.len {
            return false;
        }
        let len = ol.rdoff - tr.rdoff + ol.len;
        let reflen = reference.approx_len(self.tidx);
        if tr.toff + u64::from(len) > reflen {
            return false;
        }

        let refdif = ol.toff - tr.toff;
        let rddif = u64::from(ol.rdoff - tr.rdoff);
        let mut spliced = false;
        let mut ins = false;
        let mut del = false;
        if refdif != rddif {
            if refdif > rddif {
                if refdif - rddif >= opts.min_intron_len {
                    spliced = true;
                } else {
                    del = true;
                }
            } else {
                ins = true;
            }
        }
        if opts.no_spliced_alignment && spliced {
            return false;
        }

        // Abutting fragments with no gap: append the other hit's edits and
        // rescore.
        if !spliced && !ins && !del && tr.rdoff + tr.len == ol.rdoff {
            let addoff = other.rdoff - self.rdoff;
            shared.tmp_edits.clear();
            let other_edits: &[Edit] = shared.arena.get(other.edits);
            shared.tmp_edits.extend_from_slice(other_edits);
            let own = shared.arena.get_mut(self.edits);
            for mut e in shared.tmp_edits.drain(..) {
                e.pos += addoff;
                own.push(e);
            }
            self.len += other.len;
            self.recompute_score(rd, sc, opts, shared);
            return true;
        }

        let seq = rd.seq(self.fw);
        let qual = rd.qual(self.fw);

        let mut remainsc = minsc - (self.score - tr.score) - (other.score - ol.score);
        if remainsc > 0 {
            remainsc = 0;
        }
        let read_gaps: u64 = if spliced {
            u64::from(sc.max_read_gaps(remainsc + sc.canonical_splice.constant))
        } else {
            0
        };
        let intron_flank = DONOR_INTRONIC_LEN.max(ACCEPTOR_INTRONIC_LEN) as u64;
        let mut this_ref_ext = read_gaps + if spliced { intron_flank } else { 0 };
        if tr.toff + u64::from(len) + this_ref_ext > reflen {
            this_ref_ext = reflen - (tr.toff + u64::from(len));
        }

        let mut maxscorei: Option<i64> = None;
        let mut maxscore = i64::MIN;
        let mut maxspldir = SpliceDir::Unknown;
        let mut maxsplscore = 0.0f32;
        let mut donor_seq = 0u64;
        let mut acceptor_seq = 0u64;
        let mut other_ref_ext = 0i64;

        if spliced || ins || del {
            reference.get_stretch(
                &mut shared.raw_refbuf,
                self.tidx,
                tr.toff,
                (u64::from(len) + this_ref_ext) as usize,
            );
            other_ref_ext = ((read_gaps + intron_flank) as i64)
                .min((ol.toff + u64::from(ol.len) - u64::from(len)) as i64);
            reference.get_stretch(
                &mut shared.raw_refbuf2,
                other.tidx,
                ol.toff + u64::from(ol.len) - u64::from(len) - other_ref_ext as u64,
                (u64::from(len) + other_ref_ext as u64) as usize,
            );
            let SharedTempVars {
                raw_refbuf,
                raw_refbuf2,
                temp_scores,
                temp_scores2,
                ..
            } = shared;
            let refbuf: &[u8] = raw_refbuf;
            // logical index -other_ref_ext..len
            let rb2 = |i: i64| -> u8 { raw_refbuf2[(i + other_ref_ext) as usize] };
            temp_scores.clear();
            temp_scores.resize(len as usize, 0);
            temp_scores2.clear();
            temp_scores2.resize(len as usize, 0);
            let ilen = i64::from(len);

            if spliced {
                // Prefix mismatch scores against the left fragment's frame.
                let mut i: i64 = 0;
                while i < ilen {
                    let rdc = seq[(tr.rdoff as i64 + i) as usize];
                    let rfc = refbuf[i as usize];
                    temp_scores[i as usize] = if i > 0 { temp_scores[(i - 1) as usize] } else { 0 };
                    if rdc != rfc {
                        temp_scores[i as usize] +=
                            sc.mismatch_penalty(rdc, rfc, qual[(tr.rdoff as i64 + i) as usize]);
                    }
                    if temp_scores[i as usize] < remainsc {
                        break;
                    }
                    i += 1;
                }
                let mut i_limit: i64 = i.min(ilen);
                // Suffix mismatch scores against the right fragment's frame.
                let mut i2: i64 = ilen - 1;
                while i2 >= 0 {
                    let rdc = seq[(tr.rdoff as i64 + i2) as usize];
                    let rfc = rb2(i2);
                    temp_scores2[i2 as usize] = if i2 + 1 < ilen {
                        temp_scores2[(i2 + 1) as usize]
                    } else {
                        0
                    };
                    if rdc != rfc {
                        temp_scores2[i2 as usize] +=
                            sc.mismatch_penalty(rdc, rfc, qual[(tr.rdoff as i64 + i2) as usize]);
                    }
                    if temp_scores2[i2 as usize] < remainsc {
                        break;
                    }
                    i2 -= 1;
                }
                let mut i2_limit: i64 = i2.max(0);

                if let Some(ss) = known_site {
                    // Constrain the cut to the provided junction.
                    if ss.left < tr.toff {
                        return false;
                    }
                    let pos = (ss.left - tr.toff) as i64;
                    if i2_limit <= pos {
                        i2_limit = pos;
                        i_limit = i2_limit + 1;
                    } else {
                        i_limit = i2_limit;
                    }
                }

                let mut i = i2_limit;
                let mut i2 = i2_limit + 1;
                while i < i_limit && i2 < ilen {
                    let tempscore = temp_scores[i as usize] + temp_scores2[i2 as usize];
                    let donor = if i + 2 < ilen + this_ref_ext as i64 {
                        Some((refbuf[(i + 1) as usize], refbuf[(i + 2) as usize]))
                    } else {
                        None
                    };
                    let acceptor = if i2 - 2 >= -other_ref_ext {
                        Some((rb2(i2 - 2), rb2(i2 - 1)))
                    } else {
                        None
                    };
                    let (spldir, semi_canonical) = classify_motif(donor, acceptor);
                    let tempscore = tempscore
                        - if spldir == SpliceDir::Unknown {
                            sc.noncanonical_splice.constant
                        } else {
                            sc.canonical_splice.constant
                        };
                    let mut temp_donor = 0u64;
                    let mut temp_acceptor = 0u64;
                    let mut splscore = 0.0f32;
                    if spldir != SpliceDir::Unknown {
                        extract_splice_windows(
                            spldir,
                            i,
                            i2,
                            ilen,
                            this_ref_ext as i64,
                            other_ref_ext,
                            refbuf,
                            &rb2,
                            &mut temp_donor,
                            &mut temp_acceptor,
                        );
                        splscore = SpliceSiteDb::probscore(temp_donor, temp_acceptor);
                    }
                    let take = (maxspldir == SpliceDir::Unknown
                        && spldir == SpliceDir::Unknown
                        && maxscore < tempscore)
                        || (maxspldir == SpliceDir::Unknown
                            && spldir == SpliceDir::Unknown
                            && maxscore == tempscore
                            && semi_canonical)
                        || (maxspldir != SpliceDir::Unknown
                            && spldir != SpliceDir::Unknown
                            && (maxscore < tempscore
                                || (maxscore == tempscore && maxsplscore < splscore)))
                        || (maxspldir == SpliceDir::Unknown && spldir != SpliceDir::Unknown);
                    if take {
                        maxscore = tempscore;
                        maxscorei = Some(i);
                        maxspldir = spldir;
                        maxsplscore = splscore;
                        if spldir != SpliceDir::Unknown {
                            donor_seq = temp_donor;
                            acceptor_seq = temp_acceptor;
                        } else {
                            donor_seq = 0;
                            acceptor_seq = 0;
                        }
                    }
                    i += 1;
                    i2 += 1;
                }
            } else {
                // Insertion or deletion: place the gap at the cut that keeps
                // the most matching bases on both sides.
                let inslen: i64 = if ins { (rddif - refdif) as i64 } else { 0 };
                let dellen: i64 = if del { (refdif - rddif) as i64 } else { 0 };
                let gap_penalty = if ins {
                    -(sc.ref_gap_open + sc.ref_gap_extend * (inslen - 1))
                } else {
                    -(sc.read_gap_open + sc.read_gap_extend * (dellen - 1))
                };
                if gap_penalty < remainsc {
                    return false;
                }
                let mut i: i64 = 0;
                while i < ilen {
                    let rdc = seq[(tr.rdoff as i64 + i) as usize];
                    let rfc = refbuf[i as usize];
                    temp_scores[i as usize] = if i > 0 { temp_scores[(i - 1) as usize] } else { 0 };
                    if rdc != rfc {
                        temp_scores[i as usize] +=
                            sc.mismatch_penalty(rdc, rfc, qual[(tr.rdoff as i64 + i) as usize]);
                    }
                    if temp_scores[i as usize] + gap_penalty < remainsc {
                        break;
                    }
                    i += 1;
                }
                let i_limit: i64 = i.min(ilen);
                let mut i2: i64 = ilen - 1;
                while i2 >= 0 {
                    let rdc = seq[(tr.rdoff as i64 + i2) as usize];
                    let rfc = rb2(i2);
                    temp_scores2[i2 as usize] = if i2 + 1 < ilen {
                        temp_scores2[(i2 + 1) as usize]
                    } else {
                        0
                    };
                    if rdc != rfc {
                        temp_scores2[i2 as usize] +=
                            sc.mismatch_penalty(rdc, rfc, qual[(tr.rdoff as i64 + i2) as usize]);
                    }
                    if temp_scores2[i2 as usize] + gap_penalty < remainsc {
                        break;
                    }
                    i2 -= 1;
                }
                let i2_limit: i64 = if i2 < inslen { 0 } else { i2 - inslen };
                let mut i = i2_limit;
                let mut i2 = i2_limit + 1 + inslen;
                while i < i_limit && i2 < ilen {
                    let tempscore =
                        temp_scores[i as usize] + temp_scores2[i2 as usize] + gap_penalty;
                    if maxscore < tempscore {
                        maxscore = tempscore;
                        maxscorei = Some(i);
                    }
                    i += 1;
                    i2 += 1;
                }
            }

            let cut = match maxscorei {
                Some(c) => c,
                None => return false,
            };
            debug_assert!(maxscore > i64::MIN);
            debug_assert!(cut < i64::from(len));
            if spliced && known_site.is_none() {
                let shorter_anchor = (cut + 1).min(i64::from(len) - cut - 1) as u32;
                debug_assert!(tr.toff <= ol.toff);
                let intron = ol.toff - tr.toff;
                if maxspldir == SpliceDir::Unknown {
                    if shorter_anchor < noncan_mal
                        && intron_len_prob_noncan(shorter_anchor, intron, opts.max_intron_len)
                            > 0.01
                    {
                        return false;
                    }
                } else if shorter_anchor < can_mal
                    && intron_len_prob(shorter_anchor, intron, opts.max_intron_len) > 0.01
                {
                    return false;
                }
            }
            if maxscore < remainsc {
                return false;
            }
        } else {
            // Overlapping fragments with equal read/reference spacing:
            // rebuild mismatches from the left frame alone.
            reference.get_stretch(
                &mut shared.raw_refbuf,
                self.tidx,
                tr.toff,
                (u64::from(len) + this_ref_ext) as usize,
            );
        }

        // Drop the edits after this hit's last gap/splice; they are
        // re-derived by the walk below.
        {
            let own = shared.arena.get_mut(self.edits);
            let keep = own
                .iter()
                .rposition(|e| e.is_break())
                .map(|i| i + 1)
                .unwrap_or(0);
            own.truncate(keep);
        }

        let addoff = tr.rdoff - self.rdoff;
        {
            let SharedTempVars {
                arena,
                raw_refbuf,
                raw_refbuf2,
                tmp_edits,
                ..
            } = shared;
            let refbuf: &[u8] = raw_refbuf;
            let rb2 = |i: i64| -> u8 { raw_refbuf2[(i + other_ref_ext) as usize] };

            // Stage new edits in scratch, then extend the arena slot once.
            tmp_edits.clear();
            let ilen = i64::from(len);
            let mut i: i64 = 0;
            while i < ilen {
                let rdc = seq[(tr.rdoff as i64 + i) as usize];
                let in_left = maxscorei.map_or(true, |m| i <= m);
                let rfc = if in_left { refbuf[i as usize] } else { rb2(i) };
                if rdc != rfc {
                    tmp_edits.push(Edit::mismatch((i + i64::from(addoff)) as u32, rfc, rdc));
                }
                if Some(i) == maxscorei {
                    let left = tr.toff + i as u64 + 1;
                    let right = ol.toff + u64::from(ol.len) - (ilen - i - 1) as u64;
                    if spliced {
                        debug_assert!(left < right);
                        let skip = (right - left) as u32;
                        let mut e = Edit::splice(
                            (i + 1 + i64::from(addoff)) as u32,
                            skip,
                            maxspldir,
                            known_site.is_some(),
                        );
                        e.donor_seq = donor_seq;
                        e.acceptor_seq = acceptor_seq;
                        tmp_edits.push(e);
                    } else if del {
                        debug_assert!(left < right);
                        let skip = right - left;
                        debug_assert!(skip <= u64::from(opts.max_del_len));
                        for j in 0..skip {
                            let rfc = if i + 1 + (j as i64) < ilen {
                                refbuf[(i + 1 + j as i64) as usize]
                            } else {
                                reference.get_base(self.tidx, tr.toff + (i + 1) as u64 + j)
                            };
                            tmp_edits
                                .push(Edit::read_gap((i + 1 + i64::from(addoff)) as u32, rfc));
                        }
                    } else if ins {
                        debug_assert!(right < left);
                        let skip = (left - right) as i64;
                        debug_assert!(skip <= i64::from(opts.max_ins_len));
                        for j in 0..skip {
                            let rdc = seq[(tr.rdoff as i64 + i + 1 + j) as usize];
                            tmp_edits.push(Edit::ref_gap(
                                (i + 1 + j + i64::from(addoff)) as u32,
                                rdc,
                            ));
                        }
                        i += skip;
                    }
                }
                i += 1;
            }
            let own = arena.get_mut(self.edits);
            own.extend_from_slice(tmp_edits);
            tmp_edits.clear();
        }

        // Carry the other hit's edits from its first gap/splice onward.
        {
            shared.tmp_edits.clear();
            let other_edits: &[Edit] = shared.arena.get(other.edits);
            let fsi = other_edits
                .iter()
                .position(|e| e.is_break())
                .unwrap_or(other_edits.len());
            shared.tmp_edits.extend_from_slice(&other_edits[fsi..]);
            let addoff2 = other.rdoff - self.rdoff;
            let own = shared.arena.get_mut(self.edits);
            for mut e in shared.tmp_edits.drain(..) {
                e.pos += addoff2;
                own.push(e);
            }
        }

        if ins || del {
            self.left_align(rd, shared);
        }

        debug_assert!(self.rdoff + self.len <= other.rdoff + other.len);
        self.len = other.rdoff + other.len - self.rdoff;
        self.recompute_score(rd, sc, opts, shared);
        debug_assert_eq!(self.trim3, 0);
        self.trim3 += other.trim3;
        true
    }

    /// Extend the hit in both directions by direct comparison against the
    /// reference, allowing up to `mm` mismatches per side. `leftext` and
    /// `rightext` carry the maximum wanted extension in and the achieved
    /// extension out.
    #[allow(clippy::too_many_arguments)]
    pub fn extend<R: Reference>(
        &mut self,
        rd: &Read,
        reference: &R,
        sc: &Scoring,
        opts: &AlignOpts,
        shared: &mut SharedTempVars,
        min_k_local: u32,
        leftext: &mut u32,
        rightext: &mut u32,
        mm: u32,
    ) -> bool {
        let max_leftext = *leftext;
        let max_rightext = *rightext;
        debug_assert!(max_leftext > 0 || max_rightext > 0);
        *leftext = 0;
        *rightext = 0;
        let rdlen = rd.len() as u32;
        let seq = rd.seq(self.fw);
        let reflen = reference.approx_len(self.tidx);

        if max_leftext > 0 && self.rdoff > 0 {
            if u64::from(self.rdoff) > self.toff {
                return false;
            }
            let rl = self.toff - u64::from(self.rdoff);
            if rl + u64::from(self.rdoff) <= reflen {
                reference.get_stretch(&mut shared.raw_refbuf, self.tidx, rl, self.rdoff as usize);
                // Probe: worth extending only if the first few bases fit the
                // mismatch budget.
                let mut probe_mm = 0u32;
                let mut best_ext = 0u32;
                let probe_len = self.rdoff.min(min_k_local);
                for e in 0..probe_len {
                    let rdc = seq[(self.rdoff - e - 1) as usize];
                    let rfc = shared.raw_refbuf[(self.rdoff - e - 1) as usize];
                    if rdc != rfc {
                        probe_mm += 1;
                    }
                    if probe_mm <= mm {
                        best_ext += 1;
                    }
                }
                if best_ext > 0 {
                    let mut left_mm = 0u32;
                    let mut added = 0usize;
                    let mut ext = 0u32;
                    while ext < self.rdoff && ext < max_leftext {
                        let rdc = seq[(self.rdoff - ext - 1) as usize];
                        let rfc = shared.raw_refbuf[(self.rdoff - ext - 1) as usize];
                        if rdc != rfc {
                            left_mm += 1;
                            if left_mm > mm {
                                break;
                            }
                            shared
                                .arena
                                .get_mut(self.edits)
                                .insert(0, Edit::mismatch(ext + 1, rfc, rdc));
                            added += 1;
                        }
                        ext += 1;
                    }
                    if ext > 0 {
                        debug_assert!(ext <= self.rdoff);
                        self.toff -= u64::from(ext);
                        self.rdoff -= ext;
                        self.len += ext;
                        let own = shared.arena.get_mut(self.edits);
                        for (i, e) in own.iter_mut().enumerate() {
                            if i < added {
                                e.pos = ext - e.pos;
                            } else {
                                e.pos += ext;
                            }
                        }
                    }
                    *leftext = ext;
                }
            }
        }

        if max_rightext > 0 && self.rdoff + self.len < rdlen {
            let rl = self.right_off(shared);
            let rr = rdlen - (self.rdoff + self.len);
            if rl + u64::from(rr) <= reflen {
                reference.get_stretch(&mut shared.raw_refbuf, self.tidx, rl, rr as usize);
                let mut probe_mm = 0u32;
                let mut best_ext = 0u32;
                let probe_len = rr.min(min_k_local);
                for e in 0..probe_len {
                    let rdc = seq[(self.rdoff + self.len + e) as usize];
                    let rfc = shared.raw_refbuf[e as usize];
                    if rdc != rfc {
                        probe_mm += 1;
                    }
                    if probe_mm <= mm {
                        best_ext += 1;
                    }
                }
                if best_ext > 0 {
                    let mut right_mm = 0u32;
                    let mut ext = 0u32;
                    while self.rdoff + self.len + ext < rdlen && ext < max_rightext {
                        let rdc = seq[(self.rdoff + self.len + ext) as usize];
                        let rfc = shared.raw_refbuf[ext as usize];
                        if rdc != rfc {
                            right_mm += 1;
                            if right_mm > mm {
                                break;
                            }
                            shared
                                .arena
                                .get_mut(self.edits)
                                .push(Edit::mismatch(self.len + ext, rfc, rdc));
                        }
                        ext += 1;
                    }
                    self.len += ext;
                    *rightext = ext;
                }
            }
        }

        debug_assert!(self.rdoff + self.len <= rdlen);
        self.recompute_score(rd, sc, opts, shared);
        *leftext > 0 || *rightext > 0
    }

    /// Shift every indel block to its leftmost equivalent position. The
    /// canonical form makes redundancy checks exact. Idempotent.
    pub fn left_align(&mut self, rd: &Read, shared: &mut SharedTempVars) {
        let seq = rd.seq(self.fw);
        let edits = shared.arena.get_mut(self.edits);
        let mut ei = 0usize;
        while ei < edits.len() {
            if !edits[ei].is_gap() {
                ei += 1;
                continue;
            }
            let kind = edits[ei].kind;
            // Find the end of this gap block.
            let mut ei2 = ei + 1;
            while ei2 < edits.len() {
                let e2 = &edits[ei2];
                if e2.kind != kind {
                    break;
                }
                let contiguous = match kind {
                    EditKind::ReadGap => edits[ei].pos == e2.pos,
                    _ => edits[ei].pos + (ei2 - ei) as u32 == e2.pos,
                };
                if !contiguous {
                    break;
                }
                ei2 += 1;
            }
            let ei2 = ei2 - 1;

            let floor = if ei > 0 { i64::from(edits[ei - 1].pos) } else { 0 };
            let mut l = i64::from(edits[ei].pos) - 1;
            while l > floor {
                let rdc = seq[(i64::from(self.rdoff) + l) as usize];
                let tail = match kind {
                    EditKind::ReadGap => edits[ei2].rf,
                    _ => edits[ei2].rd,
                };
                if tail != rdc {
                    break;
                }
                // Rotate the block one position left.
                for k in ((ei + 1)..=ei2).rev() {
                    match kind {
                        EditKind::ReadGap => edits[k].rf = edits[k - 1].rf,
                        _ => edits[k].rd = edits[k - 1].rd,
                    }
                    edits[k].pos -= 1;
                }
                match kind {
                    EditKind::ReadGap => edits[ei].rf = rdc,
                    _ => edits[ei].rd = rdc,
                }
                edits[ei].pos -= 1;
                l -= 1;
            }
            ei = ei2 + 1;
        }
    }

    /// Recompute the score from the edit list; a post-check failure stores
    /// the reject sentinel.
    pub fn recompute_score(
        &mut self,
        rd: &Read,
        sc: &Scoring,
        opts: &AlignOpts,
        shared: &SharedTempVars,
    ) -> ScoreOutcome {
        let outcome = self.calculate_score(rd, sc, opts, shared);
        match outcome {
            ScoreOutcome::Accept(s) => self.score = s,
            ScoreOutcome::Reject => self.score = SCORE_REJECTED,
        }
        outcome
    }

    fn calculate_score(
        &mut self,
        rd: &Read,
        sc: &Scoring,
        opts: &AlignOpts,
        shared: &SharedTempVars,
    ) -> ScoreOutcome {
        let qual = rd.qual(self.fw);
        let rdlen = rd.len() as i64;
        let edits = self.edits(shared);
        let mut score: i64 = 0;
        let mut splice_score = 0.0f64;
        let mut numsplices = 0u32;
        let mut mm: i64 = 0;
        let mut conflict = false;
        let mut whichsense = SpliceDir::Unknown;

        for (i, e) in edits.iter().enumerate() {
            debug_assert!(e.pos < self.len);
            match e.kind {
                EditKind::Mismatch => {
                    score += sc.mismatch_penalty(e.rd, e.rf, qual[(self.rdoff + e.pos) as usize]);
                    mm += 1;
                }
                EditKind::Splice => {
                    if !e.known_spl {
                        let mut left_anchor = i64::from(self.rdoff) + i64::from(e.pos);
                        debug_assert!(left_anchor > 0 && left_anchor < rdlen);
                        let mut right_anchor = rdlen - left_anchor;
                        let mm2 = edits[i + 1..]
                            .iter()
                            .filter(|e2| {
                                matches!(
                                    e2.kind,
                                    EditKind::Mismatch | EditKind::ReadGap | EditKind::RefGap
                                )
                            })
                            .count() as i64;
                        left_anchor -= mm * 2;
                        right_anchor -= mm2 * 2;
                        let shorter = left_anchor.min(right_anchor).max(1) as u32;
                        let cap = if e.spl_dir != SpliceDir::Unknown {
                            canonical_intron_cap(shorter, opts.min_anchor_len)
                        } else {
                            noncanonical_intron_cap(shorter, opts.min_anchor_len_noncan)
                        };
                        if cap < opts.max_intron_len {
                            if u64::from(e.spl_len) > cap {
                                return ScoreOutcome::Reject;
                            }
                            if e.spl_dir != SpliceDir::Unknown {
                                let probscore =
                                    SpliceSiteDb::probscore(e.donor_seq, e.acceptor_seq);
                                let thresh = if e.spl_len >> 16 != 0 {
                                    0.99
                                } else if e.spl_len >> 15 != 0 {
                                    0.97
                                } else if e.spl_len >> 14 != 0 {
                                    0.94
                                } else if e.spl_len >> 13 != 0 {
                                    0.91
                                } else if e.spl_len >> 12 != 0 {
                                    0.88
                                } else {
                                    0.8
                                };
                                if probscore < thresh {
                                    return ScoreOutcome::Reject;
                                }
                            }
                            // A short anchor must be clean: no trims and no
                            // other edits on its side.
                            if shorter as i64 == left_anchor {
                                if self.trim5 > 0 {
                                    return ScoreOutcome::Reject;
                                }
                                if edits[..i].iter().any(|e2| {
                                    matches!(
                                        e2.kind,
                                        EditKind::Mismatch | EditKind::ReadGap | EditKind::RefGap
                                    )
                                }) {
                                    return ScoreOutcome::Reject;
                                }
                            } else {
                                if self.trim3 > 0 {
                                    return ScoreOutcome::Reject;
                                }
                                if edits[i + 1..].iter().any(|e2| {
                                    matches!(
                                        e2.kind,
                                        EditKind::Mismatch | EditKind::ReadGap | EditKind::RefGap
                                    )
                                }) {
                                    return ScoreOutcome::Reject;
                                }
                            }
                        }
                        score -= if e.spl_dir != SpliceDir::Unknown {
                            sc.can_spl(e.spl_len)
                        } else {
                            sc.noncan_spl(e.spl_len)
                        };
                        if shorter <= 15 {
                            numsplices += 1;
                            splice_score += f64::from(e.spl_len);
                        }
                    }
                    if !conflict {
                        if whichsense == SpliceDir::Unknown {
                            whichsense = e.spl_dir;
                        } else if e.spl_dir != SpliceDir::Unknown && whichsense != e.spl_dir {
                            conflict = true;
                        }
                    }
                }
                EditKind::ReadGap => {
                    let open = !(i > 0
                        && edits[i - 1].kind == EditKind::ReadGap
                        && edits[i - 1].pos == e.pos);
                    score -= if open {
                        sc.read_gap_open
                    } else {
                        sc.read_gap_extend
                    };
                }
                EditKind::RefGap => {
                    let open = !(i > 0
                        && edits[i - 1].kind == EditKind::RefGap
                        && edits[i - 1].pos + 1 == e.pos);
                    score -= if open {
                        sc.ref_gap_open
                    } else {
                        sc.ref_gap_extend
                    };
                }
            }
        }

        if conflict {
            score -= sc.conflict_splice;
        }
        if numsplices > 1 {
            splice_score /= f64::from(numsplices);
        }
        score += (i64::from(self.len) - mm) * sc.match_bonus;
        self.splice_score = splice_score;
        ScoreOutcome::Accept(score)
    }

    /// Invariant I2: applying the edit list to the aligned read substring
    /// reproduces the reference span. Used by tests and debug assertions.
    pub fn matches_reference<R: Reference>(
        &self,
        rd: &Read,
        reference: &R,
        shared: &SharedTempVars,
    ) -> bool {
        let seq = rd.seq(self.fw);
        let edits = self.edits(shared);
        let mut rpos = self.toff;
        let mut eidx = 0usize;
        for i in 0..self.len {
            // Edits placed before base i: read gaps and splices.
            while eidx < edits.len() && edits[eidx].pos == i && edits[eidx].is_break() {
                match edits[eidx].kind {
                    EditKind::ReadGap => {
                        if reference.get_base(self.tidx, rpos) != edits[eidx].rf {
                            return false;
                        }
                        rpos += 1;
                    }
                    EditKind::Splice => rpos += u64::from(edits[eidx].spl_len),
                    _ => break,
                }
                eidx += 1;
            }
            let rdc = seq[(self.rdoff + i) as usize];
            if eidx < edits.len() && edits[eidx].pos == i && edits[eidx].kind == EditKind::RefGap {
                // Inserted read base: consumes no reference.
                if edits[eidx].rd != rdc {
                    return false;
                }
                eidx += 1;
                continue;
            }
            if eidx < edits.len() && edits[eidx].pos == i && edits[eidx].kind == EditKind::Mismatch
            {
                let e = &edits[eidx];
                if e.rd != rdc || reference.get_base(self.tidx, rpos) != e.rf || e.rd == e.rf {
                    return false;
                }
                eidx += 1;
            } else if reference.get_base(self.tidx, rpos) != rdc {
                return false;
            }
            rpos += 1;
        }
        // Trailing read gaps / splices would violate pos < len.
        eidx == edits.len()
    }
}

/// Classify the junction dinucleotides: canonical forward (GT..AG),
/// canonical reverse (CT..AC), or unknown, with a semi-canonical flag for
/// GC..AG / AT..AC and their reverse complements.
fn classify_motif(donor: Option<(u8, u8)>, acceptor: Option<(u8, u8)>) -> (SpliceDir, bool) {
    let (d, a) = match (donor, acceptor) {
        (Some(d), Some(a)) => (d, a),
        _ => return (SpliceDir::Unknown, false),
    };
    const GT: (u8, u8) = (2, 3);
    const AG: (u8, u8) = (0, 2);
    const CT: (u8, u8) = (1, 3);
    const AC: (u8, u8) = (0, 1);
    const GC: (u8, u8) = (2, 1);
    const AT: (u8, u8) = (0, 3);
    if d == GT && a == AG {
        return (SpliceDir::Fw, false);
    }
    if d == CT && a == AC {
        return (SpliceDir::Rc, false);
    }
    let semi = (d == GC && a == AG)
        || (d == AT && a == AC)
        || (d == CT && a == GC)
        || (d == GT && a == AT);
    (SpliceDir::Unknown, semi)
}

/// Extract the PWM windows around a candidate cut, complemented and
/// reversed for a minus-strand junction so the packed windows are always in
/// donor/acceptor orientation.
#[allow(clippy::too_many_arguments)]
fn extract_splice_windows(
    dir: SpliceDir,
    i: i64,
    i2: i64,
    len: i64,
    this_ref_ext: i64,
    other_ref_ext: i64,
    refbuf: &[u8],
    rb2: &dyn Fn(i64) -> u8,
    donor_out: &mut u64,
    acceptor_out: &mut u64,
) {
    let de = DONOR_EXONIC_LEN as i64;
    let di = DONOR_INTRONIC_LEN as i64;
    let ai = ACCEPTOR_INTRONIC_LEN as i64;
    let ae = ACCEPTOR_EXONIC_LEN as i64;
    let mut donor = 0u64;
    let mut acceptor = 0u64;
    match dir {
        SpliceDir::Fw => {
            if i + 1 >= de && len + this_ref_ext > i + di && i2 + other_ref_ext >= ai && len > i2 + ae - 1
            {
                for j in (i + 1 - de)..=(i + di) {
                    let base = refbuf[j as usize];
                    donor = (donor << 2) | u64::from(if base > 3 { 0 } else { base });
                }
                for j in (i2 - ai)..=(i2 + ae - 1) {
                    let base = rb2(j);
                    acceptor = (acceptor << 2) | u64::from(if base > 3 { 0 } else { base });
                }
                *donor_out = donor;
                *acceptor_out = acceptor;
            }
        }
        SpliceDir::Rc => {
            if i + 1 >= ae && len + this_ref_ext > i + ai && i2 + other_ref_ext >= di && len > i2 + de - 1
            {
                for j in ((i + 1 - ae)..=(i + ai)).rev() {
                    let base = refbuf[j as usize];
                    acceptor = (acceptor << 2) | u64::from(if base > 3 { 0 } else { base ^ 0x3 });
                }
                for j in ((i2 - di)..=(i2 + de - 1)).rev() {
                    let base = rb2(j);
                    donor = (donor << 2) | u64::from(if base > 3 { 0 } else { base ^ 0x3 });
                }
                *donor_out = donor;
                *acceptor_out = acceptor;
            }
        }
        SpliceDir::Unknown => {}
    }
}

// Spliced alignment scenarios: de novo junction discovery across canonical
// and semi-canonical motifs, known-site driven jumps, intron-length bounds,
// and novel-site registration.

mod common;

use common::{plant, synthetic_genome, Fixture};
use hieralign::{EditKind, Read, SpliceDir, SpliceSite};

const EXON1: &[u8] = b"GATTACAGGCCTTAAGCGTACGCTT";
const EXON2: &[u8] = b"CATCAACGGTCGATTGACCTAGTCA";

/// Genome with exon1 at `off`, an intron of `intron_len` starting with
/// `donor` and ending with `acceptor`, then exon2.
fn spliced_genome(
    len: usize,
    off: usize,
    intron_len: usize,
    donor: &[u8; 2],
    acceptor: &[u8; 2],
) -> Vec<u8> {
    let mut genome = synthetic_genome(len, 0xfeed);
    plant(&mut genome, off, EXON1);
    let istart = off + EXON1.len();
    plant(&mut genome, istart, donor);
    plant(&mut genome, istart + intron_len - 2, acceptor);
    plant(&mut genome, istart + intron_len, EXON2);
    genome
}

fn spliced_read() -> Vec<u8> {
    let mut r = EXON1.to_vec();
    r.extend_from_slice(EXON2);
    r
}

#[test]
fn discovers_canonical_junction() {
    let intron_len = 9975;
    let genome = spliced_genome(22_000, 100, intron_len, b"GT", b"AG");
    let fx = Fixture::new(&genome);

    let res = fx.align_single(Read::new("spl", &spliced_read(), b"", 1), 0);
    assert_eq!(res.unp1.len(), 1);
    let a = &res.unp1[0];
    assert_eq!((a.tidx, a.toff), (0, 100));
    assert_eq!(a.edits.len(), 1);
    let e = &a.edits[0];
    assert_eq!(e.kind, EditKind::Splice);
    assert_eq!(e.pos, 25);
    assert_eq!(e.spl_len as usize, intron_len);
    assert_eq!(e.spl_dir, SpliceDir::Fw);
    assert!(!e.known_spl);
    assert_eq!(
        a.score,
        50 * fx.scoring.match_bonus - fx.scoring.can_spl(intron_len as u32)
    );
    assert!(a.near_splice_sites);
}

#[test]
fn discovered_junction_is_registered() {
    let intron_len = 9975;
    let genome = spliced_genome(22_000, 100, intron_len, b"GT", b"AG");
    let fx = Fixture::new(&genome);

    assert!(fx.ssdb.is_empty());
    let res = fx.align_single(Read::new("spl", &spliced_read(), b"", 9), 0);
    assert_eq!(res.unp1.len(), 1);

    // the junction is now queryable, tagged with the discovering read
    let mut out = Vec::new();
    fx.ssdb
        .left_splice_sites(0, 100 + 25 + intron_len as u64, 4, &mut out);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].left, 124);
    assert_eq!(out[0].right, 100 + 25 + intron_len as u64);
    assert!(!out[0].from_file);
    assert_eq!(out[0].read_id, 9);
}

#[test]
fn accepts_semi_canonical_with_long_anchors() {
    // GC..AG is not canonical; with 25 bp anchors on both sides the
    // junction is still taken, at the non-canonical penalty and with no
    // strand call.
    let intron_len = 9975;
    let genome = spliced_genome(22_000, 100, intron_len, b"GC", b"AG");
    let fx = Fixture::new(&genome);

    let res = fx.align_single(Read::new("semi", &spliced_read(), b"", 2), 0);
    assert_eq!(res.unp1.len(), 1);
    let a = &res.unp1[0];
    assert_eq!(a.edits.len(), 1);
    let e = &a.edits[0];
    assert_eq!(e.kind, EditKind::Splice);
    assert_eq!(e.spl_len as usize, intron_len);
    assert_eq!(e.spl_dir, SpliceDir::Unknown);
    assert_eq!(
        a.score,
        50 * fx.scoring.match_bonus - fx.scoring.noncan_spl(intron_len as u32)
    );
}

#[test]
fn reverse_strand_motif_is_called_rc() {
    // CT..AC is the canonical pair transcribed from the minus strand.
    let intron_len = 4000;
    let genome = spliced_genome(22_000, 100, intron_len, b"CT", b"AC");
    let fx = Fixture::new(&genome);

    let res = fx.align_single(Read::new("rcspl", &spliced_read(), b"", 3), 0);
    assert_eq!(res.unp1.len(), 1);
    let e = &res.unp1[0].edits[0];
    assert_eq!(e.kind, EditKind::Splice);
    assert_eq!(e.spl_dir, SpliceDir::Rc);
}

#[test]
fn known_site_rescues_short_anchor() {
    // Only 8 bp of the read sit left of the junction: too short for the
    // global probe (minimum exact length exceeds it), but a pre-loaded
    // splice site bridges it.
    let intron_len = 9992;
    let exon1_short = &EXON1[..8];
    let mut genome = synthetic_genome(22_000, 0xfeed);
    plant(&mut genome, 100, exon1_short);
    let istart = 100 + 8;
    plant(&mut genome, istart, b"GT");
    plant(&mut genome, istart + intron_len - 2, b"AG");
    let exon2_off = istart + intron_len;
    let mut exon2_long = EXON2.to_vec();
    exon2_long.extend_from_slice(b"TTGACCATGCGTAGACA");
    plant(&mut genome, exon2_off, &exon2_long);
    let fx = Fixture::new(&genome);
    fx.ssdb.add(SpliceSite {
        tidx: 0,
        left: istart as u64 - 1,
        right: exon2_off as u64,
        dir: SpliceDir::Fw,
        from_file: true,
        read_id: 0,
    });

    let mut read = exon1_short.to_vec();
    read.extend_from_slice(&exon2_long);
    let rdlen = read.len() as i64;
    let res = fx.align_single(Read::new("short-anchor", &read, b"", 4), 0);
    assert!(!res.unp1.is_empty());
    let best = res
        .unp1
        .iter()
        .max_by_key(|a| a.score)
        .expect("nonempty results");
    assert_eq!(best.score, rdlen * fx.scoring.match_bonus);
    assert_eq!(best.toff, 100);
    let spl: Vec<_> = best
        .edits
        .iter()
        .filter(|e| e.kind == EditKind::Splice)
        .collect();
    assert_eq!(spl.len(), 1);
    assert!(spl[0].known_spl);
    assert_eq!(spl[0].pos, 8);
    assert_eq!(spl[0].spl_len as usize, intron_len);
}

#[test]
fn overlong_intron_is_rejected_in_favor_of_nearer_copy() {
    // The read's first half occurs at two loci; only the combination whose
    // implied intron fits under the cap may be emitted.
    let mut genome = synthetic_genome(505_000, 0x1dea);
    let left = &EXON1[..15];
    let right = &EXON2[..15];
    plant(&mut genome, 100, left); // too far from the right half
    plant(&mut genome, 480_300, left); // within intron range
    let istart = 480_300 + 15;
    plant(&mut genome, istart, b"GT");
    plant(&mut genome, 500_298, b"AG");
    plant(&mut genome, 500_300, right);
    let fx = Fixture::new(&genome);

    let mut read = left.to_vec();
    read.extend_from_slice(right);
    let res = fx.align_single(Read::new("two-loci", &read, b"", 5), 0);
    assert_eq!(res.unp1.len(), 1);
    let a = &res.unp1[0];
    assert_eq!(a.toff, 480_300);
    assert_eq!(a.edits.len(), 1);
    let e = &a.edits[0];
    assert_eq!(e.kind, EditKind::Splice);
    // intron runs from the end of the nearer left-half copy to exon 2
    assert_eq!(e.spl_len, 500_300 - (480_300 + 15));
    assert_eq!(e.spl_dir, SpliceDir::Fw);
}

#[test]
fn deletion_of_intron_scale_becomes_splice() {
    // A 25 bp gap is >= the minimum intron length, so it must come out as a
    // splice edit, never as a deletion run.
    let mut genome = synthetic_genome(12_000, 0xfeed);
    plant(&mut genome, 100, EXON1);
    let gap = 25usize;
    plant(&mut genome, 100 + EXON1.len() + gap, EXON2);
    let fx = Fixture::new(&genome);

    let res = fx.align_single(Read::new("minigap", &spliced_read(), b"", 6), 0);
    assert_eq!(res.unp1.len(), 1);
    let a = &res.unp1[0];
    let kinds: Vec<_> = a.edits.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EditKind::Splice));
    assert!(!kinds.contains(&EditKind::ReadGap));
    let e = a
        .edits
        .iter()
        .find(|e| e.kind == EditKind::Splice)
        .expect("splice edit present");
    assert_eq!(e.spl_len as usize, gap);
}

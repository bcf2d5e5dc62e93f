// End-to-end exonic alignment scenarios on a small synthetic genome.

mod common;

use common::{plant, revcomp_ascii, synthetic_genome, Fixture};
use hieralign::{EditKind, Read};

// 32 bp, non-self-overlapping, planted uniquely.
const READ32: &[u8] = b"GATTACAGGCCTTAAGCGTACGCTTGATCAAC";

#[test]
fn exact_unique_forward_match() {
    let mut genome = synthetic_genome(12_000, 0xbeef);
    plant(&mut genome, 100, READ32);
    let fx = Fixture::new(&genome);

    let res = fx.align_single(Read::new("r1", READ32, b"", 1), 0);
    assert_eq!(res.unp1.len(), 1, "exactly one alignment");
    let a = &res.unp1[0];
    assert!(a.fw);
    assert_eq!((a.tidx, a.toff), (0, 100));
    assert!(a.edits.is_empty());
    assert_eq!(a.score, 32 * fx.scoring.match_bonus);
    assert_eq!(a.splice_score, 0.0);
    assert_eq!((a.trim5, a.trim3), (0, 0));
}

#[test]
fn ambiguous_base_becomes_mismatch() {
    let mut genome = synthetic_genome(12_000, 0xbeef);
    plant(&mut genome, 100, READ32);
    let fx = Fixture::new(&genome);

    let mut read = READ32.to_vec();
    read[15] = b'N';
    let res = fx.align_single(Read::new("r2", &read, b"", 2), 0);
    assert_eq!(res.unp1.len(), 1);
    let a = &res.unp1[0];
    assert_eq!((a.tidx, a.toff), (0, 100));
    assert_eq!(a.edits.len(), 1);
    let e = &a.edits[0];
    assert_eq!(e.kind, EditKind::Mismatch);
    assert_eq!(e.pos, 15);
    assert_eq!(e.rd, 4); // ambiguous read base
    // one ambiguity penalty instead of one match credit
    assert_eq!(a.score, 31 * fx.scoring.match_bonus - fx.scoring.n_pen);
}

#[test]
fn orientation_round_trip() {
    // Aligning the reverse complement lands on the same locus with the
    // mismatch position mirrored in the 5'->3' edit list.
    let mut genome = synthetic_genome(12_000, 0xbeef);
    plant(&mut genome, 100, READ32);
    let fx = Fixture::new(&genome);

    let mut read = READ32.to_vec();
    // substitute position 10 with a different base
    read[10] = if read[10] == b'A' { b'G' } else { b'A' };
    let fwd = fx.align_single(Read::new("fw", &read, b"", 3), -10);
    assert_eq!(fwd.unp1.len(), 1);
    let fa = &fwd.unp1[0];
    assert!(fa.fw);
    assert_eq!(fa.toff, 100);
    assert_eq!(fa.edits.len(), 1);
    assert_eq!(fa.edits[0].pos, 10);

    let rc = revcomp_ascii(&read);
    let rev = fx.align_single(Read::new("rc", &rc, b"", 4), -10);
    assert_eq!(rev.unp1.len(), 1);
    let ra = &rev.unp1[0];
    assert!(!ra.fw);
    assert_eq!(ra.toff, 100);
    assert_eq!(ra.edits.len(), 1);
    // 5'->3' of the reverse-complemented read: len - 1 - pos
    assert_eq!(ra.edits[0].pos, 32 - 1 - 10);
    assert_eq!(ra.score, fa.score);
}

#[test]
fn read_shorter_than_ftab_is_unaligned() {
    let genome = synthetic_genome(12_000, 0xbeef);
    let fx = Fixture::new(&genome);
    // global ftab resolves 6 bases; a 4 bp read cannot seed
    let res = fx.align_single(Read::new("tiny", b"ACGT", b"", 5), -100);
    assert!(res.unp1.is_empty());
}

#[test]
fn unaligned_read_reports_nothing() {
    let genome = synthetic_genome(12_000, 0xbeef);
    let fx = Fixture::new(&genome);
    // 32 bp absent from the genome (and so is its reverse complement):
    // a poly-A run against a filler that contains no 8-run of A
    let res = fx.align_single(Read::new("miss", &[b'A'; 32], b"", 6), 0);
    assert!(res.unp1.is_empty());
}

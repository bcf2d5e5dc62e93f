// Paired-end scenarios: concordant pairing and mate rescue seeded from the
// aligned mate's coordinate, plus the read-parallel driver front door.

mod common;

use common::{revcomp_ascii, synthetic_genome, Fixture};
use hieralign::{
    align_reads, MetricsAggregator, Read, ReadTask, ReportingParams, VecSink,
};

#[test]
fn concordant_pair_forms() {
    let genome = synthetic_genome(12_000, 0xabba);
    let fx = Fixture::new(&genome);

    let m1 = &genome[100..130];
    let m2 = revcomp_ascii(&genome[400..430]);
    let res = fx.align_pair(
        Read::new("p/1", m1, b"", 10),
        Read::new("p/2", &m2, b"", 10),
        [false; 2],
        [false; 2],
        [0, 0],
    );

    assert_eq!(res.unp1.len(), 1);
    assert_eq!(res.unp2.len(), 1);
    assert!(res.unp1[0].fw);
    assert_eq!(res.unp1[0].toff, 100);
    assert!(!res.unp2[0].fw);
    assert_eq!(res.unp2[0].toff, 400);
    assert_eq!(res.pairs, vec![(0, 0)]);
}

#[test]
fn mate_rescue_via_local_index() {
    // Mate 2's matching orientation is masked off, so its own search finds
    // nothing; rescue must rediscover it through the local index around
    // mate 1's locus, ignoring the orientation mask.
    let genome = synthetic_genome(12_000, 0xabba);
    let fx = Fixture::new(&genome);

    let m1 = &genome[100..130];
    let m2 = revcomp_ascii(&genome[400..430]);
    let res = fx.align_pair(
        Read::new("q/1", m1, b"", 11),
        Read::new("q/2", &m2, b"", 11),
        [false, false],
        [false, true], // mask the orientation mate 2 needs
        [0, 0],
    );

    assert_eq!(res.unp1.len(), 1);
    assert_eq!(res.unp1[0].toff, 100);
    assert_eq!(res.unp2.len(), 1, "rescued alignment for mate 2");
    let r2 = &res.unp2[0];
    assert!(!r2.fw);
    assert_eq!(r2.toff, 400);
    assert!(r2.edits.is_empty());
    assert_eq!(res.pairs, vec![(0, 0)]);
}

#[test]
fn far_mate_is_not_paired() {
    // Both mates align, but farther apart than the largest allowed
    // fragment: no concordant pair may be emitted.
    let genome = synthetic_genome(12_000, 0xabba);
    let mut fx = Fixture::new(&genome);
    fx.opts.max_intron_len = 1_000;

    let m1 = &genome[100..130];
    let m2 = revcomp_ascii(&genome[5_000..5_030]);
    let res = fx.align_pair(
        Read::new("w/1", m1, b"", 12),
        Read::new("w/2", &m2, b"", 12),
        [false; 2],
        [false; 2],
        [0, 0],
    );
    assert!(!res.unp1.is_empty());
    assert!(!res.unp2.is_empty());
    assert!(res.pairs.is_empty());
}

#[test]
fn parallel_driver_aligns_batch() {
    let genome = synthetic_genome(12_000, 0xabba);
    let fx = Fixture::new(&genome);

    let tasks = vec![
        ReadTask::Single(Read::new("a", &genome[700..732], b"", 0)),
        ReadTask::Single(Read::new("b", &genome[2_000..2_040], b"", 1)),
        ReadTask::Pair(
            Read::new("c/1", &genome[100..130], b"", 2),
            Read::new("c/2", &revcomp_ascii(&genome[400..430]), b"", 2),
        ),
    ];
    let sink = VecSink::new();
    let metrics = MetricsAggregator::new();
    align_reads(
        &fx.scoring,
        &fx.opts,
        &fx.index,
        &fx.reference,
        &fx.ssdb,
        ReportingParams { k_hits: 5 },
        tasks,
        &sink,
        &metrics,
    );

    let results = sink.into_results();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].1.unp1[0].toff, 700);
    assert_eq!(results[1].1.unp1[0].toff, 2_000);
    assert_eq!(results[2].1.pairs, vec![(0, 0)]);

    let snap = metrics.snapshot();
    assert!(snap.bwops > 0);
    assert!(snap.local_search_recur > 0);
}

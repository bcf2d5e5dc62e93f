// Microbenchmarks for the alignment core: exonic and spliced placement of a
// single read against a small synthetic index.

use criterion::{criterion_group, criterion_main, Criterion};
use hieralign::{
    AlignContext, AlignOpts, AlnSink, HiAligner, HierIndexParams, HierarchicalIndex,
    PackedReference, Read, ReportingParams, Scoring, SpliceSiteDb,
};

fn synthetic_genome(len: usize, seed: u64) -> Vec<u8> {
    let mut x = seed | 1;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        out.push(b"ACGT"[(x % 4) as usize]);
    }
    out
}

struct Bench {
    reference: PackedReference,
    index: HierarchicalIndex,
    ssdb: SpliceSiteDb,
    scoring: Scoring,
    opts: AlignOpts,
    exonic: Vec<u8>,
    spliced: Vec<u8>,
}

fn setup() -> Bench {
    let mut genome = synthetic_genome(100_000, 0xbe9c);
    let exonic = genome[30_000..30_100].to_vec();
    // 50 bp read across a 5 kb canonical intron
    genome[50_025] = b'G';
    genome[50_026] = b'T';
    genome[55_023] = b'A';
    genome[55_024] = b'G';
    let spliced = {
        let mut r = genome[50_000..50_025].to_vec();
        r.extend_from_slice(&genome[55_025..55_050]);
        r
    };

    let mut reference = PackedReference::new();
    reference.push_contig("c0", &genome);
    let index = HierarchicalIndex::build(&reference, &HierIndexParams::default());
    let ssdb = SpliceSiteDb::new(&[genome.len() as u64]);
    Bench {
        reference,
        index,
        ssdb,
        scoring: Scoring::default(),
        opts: AlignOpts::default(),
        exonic,
        spliced,
    }
}

fn bench_alignment(c: &mut Criterion) {
    let b = setup();
    let ctx = AlignContext {
        scoring: &b.scoring,
        opts: &b.opts,
        index: &b.index,
        reference: &b.reference,
        ssdb: &b.ssdb,
    };
    let mut worker = HiAligner::new(1);

    c.bench_function("align_exonic_100bp", |bench| {
        bench.iter(|| {
            let mut sink = AlnSink::new(ReportingParams { k_hits: 5 });
            worker.init_read(Read::new("e", &b.exonic, b"", 0), false, false, 0, 100, false);
            worker.run(&ctx, &mut sink);
            sink.into_alignments()
        })
    });

    c.bench_function("align_spliced_50bp", |bench| {
        bench.iter(|| {
            let mut sink = AlnSink::new(ReportingParams { k_hits: 5 });
            worker.init_read(Read::new("s", &b.spliced, b"", 0), false, false, 0, 100, false);
            worker.run(&ctx, &mut sink);
            sink.into_alignments()
        })
    });
}

criterion_group!(benches, bench_alignment);
criterion_main!(benches);

// Shared fixtures: deterministic synthetic genomes and a fully built
// hierarchical index small enough to construct per test.
#![allow(dead_code)]

use hieralign::{
    AlignContext, AlignOpts, AlnSink, HiAligner, HierIndexParams, HierarchicalIndex,
    PackedReference, Read, ReadAlignments, ReportingParams, Scoring, SpliceSiteDb,
};

/// Deterministic filler sequence; xorshift so tests never depend on rand's
/// stream ordering.
pub fn synthetic_genome(len: usize, seed: u64) -> Vec<u8> {
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

/// Overwrite a stretch of the genome.
pub fn plant(genome: &mut [u8], off: usize, seq: &[u8]) {
    genome[off..off + seq.len()].copy_from_slice(seq);
}

pub struct Fixture {
    pub reference: PackedReference,
    pub index: HierarchicalIndex,
    pub ssdb: SpliceSiteDb,
    pub scoring: Scoring,
    pub opts: AlignOpts,
}

impl Fixture {
    pub fn new(genome: &[u8]) -> Self {
        Fixture::with_params(
            genome,
            HierIndexParams {
                window: 4096,
                overlap: 512,
                ftab_chars_global: 6,
                ftab_chars_local: 4,
                sa_sample_rate: 4,
            },
        )
    }

    pub fn with_params(genome: &[u8], params: HierIndexParams) -> Self {
        let mut reference = PackedReference::new();
        reference.push_contig("c0", genome);
        let index = HierarchicalIndex::build(&reference, &params);
        let ssdb = SpliceSiteDb::new(&[genome.len() as u64]);
        Fixture {
            reference,
            index,
            ssdb,
            scoring: Scoring::default(),
            opts: AlignOpts::default(),
        }
    }

    pub fn ctx(&self) -> AlignContext<'_, HierarchicalIndex, PackedReference> {
        AlignContext {
            scoring: &self.scoring,
            opts: &self.opts,
            index: &self.index,
            reference: &self.reference,
            ssdb: &self.ssdb,
        }
    }

    /// Align one unpaired read with the given score floor.
    pub fn align_single(&self, read: Read, minsc: i64) -> ReadAlignments {
        let mut worker = HiAligner::new(7);
        let mut sink = AlnSink::new(ReportingParams { k_hits: 5 });
        worker.init_read(read, false, false, minsc, 100, false);
        worker.run(&self.ctx(), &mut sink);
        sink.into_alignments()
    }

    /// Align a pair; `norc`/`nofw` as in the driver API.
    #[allow(clippy::too_many_arguments)]
    pub fn align_pair(
        &self,
        rd1: Read,
        rd2: Read,
        nofw: [bool; 2],
        norc: [bool; 2],
        minsc: [i64; 2],
    ) -> ReadAlignments {
        let mut worker = HiAligner::new(7);
        let mut sink = AlnSink::new(ReportingParams { k_hits: 5 });
        worker.init_pair(rd1, rd2, nofw, norc, minsc, [100, 100]);
        worker.run(&self.ctx(), &mut sink);
        sink.into_alignments()
    }
}

/// Reverse-complement of an ASCII sequence.
pub fn revcomp_ascii(seq: &[u8]) -> Vec<u8> {
    seq.iter()
        .rev()
        .map(|&c| match c {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' => b'A',
            other => other,
        })
        .collect()
}

// Reference sequence access.
//
// The core consumes the reference through the `Reference` trait: random base
// lookup plus bulk stretch extraction into a caller-owned buffer. The
// `PackedReference` implementation stores contigs 2-bit packed with a side
// list of ambiguity runs, the usual pac layout for aligner references.

use crate::dna::{encode_base, BASE_N};

pub trait Reference: Sync {
    fn num_refs(&self) -> usize;

    /// Length of a contig.
    fn approx_len(&self, tidx: usize) -> u64;

    /// One base code at a forward-strand offset; 4 for ambiguous.
    fn get_base(&self, tidx: usize, off: u64) -> u8;

    /// Replace `buf` with `len` base codes starting at `(tidx, off)`.
    /// Positions past the contig end fill with N.
    fn get_stretch(&self, buf: &mut Vec<u8>, tidx: usize, off: u64, len: usize);
}

#[derive(Debug, Clone)]
struct Contig {
    name: String,
    len: u64,
    /// 2-bit packed bases, 4 per byte, first base in the high bits.
    pac: Vec<u8>,
    /// Sorted, disjoint [start, end) runs of ambiguous bases.
    ambs: Vec<(u64, u64)>,
}

impl Contig {
    #[inline]
    fn base(&self, off: u64) -> u8 {
        if off >= self.len {
            return BASE_N;
        }
        if self
            .ambs
            .binary_search_by(|&(s, e)| {
                if off < s {
                    std::cmp::Ordering::Greater
                } else if off >= e {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
        {
            return BASE_N;
        }
        let byte = self.pac[(off >> 2) as usize];
        (byte >> ((3 - (off & 3)) << 1)) & 0x3
    }
}

/// In-memory packed reference.
#[derive(Debug, Clone, Default)]
pub struct PackedReference {
    contigs: Vec<Contig>,
}

impl PackedReference {
    pub fn new() -> Self {
        PackedReference::default()
    }

    /// Append a contig from ASCII sequence. Ambiguous characters pack as A
    /// and are recorded in the ambiguity list.
    pub fn push_contig(&mut self, name: &str, seq: &[u8]) {
        let mut pac = vec![0u8; (seq.len() + 3) / 4];
        let mut ambs: Vec<(u64, u64)> = Vec::new();
        for (i, &c) in seq.iter().enumerate() {
            let code = encode_base(c);
            if code > 3 {
                match ambs.last_mut() {
                    Some(run) if run.1 == i as u64 => run.1 += 1,
                    _ => ambs.push((i as u64, i as u64 + 1)),
                }
            }
            let packed = if code > 3 { 0 } else { code };
            pac[i >> 2] |= packed << ((3 - (i & 3)) << 1);
        }
        self.contigs.push(Contig {
            name: name.to_string(),
            len: seq.len() as u64,
            pac,
            ambs,
        });
    }

    pub fn from_seqs<'a, I: IntoIterator<Item = (&'a str, &'a [u8])>>(seqs: I) -> Self {
        let mut r = PackedReference::new();
        for (name, seq) in seqs {
            r.push_contig(name, seq);
        }
        r
    }

    pub fn name(&self, tidx: usize) -> &str {
        &self.contigs[tidx].name
    }

    /// Contig base codes, unpacked. Index construction uses this.
    pub fn contig_codes(&self, tidx: usize) -> Vec<u8> {
        let c = &self.contigs[tidx];
        (0..c.len).map(|off| c.base(off)).collect()
    }
}

impl Reference for PackedReference {
    fn num_refs(&self) -> usize {
        self.contigs.len()
    }

    fn approx_len(&self, tidx: usize) -> u64 {
        self.contigs[tidx].len
    }

    fn get_base(&self, tidx: usize, off: u64) -> u8 {
        self.contigs[tidx].base(off)
    }

    fn get_stretch(&self, buf: &mut Vec<u8>, tidx: usize, off: u64, len: usize) {
        let c = &self.contigs[tidx];
        buf.clear();
        buf.reserve(len);
        for i in 0..len as u64 {
            buf.push(c.base(off + i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dna::encode_seq;

    #[test]
    fn pack_unpack() {
        let mut r = PackedReference::new();
        r.push_contig("c0", b"ACGTACGTNNGG");
        assert_eq!(r.num_refs(), 1);
        assert_eq!(r.approx_len(0), 12);
        assert_eq!(r.get_base(0, 0), 0);
        assert_eq!(r.get_base(0, 3), 3);
        assert_eq!(r.get_base(0, 8), BASE_N);
        assert_eq!(r.get_base(0, 9), BASE_N);
        assert_eq!(r.get_base(0, 10), 2);
        assert_eq!(r.get_base(0, 100), BASE_N);
    }

    #[test]
    fn stretch_fetch() {
        let mut r = PackedReference::new();
        r.push_contig("c0", b"ACGTACGT");
        let mut buf = Vec::new();
        r.get_stretch(&mut buf, 0, 2, 4);
        assert_eq!(buf, encode_seq(b"GTAC"));
        r.get_stretch(&mut buf, 0, 6, 4);
        assert_eq!(buf, vec![2, 3, BASE_N, BASE_N]);
    }
}

// SAM output
//
// The mapping core hands structured results to this adapter, which applies
// the ambiguity and validity rules and serializes SAM records. Sequences are
// always written in forward-genome orientation (reverse-complement hits have
// their SEQ reverse complemented and the 0x10 flag set); the conversion used
// for a hit travels in the CV tag and the refined edit distance in NM.

use std::io::{self, Write};

use crate::cigar::cigar_rseq_ops;
use crate::encoding::revcomp;
use crate::hits::{max_diffs, PeResult, SeResult};
use crate::index::ChromLookup;

pub mod sam_flags {
    pub const READ_PAIRED: u16 = 0x1;
    pub const PROPER_PAIR: u16 = 0x2;
    pub const UNMAPPED: u16 = 0x4;
    pub const MATE_UNMAPPED: u16 = 0x8;
    pub const READ_RC: u16 = 0x10;
    pub const MATE_RC: u16 = 0x20;
    pub const FIRST_IN_PAIR: u16 = 0x40;
    pub const SECOND_IN_PAIR: u16 = 0x80;
    pub const SECONDARY: u16 = 0x100;
}

/// Write the SAM header: @HD, one @SQ per chromosome, and a @PG line carrying
/// the tool name, version and command line.
pub fn write_header<W: Write>(
    writer: &mut W,
    cl: &ChromLookup,
    command_line: &str,
) -> io::Result<()> {
    writeln!(writer, "@HD\tVN:1.6\tSO:unsorted")?;
    for (idx, name) in cl.names().iter().enumerate() {
        writeln!(writer, "@SQ\tSN:{}\tLN:{}", name, cl.chrom_size(idx))?;
    }
    writeln!(
        writer,
        "@PG\tID:{}\tPN:{}\tVN:{}\tCL:{}",
        crate::CRATE_NAME,
        crate::CRATE_NAME,
        env!("CARGO_PKG_VERSION"),
        command_line
    )
}

struct SamRecord<'a> {
    qname: &'a str,
    flag: u16,
    rname: &'a str,
    /// 0-based; serialized 1-based.
    pos: u32,
    mapq: u8,
    cigar: &'a str,
    rnext: &'a str,
    pnext: u32,
    tlen: i64,
    seq: String,
}

impl SamRecord<'_> {
    fn to_line(&self, diffs: i16, a_rich: bool) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t*\tNM:i:{}\tCV:A:{}",
            self.qname,
            self.flag,
            self.rname,
            self.pos + 1,
            self.mapq,
            self.cigar,
            self.rnext,
            if self.pnext == 0 && self.rnext == "*" {
                0
            } else {
                self.pnext + 1
            },
            self.tlen,
            self.seq,
            diffs,
            if a_rich { 'A' } else { 'T' },
        )
    }
}

/// Reference span of a hit: (start, end, chromosome index), or `None` when
/// the position cannot be resolved within a single chromosome.
fn chrom_and_posn(cl: &ChromLookup, cigar: &str, pos: u32) -> Option<(u32, u32, usize)> {
    let ref_ops = cigar_rseq_ops(cigar);
    let (chrom_idx, offset) = cl.get_chrom_idx_and_offset(pos, ref_ops)?;
    Some((offset, offset + ref_ops, chrom_idx))
}

/// How a single-end result (or a paired-end fallback mate) was classified.
pub enum SeOutcome {
    Unique(String),
    /// Ambiguous; carries a secondary-flagged record only under `-a`.
    Ambig(Option<String>),
    Unmapped,
    Skipped,
}

#[allow(clippy::too_many_arguments)]
pub fn format_se(
    res: &SeResult,
    read: &[u8],
    name: &str,
    cigar: &str,
    cl: &ChromLookup,
    valid_frac: f32,
    allow_ambig: bool,
    pe_flags: u16,
) -> SeOutcome {
    if read.is_empty() {
        return SeOutcome::Skipped;
    }
    let best = &res.best;
    if !best.valid_hit(max_diffs(read.len(), valid_frac)) {
        return SeOutcome::Unmapped;
    }
    let ambig = res.ambig();
    if ambig && !allow_ambig {
        return SeOutcome::Ambig(None);
    }
    let Some((r_s, _r_e, chrom_idx)) = chrom_and_posn(cl, cigar, best.pos) else {
        return SeOutcome::Unmapped;
    };

    let mut flag = pe_flags;
    if best.rc() {
        flag |= sam_flags::READ_RC;
    }
    if ambig {
        flag |= sam_flags::SECONDARY;
    }
    let seq = if best.rc() {
        String::from_utf8_lossy(&revcomp(read)).into_owned()
    } else {
        String::from_utf8_lossy(read).into_owned()
    };
    let record = SamRecord {
        qname: name,
        flag,
        rname: &cl.names()[chrom_idx],
        pos: r_s,
        mapq: res.mapq(),
        cigar,
        rnext: "*",
        pnext: 0,
        tlen: 0,
        seq,
    }
    .to_line(best.diffs, best.is_a_rich());

    if ambig {
        SeOutcome::Ambig(Some(record))
    } else {
        SeOutcome::Unique(record)
    }
}

/// Format a concordant pair as two records with proper-pair flags and signed
/// TLEN. Returns `None` when either mate's position cannot be resolved or the
/// mates land on different chromosomes; the caller then treats the pair as
/// unmapped.
#[allow(clippy::too_many_arguments)]
pub fn format_pe(
    res: &PeResult,
    read1: &[u8],
    read2: &[u8],
    name1: &str,
    name2: &str,
    cig1: &str,
    cig2: &str,
    cl: &ChromLookup,
) -> Option<(String, String)> {
    let pair = &res.best;
    let (r_s1, r_e1, chr1) = chrom_and_posn(cl, cig1, pair.r1.pos)?;
    let (r_s2, r_e2, chr2) = chrom_and_posn(cl, cig2, pair.r2.pos)?;
    if chr1 != chr2 {
        return None;
    }

    let frag_start = r_s1.min(r_s2);
    let frag_end = r_e1.max(r_e2);
    let tlen = i64::from(frag_end) - i64::from(frag_start);
    let (tlen1, tlen2) = if r_s1 <= r_s2 {
        (tlen, -tlen)
    } else {
        (-tlen, tlen)
    };

    let ambig = res.ambig();
    let mut base_flag = sam_flags::READ_PAIRED | sam_flags::PROPER_PAIR;
    if ambig {
        base_flag |= sam_flags::SECONDARY;
    }

    let mut flag1 = base_flag | sam_flags::FIRST_IN_PAIR;
    let mut flag2 = base_flag | sam_flags::SECOND_IN_PAIR;
    if pair.r1.rc() {
        flag1 |= sam_flags::READ_RC;
        flag2 |= sam_flags::MATE_RC;
    }
    if pair.r2.rc() {
        flag2 |= sam_flags::READ_RC;
        flag1 |= sam_flags::MATE_RC;
    }

    let seq1 = if pair.r1.rc() {
        String::from_utf8_lossy(&revcomp(read1)).into_owned()
    } else {
        String::from_utf8_lossy(read1).into_owned()
    };
    let seq2 = if pair.r2.rc() {
        String::from_utf8_lossy(&revcomp(read2)).into_owned()
    } else {
        String::from_utf8_lossy(read2).into_owned()
    };

    let mapq = res.mapq();
    let rname = &cl.names()[chr1];
    let rec1 = SamRecord {
        qname: name1,
        flag: flag1,
        rname,
        pos: r_s1,
        mapq,
        cigar: cig1,
        rnext: "=",
        pnext: r_s2,
        tlen: tlen1,
        seq: seq1,
    }
    .to_line(pair.r1.diffs, pair.r1.is_a_rich());
    let rec2 = SamRecord {
        qname: name2,
        flag: flag2,
        rname,
        pos: r_s2,
        mapq,
        cigar: cig2,
        rnext: "=",
        pnext: r_s1,
        tlen: tlen2,
        seq: seq2,
    }
    .to_line(pair.r2.diffs, pair.r2.is_a_rich());

    Some((rec1, rec2))
}

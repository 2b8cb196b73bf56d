// Paired-end mapping
//
// Each relevant strand/conversion quartet runs the single-end candidate
// search for both mates without pruning to a top-2: candidates go into
// bounded heaps instead. Mating then walks the two position-sorted lists in
// lockstep, pairing every combination inside the fragment-length window,
// aligning mates lazily, and ranking pairs by combined alignment score.
// Fragments without a reportable concordant pair fall back to per-mate
// single-end reporting.

use std::io::Write;
use std::time::Instant;

use rayon::prelude::*;

use crate::banded_swa::BandedAligner;
use crate::encoding::ConversionType;
use crate::errors::{Error, Result};
use crate::fastq_reader::FastqReader;
use crate::hits::{max_diffs, CandidateSink, PeCandidates, PeElement, PeResult, SeElement, SeResult};
use crate::index::MethylIndex;
use crate::map_opt::MapOpt;
use crate::sam::{format_pe, format_se, sam_flags, SeOutcome};
use crate::single_end::{align_top_two, search_combination, ReadScratch};
use crate::stats::{PairClass, PeMapStats};

/// Search phases as (forward mate, conversion of the forward mate). The
/// other mate is searched reverse complemented under the flipped conversion.
fn pe_phases(opt: &MapOpt) -> Vec<(usize, ConversionType)> {
    if opt.random_pbat {
        vec![
            (1, ConversionType::TRich),
            (2, ConversionType::ARich),
            (1, ConversionType::ARich),
            (2, ConversionType::TRich),
        ]
    } else if opt.pbat {
        vec![(1, ConversionType::ARich), (2, ConversionType::TRich)]
    } else {
        vec![(1, ConversionType::TRich), (2, ConversionType::ARich)]
    }
}

/// Pair candidates within the fragment window. `cands_fwd` holds the
/// leftward (forward strand) mate's candidates, `cands_rc` the rightward
/// one's; both are position sorted. A window-compatible pair is aligned (the
/// rightward mate at most once per candidate) and offered to `pe_res`;
/// cigars of the incumbent best pair are kept alongside.
#[allow(clippy::too_many_arguments)]
fn best_pair(
    index: &MethylIndex,
    aligner: &mut BandedAligner,
    fwd_read: &[u8],
    rc_read: &[u8],
    cands_fwd: &[SeElement],
    cands_rc: &[SeElement],
    swap_ends: bool,
    min_frag: u32,
    max_frag: u32,
    pe_res: &mut PeResult,
    cig_fwd: &mut String,
    cig_rc: &mut String,
) {
    let mut j1 = 0usize;
    for cand_rc in cands_rc {
        let mut s2 = *cand_rc;
        let mut cand_cig2 = String::new();
        let mut aligned_s2 = false;
        let lim = u64::from(cand_rc.pos) + rc_read.len() as u64;

        while j1 < cands_fwd.len() && u64::from(cands_fwd[j1].pos) + u64::from(max_frag) < lim {
            j1 += 1;
        }
        while j1 < cands_fwd.len() && u64::from(cands_fwd[j1].pos) + u64::from(min_frag) <= lim {
            let mut s1 = cands_fwd[j1];
            let cand_cig1 = aligner.align_read(&mut s1, fwd_read, index);
            if !aligned_s2 {
                cand_cig2 = aligner.align_read(&mut s2, rc_read, index);
                aligned_s2 = true;
            }
            let pair = if swap_ends {
                PeElement::new(s2, s1)
            } else {
                PeElement::new(s1, s2)
            };
            if pe_res.update_by_score(pair) {
                *cig_fwd = cand_cig1;
                cig_rc.clone_from(&cand_cig2);
            }
            j1 += 1;
        }
    }
}

/// Everything the sequential writer needs about one mapped fragment.
struct PairOutput {
    pair_records: Vec<String>,
    pair_class: PairClass,
    /// Per-mate fallback outcomes; `None` when a concordant pair was emitted.
    mate_outcomes: Option<(SeOutcome, SeOutcome)>,
}

#[allow(clippy::too_many_arguments)]
fn map_one_pair(
    index: &MethylIndex,
    opt: &MapOpt,
    max_candidates: u32,
    read1: &[u8],
    read2: &[u8],
    name1: &str,
    name2: &str,
    aligner: &mut BandedAligner,
    scratch: &mut ReadScratch,
) -> PairOutput {
    let cl = index.chrom_lookup();
    let mut pe_res = PeResult::default();
    let mut se1 = SeResult::new(read1.len());
    let mut se2 = SeResult::new(read2.len());
    let mut cig1 = String::new();
    let mut cig2 = String::new();

    for (fwd_mate, conv) in pe_phases(opt) {
        let (fwd_read, rc_read, swap_ends) = if fwd_mate == 1 {
            (read1, read2, false)
        } else {
            (read2, read1, true)
        };
        let mut cands_fwd = PeCandidates::new(opt.max_mates, fwd_read.len());
        let mut cands_rc = PeCandidates::new(opt.max_mates, rc_read.len());
        if !fwd_read.is_empty() {
            search_combination(
                index,
                max_candidates,
                fwd_read,
                '+',
                conv,
                scratch,
                &mut cands_fwd,
            );
        }
        if !rc_read.is_empty() {
            search_combination(
                index,
                max_candidates,
                rc_read,
                '-',
                conv.flip(),
                scratch,
                &mut cands_rc,
            );
        }

        let fwd_list = cands_fwd.prepare_for_mating();
        let rc_list = cands_rc.prepare_for_mating();
        {
            let (cig_fwd, cig_rc) = if swap_ends {
                (&mut cig2, &mut cig1)
            } else {
                (&mut cig1, &mut cig2)
            };
            best_pair(
                index,
                aligner,
                fwd_read,
                rc_read,
                &fwd_list,
                &rc_list,
                swap_ends,
                opt.min_frag,
                opt.max_frag,
                &mut pe_res,
                cig_fwd,
                cig_rc,
            );
        }

        // every candidate also feeds its mate's single-end fallback
        let (se_fwd, se_rc) = if swap_ends {
            (&mut se2, &mut se1)
        } else {
            (&mut se1, &mut se2)
        };
        for e in &fwd_list {
            se_fwd.update(e.pos, e.diffs, e.flags);
        }
        for e in &rc_list {
            se_rc.update(e.pos, e.diffs, e.flags);
        }
    }

    let pe_valid = !read1.is_empty()
        && !read2.is_empty()
        && pe_res.best.valid_hit(
            max_diffs(read1.len(), opt.valid_frac),
            max_diffs(read2.len(), opt.valid_frac),
        );
    let pe_ambig = pe_res.ambig();

    if pe_valid && (!pe_ambig || opt.allow_ambig) {
        if let Some((rec1, rec2)) =
            format_pe(&pe_res, read1, read2, name1, name2, &cig1, &cig2, cl)
        {
            return PairOutput {
                pair_records: vec![rec1, rec2],
                pair_class: if pe_ambig {
                    PairClass::Ambig
                } else {
                    PairClass::Unique
                },
                mate_outcomes: None,
            };
        }
        // position lookup failed (chromosome boundary or differing
        // chromosomes): the whole fragment is unmapped
        let skipped = |read: &[u8]| {
            if read.is_empty() {
                SeOutcome::Skipped
            } else {
                SeOutcome::Unmapped
            }
        };
        return PairOutput {
            pair_records: Vec::new(),
            pair_class: PairClass::Unmapped,
            mate_outcomes: Some((skipped(read1), skipped(read2))),
        };
    }

    let pair_class = if pe_valid {
        PairClass::Ambig
    } else {
        PairClass::Unmapped
    };

    // single-end fallback for each mate
    let se_cig1 = align_top_two(&mut se1, read1, aligner, index);
    let se_cig2 = align_top_two(&mut se2, read2, aligner, index);
    let out1 = format_se(
        &se1,
        read1,
        name1,
        &se_cig1,
        cl,
        opt.valid_frac,
        opt.allow_ambig,
        sam_flags::READ_PAIRED | sam_flags::FIRST_IN_PAIR | sam_flags::MATE_UNMAPPED,
    );
    let out2 = format_se(
        &se2,
        read2,
        name2,
        &se_cig2,
        cl,
        opt.valid_frac,
        opt.allow_ambig,
        sam_flags::READ_PAIRED | sam_flags::SECOND_IN_PAIR | sam_flags::MATE_UNMAPPED,
    );

    PairOutput {
        pair_records: Vec::new(),
        pair_class,
        mate_outcomes: Some((out1, out2)),
    }
}

/// Map a pair of reads files: pull batches from both in lockstep, map the
/// fragments in parallel, write records in input order.
pub fn map_paired_ended<W: Write>(
    index: &MethylIndex,
    opt: &MapOpt,
    max_candidates: u32,
    reads_file1: &str,
    reads_file2: &str,
    writer: &mut W,
) -> Result<PeMapStats> {
    let mut reader1 = FastqReader::new(reads_file1)?;
    let mut reader2 = FastqReader::new(reads_file2)?;
    let mut stats = PeMapStats::default();
    let start_time = Instant::now();
    let mut total_pairs = 0usize;

    loop {
        let batch1 = reader1.read_batch(opt.batch_size)?;
        let batch2 = reader2.read_batch(opt.batch_size)?;
        if batch1.len() != batch2.len() {
            return Err(Error::InvalidReads(format!(
                "paired files out of step: {} has {} reads where {} has {}",
                reads_file1,
                batch1.len(),
                reads_file2,
                batch2.len()
            )));
        }
        if batch1.is_empty() {
            break;
        }
        total_pairs += batch1.len();
        let max_read_len = batch1
            .seqs
            .iter()
            .chain(batch2.seqs.iter())
            .map(Vec::len)
            .max()
            .unwrap_or(0);
        log::info!("read {} read pairs", batch1.len());

        let outputs: Vec<PairOutput> = (0..batch1.len())
            .into_par_iter()
            .map_init(
                || (BandedAligner::new(max_read_len), ReadScratch::default()),
                |(aligner, scratch), i| {
                    map_one_pair(
                        index,
                        opt,
                        max_candidates,
                        &batch1.seqs[i],
                        &batch2.seqs[i],
                        &batch1.names[i],
                        &batch2.names[i],
                        aligner,
                        scratch,
                    )
                },
            )
            .collect();

        for output in outputs {
            stats.update_pair(output.pair_class);
            for rec in &output.pair_records {
                writeln!(writer, "{rec}").map_err(Error::Io)?;
            }
            if let Some((out1, out2)) = output.mate_outcomes {
                stats.end1_stats.update(&out1);
                stats.end2_stats.update(&out2);
                for outcome in [out1, out2] {
                    match outcome {
                        SeOutcome::Unique(rec) | SeOutcome::Ambig(Some(rec)) => {
                            writeln!(writer, "{rec}").map_err(Error::Io)?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    log::info!(
        "mapped {} read pairs in {:.2} sec",
        total_pairs,
        start_time.elapsed().as_secs_f64()
    );
    Ok(stats)
}

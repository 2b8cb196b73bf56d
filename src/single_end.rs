// Single-end mapping
//
// The seed scan for one encoded read runs in two stages. The specific pass
// probes the index at each starting offset the index interval provides and
// refines the slot through the full sorting depth; if that already yields an
// exact hit there is nothing left to find. The sensitive pass then slides
// the seed window across the read in roughly equal steps, refining only to
// the (shorter) seed depth, which recovers hits whose 5' end is corrupted or
// conversion-ambiguous. Candidate lists larger than the cap are skipped
// outright; they would cost more than they could ever disambiguate.
//
// Batches are processed with rayon; each worker owns its scratch buffers and
// one banded aligner, and a batch is written out in input order before the
// next one starts.

use std::io::Write;
use std::time::Instant;

use rayon::prelude::*;

use crate::banded_swa::BandedAligner;
use crate::compare::{full_compare, prefetch_genome};
use crate::encoding::{encode_read, prep_for_seeds, revcomp, ConversionType};
use crate::errors::Result;
use crate::fastq_reader::FastqReader;
use crate::hits::{strand_code, CandidateSink, SeResult};
use crate::index::MethylIndex;
use crate::map_opt::MapOpt;
use crate::sam::{format_se, SeOutcome};
use crate::seed::{get_hash, refine_candidates, N_SEED_POSITIONS};
use crate::stats::SeMapStats;

/// Per-worker encoding buffers, reused across reads.
#[derive(Default)]
pub(crate) struct ReadScratch {
    pub seed: Vec<u8>,
    pub even: Vec<u8>,
    pub odd: Vec<u8>,
}

/// Compare every candidate in `positions[lo..hi]` against the read and feed
/// the mismatch counts to the sink. The genome byte of the next candidate is
/// prefetched while the current one is compared.
#[allow(clippy::too_many_arguments)]
pub(crate) fn check_hits<R: CandidateSink>(
    index: &MethylIndex,
    lo: usize,
    hi: usize,
    even: &[u8],
    odd: &[u8],
    read_len: u32,
    offset: u32,
    strand: u16,
    res: &mut R,
) {
    let positions = &index.positions()[lo..hi];
    let genome = index.genome_bytes();
    for (i, &raw) in positions.iter().enumerate() {
        if res.sure_ambig(offset) {
            break;
        }
        if raw < offset {
            continue;
        }
        let pos = raw - offset;
        if u64::from(pos) + u64::from(read_len) > u64::from(index.genome_size()) {
            continue;
        }
        if let Some(&next) = positions.get(i + 1) {
            prefetch_genome(genome, (next.saturating_sub(offset) >> 1) as usize);
        }
        let diffs = if pos & 1 == 1 {
            full_compare(res.get_cutoff(), odd, genome, (pos >> 1) as usize)
        } else {
            full_compare(res.get_cutoff(), even, genome, (pos >> 1) as usize)
        };
        res.update(pos, diffs, strand);
    }
}

/// Run the full candidate search for one encoded read under one
/// strand/conversion combination.
pub(crate) fn process_seeds<R: CandidateSink>(
    index: &MethylIndex,
    max_candidates: u32,
    scratch: &ReadScratch,
    strand: u16,
    res: &mut R,
) {
    let read_seed = &scratch.seed;
    let read_len = read_seed.len() as u32;
    let params = *index.seed_params();
    if read_len < params.key_weight {
        return;
    }

    let probe_at = |offset: u32, depth: u32, res: &mut R| {
        let sub = &read_seed[offset as usize..];
        let key = get_hash(sub, params.key_weight);
        let (mut lo, mut hi) = index.probe(key);
        if lo >= hi {
            return;
        }
        refine_candidates(sub, index, read_len - offset, depth, &mut lo, &mut hi);
        if (hi - lo) as u32 >= max_candidates {
            return; // throughput guard: this seed offset is hopeless
        }
        check_hits(
            index,
            lo,
            hi,
            &scratch.even,
            &scratch.odd,
            read_len,
            offset,
            strand,
            res,
        );
    };

    // specific pass: full sorting depth at each indexed starting offset
    let n_offsets = params.index_interval.min(read_len - params.key_weight + 1);
    for offset in 0..n_offsets {
        if res.sure_ambig(offset) {
            return;
        }
        probe_at(offset, params.n_sorting_positions, res);
    }
    if res.found_exact() {
        return;
    }

    // sensitive pass: slide the seed window in roughly equal steps
    let shift_lim = read_len.saturating_sub(N_SEED_POSITIONS + 1);
    let n_starts = (read_len + N_SEED_POSITIONS - 1) / N_SEED_POSITIONS;
    let shift = if n_starts > 1 {
        (shift_lim / (n_starts - 1)).max(1)
    } else {
        1
    };
    let mut offset = 0;
    loop {
        if res.sure_ambig(offset) {
            return;
        }
        probe_at(offset, N_SEED_POSITIONS, res);
        if offset >= shift_lim {
            break;
        }
        offset = (offset + shift).min(shift_lim);
    }
}

/// The (strand, conversion) combinations to search for a single-end read.
/// The conversion names the read's own type; reverse-complement searches
/// encode under the flipped one.
fn se_combinations(opt: &MapOpt) -> Vec<(char, ConversionType)> {
    if opt.random_pbat {
        vec![
            ('+', ConversionType::TRich),
            ('+', ConversionType::ARich),
            ('-', ConversionType::ARich),
            ('-', ConversionType::TRich),
        ]
    } else if opt.a_rich || opt.pbat {
        vec![('+', ConversionType::ARich), ('-', ConversionType::ARich)]
    } else {
        vec![('+', ConversionType::TRich), ('-', ConversionType::TRich)]
    }
}

/// Seed-search one read under one combination, reusing the worker scratch.
pub(crate) fn search_combination<R: CandidateSink>(
    index: &MethylIndex,
    max_candidates: u32,
    read: &[u8],
    strand: char,
    conv: ConversionType,
    scratch: &mut ReadScratch,
    res: &mut R,
) {
    let encoding = if strand == '-' { conv.flip() } else { conv };
    if strand == '-' {
        let rc = revcomp(read);
        encode_read(&rc, encoding, &mut scratch.seed);
    } else {
        encode_read(read, encoding, &mut scratch.seed);
    }
    prep_for_seeds(&scratch.seed, &mut scratch.even, &mut scratch.odd);
    process_seeds(index, max_candidates, scratch, strand_code(strand, conv), res);
}

/// Refine the two best hits with the banded aligner and keep them ordered by
/// alignment score. Returns the best hit's CIGAR.
pub(crate) fn align_top_two(
    res: &mut SeResult,
    read: &[u8],
    aligner: &mut BandedAligner,
    index: &MethylIndex,
) -> String {
    let mut cigar = String::new();
    let mut second_cigar = String::new();
    if res.valid_for_alignment(&res.best) {
        let mut best = res.best;
        cigar = aligner.align_read(&mut best, read, index);
        res.best = best;
    }
    if res.valid_for_alignment(&res.second_best) {
        let mut second = res.second_best;
        second_cigar = aligner.align_read(&mut second, read, index);
        res.second_best = second;
    }
    if res.sort_by_score() {
        cigar = second_cigar;
    }
    cigar
}

/// Map one single-end read: candidate search over all combinations, then
/// banded refinement of the two best hits. Returns the result and the
/// best hit's CIGAR.
fn map_one_read(
    index: &MethylIndex,
    opt: &MapOpt,
    max_candidates: u32,
    read: &[u8],
    aligner: &mut BandedAligner,
    scratch: &mut ReadScratch,
) -> (SeResult, String) {
    let mut res = SeResult::new(read.len());
    if read.is_empty() {
        return (res, String::new());
    }
    for (strand, conv) in se_combinations(opt) {
        search_combination(index, max_candidates, read, strand, conv, scratch, &mut res);
    }
    let cigar = align_top_two(&mut res, read, aligner, index);
    (res, cigar)
}

/// Map a single-end reads file: pull batches, map them in parallel, write
/// records in input order, and accumulate stats.
pub fn map_single_ended<W: Write>(
    index: &MethylIndex,
    opt: &MapOpt,
    max_candidates: u32,
    reads_file: &str,
    writer: &mut W,
) -> Result<SeMapStats> {
    let mut reader = FastqReader::new(reads_file)?;
    let mut stats = SeMapStats::default();
    let start_time = Instant::now();
    let mut total_reads = 0usize;

    loop {
        let batch = reader.read_batch(opt.batch_size)?;
        if batch.is_empty() {
            break;
        }
        total_reads += batch.len();
        let max_read_len = batch.seqs.iter().map(Vec::len).max().unwrap_or(0);
        log::info!("read {} sequences", batch.len());

        let results: Vec<(SeResult, String)> = batch
            .seqs
            .par_iter()
            .map_init(
                || (BandedAligner::new(max_read_len), ReadScratch::default()),
                |(aligner, scratch), seq| {
                    map_one_read(index, opt, max_candidates, seq, aligner, scratch)
                },
            )
            .collect();

        for (i, (res, cigar)) in results.iter().enumerate() {
            let outcome = format_se(
                res,
                &batch.seqs[i],
                &batch.names[i],
                cigar,
                index.chrom_lookup(),
                opt.valid_frac,
                opt.allow_ambig,
                0,
            );
            stats.update(&outcome);
            match outcome {
                SeOutcome::Unique(rec) | SeOutcome::Ambig(Some(rec)) => {
                    writeln!(writer, "{rec}").map_err(crate::errors::Error::Io)?;
                }
                _ => {}
            }
        }
    }

    log::info!(
        "mapped {} reads in {:.2} sec",
        total_reads,
        start_time.elapsed().as_secs_f64()
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::SeedParams;

    fn test_index(seq: &[u8]) -> MethylIndex {
        MethylIndex::from_parts(
            &[("chr1".to_string(), seq.to_vec())],
            SeedParams {
                key_weight: 6,
                n_sorting_positions: 64,
                index_interval: 1,
                max_candidates: 5000,
            },
        )
        .unwrap()
    }

    fn map_read(index: &MethylIndex, opt: &MapOpt, read: &[u8]) -> (SeResult, String) {
        let mut aligner = BandedAligner::new(read.len().max(64));
        let mut scratch = ReadScratch::default();
        map_one_read(index, opt, 1000, read, &mut aligner, &mut scratch)
    }

    // a 120 bp reference with enough sequence diversity to seed on
    fn reference() -> Vec<u8> {
        b"GATTACAGATTACACCGGTTAACCGGTTAATGCATGCATGCAGCTAGCTAGCTAGGCCGGAA\
          TTCCGGCGCGCGCGATATATATCGCGTACGTACGTACGGCCGGCCAATTGGCCAA"
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .copied()
            .collect()
    }

    #[test]
    fn exact_forward_read_maps_uniquely() {
        let genome = reference();
        let idx = test_index(&genome);
        let read = &genome[10..60];
        let (res, cigar) = map_read(&idx, &MapOpt::default(), read);
        assert_eq!(res.best.pos, 10);
        assert_eq!(res.best.diffs, 0);
        assert!(!res.best.rc());
        assert_eq!(cigar, "50M");
        assert!(!res.ambig());
    }

    #[test]
    fn bisulfite_converted_read_still_maps_exactly() {
        let genome = reference();
        let idx = test_index(&genome);
        let converted: Vec<u8> = genome[10..60]
            .iter()
            .map(|&b| if b == b'C' { b'T' } else { b })
            .collect();
        let (res, cigar) = map_read(&idx, &MapOpt::default(), &converted);
        assert_eq!(res.best.pos, 10);
        assert_eq!(res.best.diffs, 0, "C->T conversions must not count");
        assert_eq!(cigar, "50M");
    }

    #[test]
    fn reverse_complement_read_maps_with_rc_flag() {
        let genome = reference();
        let idx = test_index(&genome);
        let read = revcomp(&genome[20..70]);
        let (res, _) = map_read(&idx, &MapOpt::default(), &read);
        assert_eq!(res.best.pos, 20);
        assert_eq!(res.best.diffs, 0);
        assert!(res.best.rc());
    }

    #[test]
    fn second_best_tracks_a_one_mismatch_copy() {
        // two copies of a 40-mer, the second with a single internal change;
        // the change keeps the purine/pyrimidine class so the copy stays in
        // the same index slot (A<->G, or C->T which a T-rich read C still
        // counts as a mismatch)
        let mut genome = reference();
        let site = genome[10..50].to_vec();
        let m = (18..site.len()).find(|&i| site[i] != b'T').unwrap();
        let mut near = site.clone();
        near[m] = match near[m] {
            b'A' => b'G',
            b'G' => b'A',
            _ => b'T',
        };
        genome.extend_from_slice(b"GGCCGGCC");
        let second_pos = genome.len() as u32;
        genome.extend_from_slice(&near);
        let idx = test_index(&genome);

        let (res, _) = map_read(&idx, &MapOpt::default(), &site);
        assert_eq!(res.best.diffs, 0);
        assert_eq!(res.best.pos, 10);
        assert_eq!(res.second_best.pos, second_pos);
        assert_eq!(res.second_best.diffs, 1);
        assert!(!res.ambig());
    }

    #[test]
    fn identical_repeats_are_ambiguous() {
        let mut genome = reference();
        let site = genome[10..60].to_vec();
        genome.extend_from_slice(b"TTGGCCAA");
        genome.extend_from_slice(&site);
        let idx = test_index(&genome);

        let (res, _) = map_read(&idx, &MapOpt::default(), &site);
        assert_eq!(res.best.diffs, 0);
        assert_eq!(res.second_best.diffs, 0);
        assert!(res.ambig());
    }

    #[test]
    fn a_rich_mode_searches_the_complementary_conversion() {
        let genome = reference();
        let idx = test_index(&genome);
        // G->A converted read, as produced by A-rich sequencing
        let converted: Vec<u8> = genome[10..60]
            .iter()
            .map(|&b| if b == b'G' { b'A' } else { b })
            .collect();
        let opt = MapOpt {
            a_rich: true,
            ..MapOpt::default()
        };
        let (res, _) = map_read(&idx, &opt, &converted);
        assert_eq!(res.best.pos, 10);
        assert_eq!(res.best.diffs, 0);
        assert!(res.best.is_a_rich());

        // the default T-rich search must not accept it exactly
        let (res_t, _) = map_read(&idx, &MapOpt::default(), &converted);
        assert_ne!(res_t.best.diffs, 0);
    }

    #[test]
    fn random_pbat_finds_both_conversions() {
        let genome = reference();
        let idx = test_index(&genome);
        let opt = MapOpt {
            random_pbat: true,
            ..MapOpt::default()
        };
        for (read, a_rich) in [
            (
                genome[10..60]
                    .iter()
                    .map(|&b| if b == b'C' { b'T' } else { b })
                    .collect::<Vec<u8>>(),
                false,
            ),
            (
                genome[10..60]
                    .iter()
                    .map(|&b| if b == b'G' { b'A' } else { b })
                    .collect::<Vec<u8>>(),
                true,
            ),
        ] {
            let (res, _) = map_read(&idx, &opt, &read);
            assert_eq!(res.best.diffs, 0);
            assert_eq!(res.best.pos, 10);
            assert_eq!(res.best.is_a_rich(), a_rich);
        }
    }
}

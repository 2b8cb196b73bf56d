// Shared helpers for the mapping scenario tests: small in-memory indexes,
// throwaway FASTQ files, and full runs through the batch drivers.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use methyl_align::index::{MethylIndex, SeedParams};
use methyl_align::map_opt::MapOpt;
use methyl_align::paired_end::map_paired_ended;
use methyl_align::single_end::map_single_ended;
use methyl_align::stats::{PeMapStats, SeMapStats};

pub const MAX_CANDIDATES: u32 = 1000;

pub fn build_index(chroms: &[(&str, Vec<u8>)]) -> MethylIndex {
    let chroms: Vec<(String, Vec<u8>)> = chroms
        .iter()
        .map(|(name, seq)| (name.to_string(), seq.clone()))
        .collect();
    MethylIndex::from_parts(
        &chroms,
        SeedParams {
            key_weight: 6,
            n_sorting_positions: 64,
            index_interval: 1,
            max_candidates: 5000,
        },
    )
    .expect("test index should build")
}

/// Deterministic low-repetition sequence of the requested length.
pub fn random_genome(len: usize, mut state: u64) -> Vec<u8> {
    let mut genome = Vec::with_capacity(len);
    while genome.len() < len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        genome.push(b"ACGT"[(state >> 33) as usize % 4]);
    }
    genome
}

pub fn write_fastq(tag: &str, records: &[(&str, &[u8])]) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "methyl_align_test_{}_{}.fq",
        std::process::id(),
        tag
    ));
    let mut f = File::create(&path).unwrap();
    for (name, seq) in records {
        writeln!(
            f,
            "@{name}\n{}\n+\n{}",
            String::from_utf8_lossy(seq),
            "I".repeat(seq.len())
        )
        .unwrap();
    }
    path
}

/// Run the single-end driver over the given reads; returns the SAM record
/// lines (header excluded, there is none) and the stats.
pub fn run_se(
    index: &MethylIndex,
    opt: &MapOpt,
    tag: &str,
    records: &[(&str, &[u8])],
) -> (Vec<String>, SeMapStats) {
    let path = write_fastq(tag, records);
    let mut out = Vec::new();
    let stats = map_single_ended(
        index,
        opt,
        MAX_CANDIDATES,
        path.to_str().unwrap(),
        &mut out,
    )
    .expect("mapping should succeed");
    std::fs::remove_file(&path).ok();
    let lines = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    (lines, stats)
}

/// Run the paired-end driver over the given mate records.
pub fn run_pe(
    index: &MethylIndex,
    opt: &MapOpt,
    tag: &str,
    records1: &[(&str, &[u8])],
    records2: &[(&str, &[u8])],
) -> (Vec<String>, PeMapStats) {
    let path1 = write_fastq(&format!("{tag}_1"), records1);
    let path2 = write_fastq(&format!("{tag}_2"), records2);
    let mut out = Vec::new();
    let stats = map_paired_ended(
        index,
        opt,
        MAX_CANDIDATES,
        path1.to_str().unwrap(),
        path2.to_str().unwrap(),
        &mut out,
    )
    .expect("mapping should succeed");
    std::fs::remove_file(&path1).ok();
    std::fs::remove_file(&path2).ok();
    let lines = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    (lines, stats)
}

pub fn sam_fields(record: &str) -> Vec<String> {
    record.split('\t').map(str::to_string).collect()
}

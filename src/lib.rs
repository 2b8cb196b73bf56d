pub mod banded_swa;
pub mod cigar;
pub mod compare;
pub mod encoding;
pub mod errors;
pub mod fastq_reader;
pub mod hits;
pub mod index;
pub mod map_opt;
pub mod paired_end;
pub mod sam;
pub mod seed;
pub mod single_end;
pub mod stats;

pub const CRATE_NAME: &str = "methyl-align";

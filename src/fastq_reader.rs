// FASTQ input
//
// Batched (name, sequence) loading on top of bio::io::fastq, with gzip
// detected by file extension. Only the sequence line of each record is used;
// the name is the header up to the first whitespace. Reads carrying fewer
// than MIN_READ_LENGTH informative (non-N) bases are cleared here and
// classified as skipped downstream; clearing instead of dropping keeps
// paired files in lockstep.

use std::fs::File;
use std::io::{BufReader, Read};

use bio::io::fastq;
use flate2::read::MultiGzDecoder;

use crate::errors::{Error, Result};

/// Reads shorter than this (counting non-N bases only) are not mapped.
pub const MIN_READ_LENGTH: usize = 32;

/// One batch of reads; `seqs[i]` is empty when the read was filtered out.
#[derive(Default)]
pub struct ReadBatch {
    pub names: Vec<String>,
    pub seqs: Vec<Vec<u8>>,
}

impl ReadBatch {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

pub struct FastqReader {
    records: fastq::Records<BufReader<Box<dyn Read>>>,
    filename: String,
}

impl FastqReader {
    /// Open a FASTQ file, decompressing on the fly when it ends in `.gz`.
    pub fn new(path: &str) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::InvalidReads(format!("{path}: {e}")))?;
        let reader: Box<dyn Read> = if path.ends_with(".gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self {
            records: fastq::Reader::new(reader).records(),
            filename: path.to_string(),
        })
    }

    /// Pull up to `batch_size` reads; an empty batch signals EOF.
    pub fn read_batch(&mut self, batch_size: usize) -> Result<ReadBatch> {
        let mut batch = ReadBatch::default();
        for _ in 0..batch_size {
            match self.records.next() {
                Some(Ok(record)) => {
                    batch.names.push(record.id().to_string());
                    let mut seq = record.seq().to_vec();
                    let informative = seq
                        .iter()
                        .filter(|&&b| !matches!(b, b'N' | b'n'))
                        .count();
                    if informative < MIN_READ_LENGTH {
                        seq.clear();
                    }
                    batch.seqs.push(seq);
                }
                Some(Err(e)) => {
                    return Err(Error::InvalidReads(format!("{}: {e}", self.filename)));
                }
                None => break,
            }
        }
        Ok(batch)
    }
}

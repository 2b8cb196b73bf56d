// Index management
//
// The index is produced by an external indexer and treated as read-only for
// the life of the mapper. It holds the 4-bit packed genome (two bases per
// byte), the seed-key counter table, the per-slot sorted position lists, and
// the chromosome lookup. On disk it is a versioned bincode blob; an index
// written by an incompatible build is rejected at load time.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::encoding::pack_reference;
use crate::errors::{Error, Result};
use crate::seed::{self, N_SEED_POSITIONS};

/// Versioned wrapper attached to the on-disk index so that incompatible
/// formats are detected instead of misread.
#[derive(Serialize, Deserialize)]
struct VersionedIndexItem<T> {
    version: u8,
    data: T,
}

impl<T> VersionedIndexItem<T> {
    /// Increase this number whenever the on-disk layout changes.
    const INDEX_VERSION: u8 = 3;

    fn new(data: T) -> Self {
        Self {
            version: Self::INDEX_VERSION,
            data,
        }
    }

    fn try_take(self) -> Result<T> {
        if self.version == Self::INDEX_VERSION {
            Ok(self.data)
        } else {
            Err(Error::IndexVersionMismatch {
                running: Self::INDEX_VERSION,
                on_disk: self.version,
            })
        }
    }
}

impl<T> VersionedIndexItem<T>
where
    T: DeserializeOwned,
{
    fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(File::open(path)
            .map(BufReader::new)
            .map(bincode::deserialize_from)??)
    }
}

/// Seed-indexing parameters the index was built with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeedParams {
    /// Bits in the seed key (= bases hashed for the counter lookup).
    pub key_weight: u32,
    /// Positions past the seed start through which each key slot is sorted.
    pub n_sorting_positions: u32,
    /// Every `index_interval`-th genome position is present in the index.
    pub index_interval: u32,
    /// Largest candidate list retained when the index was built.
    pub max_candidates: u32,
}

/// Maps global genome positions to (chromosome, local offset). A mapping is
/// only valid if the aligned region lies entirely within one chromosome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromLookup {
    names: Vec<String>,
    /// Cumulative start offsets, one extra entry holding the genome size.
    starts: Vec<u32>,
}

impl ChromLookup {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn chrom_size(&self, chrom_idx: usize) -> u32 {
        self.starts[chrom_idx + 1] - self.starts[chrom_idx]
    }

    pub fn genome_size(&self) -> u32 {
        *self.starts.last().unwrap_or(&0)
    }

    /// Resolve a global position spanning `ref_ops` reference bases. Returns
    /// `None` if the position is out of range or the span crosses a
    /// chromosome boundary.
    pub fn get_chrom_idx_and_offset(&self, pos: u32, ref_ops: u32) -> Option<(usize, u32)> {
        if self.names.is_empty() || u64::from(pos) + u64::from(ref_ops) > u64::from(self.genome_size()) {
            return None;
        }
        let chrom_idx = self.starts[1..].partition_point(|&start| start <= pos);
        if pos + ref_ops > self.starts[chrom_idx + 1] {
            return None; // alignment spans a chromosome boundary
        }
        Some((chrom_idx, pos - self.starts[chrom_idx]))
    }
}

/// The loaded mapping index. Immutable during mapping; shared read-only
/// across worker threads without synchronization.
#[derive(Serialize, Deserialize)]
pub struct MethylIndex {
    seed: SeedParams,
    genome_size: u32,
    /// 4-bit packed genome, even position in the low nibble of byte pos/2.
    genome: Vec<u8>,
    /// Slot boundaries per seed key; slot k is positions[counter[k]..counter[k+1]].
    counter: Vec<u32>,
    positions: Vec<u32>,
    cl: ChromLookup,
}

impl MethylIndex {
    pub fn seed_params(&self) -> &SeedParams {
        &self.seed
    }

    pub fn genome_size(&self) -> u32 {
        self.genome_size
    }

    pub fn genome_bytes(&self) -> &[u8] {
        &self.genome
    }

    pub fn positions(&self) -> &[u32] {
        &self.positions
    }

    pub fn chrom_lookup(&self) -> &ChromLookup {
        &self.cl
    }

    /// The 4-bit base mask at a genome position; 0 (mismatch-everything) for
    /// reference N.
    #[inline(always)]
    pub fn get_base(&self, pos: u32) -> u8 {
        (self.genome[(pos >> 1) as usize] >> ((pos & 1) * 4)) & 0x0f
    }

    /// The sorting bit at a genome position; positions past the end read as 0
    /// so that refinement near the genome boundary stays well defined.
    #[inline(always)]
    pub fn base_bit(&self, pos: u32) -> u32 {
        if pos < self.genome_size {
            seed::seed_bit(self.get_base(pos))
        } else {
            0
        }
    }

    /// The position range of a seed-key slot.
    #[inline]
    pub fn probe(&self, key: u32) -> (usize, usize) {
        (
            self.counter[key as usize] as usize,
            self.counter[key as usize + 1] as usize,
        )
    }

    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let index: Self = VersionedIndexItem::read_from_path(path)?.try_take()?;
        let expected_counter_len = (1usize << index.seed.key_weight) + 1;
        if index.counter.len() != expected_counter_len {
            return Err(Error::InvalidIndex(format!(
                "counter table has {} entries, expected {} for a {}-bit key",
                index.counter.len(),
                expected_counter_len,
                index.seed.key_weight
            )));
        }
        if index.genome.len() != (index.genome_size as usize + 1) / 2 {
            return Err(Error::InvalidIndex(
                "packed genome length disagrees with genome size".to_string(),
            ));
        }
        if N_SEED_POSITIONS > index.seed.n_sorting_positions {
            return Err(Error::Config(format!(
                "seed length {} exceeds the {} positions the index was sorted by",
                N_SEED_POSITIONS, index.seed.n_sorting_positions
            )));
        }
        Ok(index)
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &VersionedIndexItem::new(self))?;
        Ok(())
    }

    /// Assemble an index from named chromosome sequences. This is the
    /// reference definition of the structure the external indexer produces;
    /// the test suite uses it to build small indexes in memory.
    pub fn from_parts(chroms: &[(String, Vec<u8>)], seed_params: SeedParams) -> Result<Self> {
        if seed_params.key_weight == 0 || seed_params.key_weight > 24 {
            return Err(Error::Config(format!(
                "key weight {} out of range (1..=24)",
                seed_params.key_weight
            )));
        }
        if seed_params.index_interval == 0 {
            return Err(Error::Config("index interval must be positive".to_string()));
        }

        let mut names = Vec::with_capacity(chroms.len());
        let mut starts = vec![0u32];
        let mut ascii = Vec::new();
        for (name, chrom_seq) in chroms {
            names.push(name.clone());
            ascii.extend_from_slice(chrom_seq);
            starts.push(ascii.len() as u32);
        }
        let genome_size = ascii.len() as u32;
        let mut genome = pack_reference(&ascii);
        if genome_size % 2 == 1 {
            // the unused high nibble of the final byte must match anything:
            // comparison-form pads may land one position past the genome end
            if let Some(last) = genome.last_mut() {
                *last |= 0xf0;
            }
        }

        let index = Self {
            seed: seed_params,
            genome_size,
            genome,
            counter: Vec::new(),
            positions: Vec::new(),
            cl: ChromLookup { names, starts },
        };
        Ok(index.build_position_table())
    }

    /// Counting-sort genome positions into key slots, then sort each slot by
    /// the bit string at positions key_weight..n_sorting_positions. This is
    /// the ordering the refiner's binary search depends on.
    fn build_position_table(mut self) -> Self {
        let kw = self.seed.key_weight;
        let n_keys = 1usize << kw;
        let mut counter = vec![0u32; n_keys + 1];

        // every position whose full seed key fits within the genome
        let last_pos = (self.genome_size + 1).saturating_sub(kw);
        let indexed = (0..last_pos).filter(|p| p % self.seed.index_interval == 0);

        let mut keys = Vec::new();
        for p in indexed.clone() {
            let key = (p..p + kw).fold(0u32, |k, q| (k << 1) | self.base_bit(q));
            counter[key as usize + 1] += 1;
            keys.push(key);
        }
        for k in 1..=n_keys {
            counter[k] += counter[k - 1];
        }

        let mut positions = vec![0u32; keys.len()];
        let mut fill = counter.clone();
        for (p, &key) in indexed.zip(keys.iter()) {
            positions[fill[key as usize] as usize] = p;
            fill[key as usize] += 1;
        }

        for k in 0..n_keys {
            let (lo, hi) = (counter[k] as usize, counter[k + 1] as usize);
            positions[lo..hi].sort_by(|&a, &b| {
                (kw..self.seed.n_sorting_positions)
                    .map(|q| (self.base_bit(a.wrapping_add(q)), self.base_bit(b.wrapping_add(q))))
                    .find(|(x, y)| x != y)
                    .map_or(std::cmp::Ordering::Equal, |(x, y)| x.cmp(&y))
            });
        }

        self.counter = counter;
        self.positions = positions;
        self
    }
}

// Mapping options
//
// One struct carrying every knob of the mapping run, with the defaults the
// CLI advertises. The candidate cap deserves care: 0 means "derive from
// genome size", the result is clamped into a fixed range, sensitive mode
// scales it up, and whatever comes out must not exceed the cap the index
// was built with.

use crate::errors::{Error, Result};
use crate::index::MethylIndex;

/// Lower clamp of the per-seed candidate cap.
pub const MIN_MAX_CANDIDATES: u32 = 100;
/// Upper clamp of the per-seed candidate cap (before sensitive scaling).
pub const MAX_MAX_CANDIDATES: u32 = 3000;
/// Sensitive mode multiplies the cap and its upper clamp by this factor.
pub const SENSITIVE_FACTOR: u32 = 10;

#[derive(Debug, Clone)]
pub struct MapOpt {
    /// Worker threads.
    pub n_threads: usize,
    /// Reads loaded per batch.
    pub batch_size: usize,
    /// Per-seed candidate cap; 0 derives it from the genome size.
    pub max_candidates: u32,
    /// Raise the candidate cap for sensitivity at the cost of throughput.
    pub sensitive: bool,
    /// Paired-end candidate heap capacity.
    pub max_mates: usize,
    /// Fragment length window for concordant pairs.
    pub min_frag: u32,
    pub max_frag: u32,
    /// Largest fraction of a read that may be edits in a reported hit.
    pub valid_frac: f32,
    /// Report a position for ambiguous reads (flagged secondary).
    pub allow_ambig: bool,
    /// Reads follow the PBAT protocol.
    pub pbat: bool,
    /// Reads follow random PBAT: all four strand/conversion combinations.
    pub random_pbat: bool,
    /// Single-end reads are A-rich.
    pub a_rich: bool,
}

impl Default for MapOpt {
    fn default() -> Self {
        Self {
            n_threads: 1,
            batch_size: 20_000,
            max_candidates: 0,
            sensitive: false,
            max_mates: 20,
            min_frag: 32,
            max_frag: 3000,
            valid_frac: 0.1,
            allow_ambig: false,
            pbat: false,
            random_pbat: false,
            a_rich: false,
        }
    }
}

impl MapOpt {
    /// The effective candidate cap: auto-derive when unset, clamp into
    /// [MIN_MAX_CANDIDATES, MAX_MAX_CANDIDATES], scale for sensitive mode.
    pub fn resolved_max_candidates(&self, genome_size: u32) -> u32 {
        let requested = if self.max_candidates != 0 {
            self.max_candidates
        } else {
            genome_size / 1_000_000 + MIN_MAX_CANDIDATES
        };
        let factor = if self.sensitive { SENSITIVE_FACTOR } else { 1 };
        (requested * factor).clamp(MIN_MAX_CANDIDATES, MAX_MAX_CANDIDATES * factor)
    }

    /// Resolve the candidate cap against a loaded index; a cap larger than
    /// the index was built to support is a configuration error.
    pub fn check_against_index(&self, index: &MethylIndex) -> Result<u32> {
        let effective = self.resolved_max_candidates(index.genome_size());
        let built = index.seed_params().max_candidates;
        if effective > built {
            return Err(Error::Config(format!(
                "requesting {effective} max candidates but the index was built \
                 excluding {built} candidates"
            )));
        }
        Ok(effective)
    }
}

// Seed hashing and candidate-range refinement
//
// Seeds are one bit per base: the bit distinguishes the purine pair {A, G}
// from the pyrimidine pair {C, T}, which is exactly the distinction that
// survives bisulfite conversion in both directions (C→T stays within the
// pyrimidines, G→A within the purines). A k-bit key over the first
// `key_weight` bases selects a slot of the index; the refiner then narrows
// the slot by binary searching one additional bit per base, which the index
// guarantees to be sorted up to `n_sorting_positions`.

use crate::index::MethylIndex;

/// Refinement depth of the sensitive sliding pass. Must not exceed the
/// sorting depth the index was built with; checked at index load.
pub const N_SEED_POSITIONS: u32 = 40;

/// The sorting/seed bit of a 4-bit base mask: 1 for the pyrimidine group
/// {C, T}, 0 for the purine group {A, G}. Invariant under both conversions.
#[inline(always)]
pub fn seed_bit(base: u8) -> u32 {
    u32::from(base & 0b0101 == 0)
}

/// Build the k-bit seed key from the first `key_weight` encoded bases.
#[inline]
pub fn get_hash(encoded: &[u8], key_weight: u32) -> u32 {
    encoded[..key_weight as usize]
        .iter()
        .fold(0u32, |k, &b| (k << 1) | seed_bit(b))
}

/// Slide the seed window one base: shift in the bit of the next base and
/// drop the oldest one.
#[inline]
pub fn shift_hash(key: u32, next_base: u8, key_weight: u32) -> u32 {
    ((key << 1) | seed_bit(next_base)) & ((1 << key_weight) - 1)
}

/// Narrow `[lo, hi)` within the index position array so that every surviving
/// candidate agrees with the read in the seed bit at positions
/// `key_weight..min(read_lim, depth)` past the seed start. Relies on the
/// positions within a key slot being sorted by exactly this bit string.
pub fn refine_candidates(
    encoded: &[u8],
    idx: &MethylIndex,
    read_lim: u32,
    depth: u32,
    lo: &mut usize,
    hi: &mut usize,
) {
    let lim = read_lim.min(depth);
    let positions = idx.positions();
    for p in idx.seed_params().key_weight..lim {
        if lo == hi {
            return;
        }
        let first_one = *lo
            + positions[*lo..*hi].partition_point(|&cand| idx.base_bit(cand.wrapping_add(p)) == 0);
        if seed_bit(encoded[p as usize]) == 0 {
            *hi = first_one;
        } else {
            *lo = first_one;
        }
    }
}

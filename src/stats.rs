// Mapping statistics
//
// Counters accumulated while emitting each batch and written to the
// `.mapstats` file after mapping finishes. Paired-end runs count pairs and
// keep per-mate sub-blocks for the reads that fell back to single-end
// reporting.

use crate::sam::SeOutcome;

fn pct(a: u32, b: u32) -> f64 {
    100.0 * f64::from(a) / f64::from(b.max(1))
}

#[derive(Debug, Default, Clone)]
pub struct SeMapStats {
    pub tot_rds: u32,
    pub uniq_rds: u32,
    pub ambig_rds: u32,
    pub unmapped_rds: u32,
    pub skipped_rds: u32,
}

impl SeMapStats {
    pub fn update(&mut self, outcome: &SeOutcome) {
        self.tot_rds += 1;
        match outcome {
            SeOutcome::Unique(_) => self.uniq_rds += 1,
            SeOutcome::Ambig(_) => self.ambig_rds += 1,
            SeOutcome::Unmapped => self.unmapped_rds += 1,
            SeOutcome::Skipped => {
                self.unmapped_rds += 1;
                self.skipped_rds += 1;
            }
        }
    }

    pub fn to_string_indented(&self, n_tabs: usize) -> String {
        let t = "    ".repeat(n_tabs);
        let tt = format!("{t}    ");
        let mapped = self.uniq_rds + self.ambig_rds;
        format!(
            "{t}total_reads: {}\n\
             {t}mapped:\n\
             {tt}percent_mapped: {:.4}\n\
             {tt}unique: {}\n\
             {tt}percent_unique: {:.4}\n\
             {tt}ambiguous: {}\n\
             {t}unmapped: {}\n\
             {t}skipped: {}\n",
            self.tot_rds,
            pct(mapped, self.tot_rds),
            self.uniq_rds,
            pct(self.uniq_rds, self.tot_rds),
            self.ambig_rds,
            self.unmapped_rds,
            self.skipped_rds,
        )
    }
}

impl std::fmt::Display for SeMapStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_indented(0))
    }
}

/// How a paired fragment was classified after mating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairClass {
    Unique,
    Ambig,
    Unmapped,
}

#[derive(Debug, Default, Clone)]
pub struct PeMapStats {
    pub tot_pairs: u32,
    pub uniq_pairs: u32,
    pub ambig_pairs: u32,
    pub unmapped_pairs: u32,
    pub end1_stats: SeMapStats,
    pub end2_stats: SeMapStats,
}

impl PeMapStats {
    pub fn update_pair(&mut self, class: PairClass) {
        self.tot_pairs += 1;
        match class {
            PairClass::Unique => self.uniq_pairs += 1,
            PairClass::Ambig => self.ambig_pairs += 1,
            PairClass::Unmapped => self.unmapped_pairs += 1,
        }
    }
}

impl std::fmt::Display for PeMapStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let t = "    ";
        let mapped = self.uniq_pairs + self.ambig_pairs;
        write!(
            f,
            "pairs:\n\
             {t}total_read_pairs: {}\n\
             {t}mapped:\n\
             {t}{t}percent_mapped: {:.4}\n\
             {t}{t}unique: {}\n\
             {t}{t}percent_unique: {:.4}\n\
             {t}{t}ambiguous: {}\n\
             {t}unmapped: {}\n\
             mate1:\n{}\
             mate2:\n{}",
            self.tot_pairs,
            pct(mapped, self.tot_pairs),
            self.uniq_pairs,
            pct(self.uniq_pairs, self.tot_pairs),
            self.ambig_pairs,
            self.unmapped_pairs,
            self.end1_stats.to_string_indented(1),
            self.end2_stats.to_string_indented(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn se_counts_and_percentages() {
        let mut stats = SeMapStats::default();
        stats.update(&SeOutcome::Unique("rec".to_string()));
        stats.update(&SeOutcome::Unique("rec".to_string()));
        stats.update(&SeOutcome::Ambig(None));
        stats.update(&SeOutcome::Unmapped);
        stats.update(&SeOutcome::Skipped);

        assert_eq!(stats.tot_rds, 5);
        assert_eq!(stats.uniq_rds, 2);
        assert_eq!(stats.ambig_rds, 1);
        assert_eq!(stats.unmapped_rds, 2);
        assert_eq!(stats.skipped_rds, 1);

        let rendered = stats.to_string();
        assert!(rendered.contains("total_reads: 5"));
        assert!(rendered.contains("unique: 2"));
        assert!(rendered.contains("percent_unique: 40.0000"));
    }

    #[test]
    fn pe_block_nests_mate_stats() {
        let mut stats = PeMapStats::default();
        stats.update_pair(PairClass::Unique);
        stats.update_pair(PairClass::Unmapped);
        stats.end1_stats.update(&SeOutcome::Unmapped);
        stats.end2_stats.update(&SeOutcome::Unique("rec".to_string()));

        let rendered = stats.to_string();
        assert!(rendered.starts_with("pairs:"));
        assert!(rendered.contains("total_read_pairs: 2"));
        assert!(rendered.contains("mate1:"));
        assert!(rendered.contains("mate2:"));
    }

    #[test]
    fn empty_stats_do_not_divide_by_zero() {
        let rendered = SeMapStats::default().to_string();
        assert!(rendered.contains("percent_mapped: 0.0000"));
    }
}

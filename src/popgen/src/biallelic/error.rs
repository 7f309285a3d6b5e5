use thiserror::Error;

#[derive(Error, Debug)]
pub enum BiallelicDataError {
    #[error("Pattern {pattern_index} has population {population} red-allele count {red} exceeding total allele count {total}")]
    RedExceedsTotal { pattern_index: usize, population: usize, red: u32, total: u32 },

    #[error("Pattern {pattern_index} has {actual} populations; expected {expected}")]
    PopulationCountMismatch { pattern_index: usize, expected: usize, actual: usize },

    #[error("Pattern has more than two distinct allele states (triallelic site)")]
    TriallelicSite,

    #[error("Cannot fold dominant-marker data: allele polarity is not arbitrary for dominant markers")]
    FoldingDominantData,

    #[error("Locus boundary index {0} is out of range for {1} patterns")]
    InvalidLocusBoundary(usize, usize),
}

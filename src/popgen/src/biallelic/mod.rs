//! Pattern-weighted store of biallelic-marker site columns: for every
//! distinct observed `(red-allele-count, total-allele-count)` column across
//! populations, a single [`Pattern`] plus the number of sites sharing it.

mod error;
pub use error::BiallelicDataError;

use ahash::AHashMap;

/// One distinct column of biallelic data: for each population, the count of
/// "red" (derived) alleles sampled and the total allele count sampled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    pub red: Vec<u32>,
    pub total: Vec<u32>,
}

impl Pattern {
    pub fn n_populations(&self) -> usize {
        self.total.len()
    }

    /// A population with zero sampled alleles at this site.
    pub fn has_missing_population(&self) -> bool {
        self.total.iter().any(|&a| a == 0)
    }

    /// True when every sampled allele across every population is identical
    /// (all-red or all-ancestral); such a pattern carries no information
    /// about allele-frequency differences between populations.
    pub fn is_constant(&self) -> bool {
        let all_red = self.red.iter().zip(self.total.iter()).all(|(&r, &a)| r == a);
        let all_ancestral = self.red.iter().all(|&r| r == 0);
        all_red || all_ancestral
    }

    /// Complement each population's red count against its total — the
    /// "other" polarity of an arbitrarily-labeled biallelic site.
    pub fn complement(&self) -> Pattern {
        Pattern {
            red: self.red.iter().zip(self.total.iter()).map(|(&r, &a)| a - r).collect(),
            total: self.total.clone(),
        }
    }

    /// Canonical "folded" form: whichever of `self`/`self.complement()` sorts
    /// first, used so that two allele-polarity-ambiguous observations of the
    /// same underlying site collide into one pattern.
    fn folded_form(&self) -> Pattern {
        let complement = self.complement();
        if complement.red < self.red {
            complement
        } else {
            self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct BiallelicData {
    n_populations: usize,
    patterns: Vec<Pattern>,
    weights: Vec<f64>,
    dominant: bool,
    folded: bool,
    locus_end_indices: Option<Vec<usize>>,
}

impl BiallelicData {
    pub fn new(n_populations: usize, dominant: bool) -> Self {
        Self {
            n_populations,
            patterns: Vec::new(),
            weights: Vec::new(),
            dominant,
            folded: false,
            locus_end_indices: None,
        }
    }

    pub fn n_populations(&self) -> usize {
        self.n_populations
    }

    pub fn n_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_dominant(&self) -> bool {
        self.dominant
    }

    pub fn is_folded(&self) -> bool {
        self.folded
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn pattern_weight(&self, i: usize) -> f64 {
        self.weights[i]
    }

    pub fn total_site_count(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn locus_end_indices(&self) -> Option<&[usize]> {
        self.locus_end_indices.as_deref()
    }

    pub fn set_locus_end_indices(&mut self, ends: Vec<usize>) -> Result<(), BiallelicDataError> {
        for &e in &ends {
            if e == 0 || e > self.patterns.len() {
                return Err(BiallelicDataError::InvalidLocusBoundary(e, self.patterns.len()));
            }
        }
        self.locus_end_indices = Some(ends);
        Ok(())
    }

    /// Add one observed site, merging its weight into an existing identical
    /// pattern if present, else appending a new one with weight 1.
    pub fn add_site(&mut self, pattern: Pattern) -> Result<(), BiallelicDataError> {
        self.validate_pattern(&pattern, self.patterns.len())?;
        match self.patterns.iter().position(|p| p == &pattern) {
            Some(i) => self.weights[i] += 1.0,
            None => {
                self.patterns.push(pattern);
                self.weights.push(1.0);
            }
        }
        Ok(())
    }

    /// Bulk-append a pattern with an explicit weight (used when loading
    /// already-aggregated Nexus/charset data).
    pub fn add_weighted_pattern(
        &mut self,
        pattern: Pattern,
        weight: f64,
    ) -> Result<(), BiallelicDataError> {
        self.validate_pattern(&pattern, self.patterns.len())?;
        self.patterns.push(pattern);
        self.weights.push(weight);
        Ok(())
    }

    fn validate_pattern(&self, pattern: &Pattern, index: usize) -> Result<(), BiallelicDataError> {
        if pattern.n_populations() != self.n_populations {
            return Err(BiallelicDataError::PopulationCountMismatch {
                pattern_index: index,
                expected: self.n_populations,
                actual: pattern.n_populations(),
            });
        }
        for (pop, (&r, &a)) in pattern.red.iter().zip(pattern.total.iter()).enumerate() {
            if r > a {
                return Err(BiallelicDataError::RedExceedsTotal {
                    pattern_index: index,
                    population: pop,
                    red: r,
                    total: a,
                });
            }
        }
        Ok(())
    }

    /// Map every pattern to its canonical lower-reds-count form, summing the
    /// weights of any collisions. Forbidden for dominant-marker data, where
    /// the two alleles are not interchangeable.
    pub fn fold(&mut self) -> Result<(), BiallelicDataError> {
        if self.dominant {
            return Err(BiallelicDataError::FoldingDominantData);
        }
        if self.folded {
            return Ok(());
        }
        let mut folded: AHashMap<Pattern, f64> = AHashMap::new();
        for (pattern, weight) in self.patterns.iter().zip(self.weights.iter()) {
            let canonical = pattern.folded_form();
            *folded.entry(canonical).or_insert(0.0) += weight;
        }
        let mut patterns = Vec::with_capacity(folded.len());
        let mut weights = Vec::with_capacity(folded.len());
        for (pattern, weight) in folded {
            patterns.push(pattern);
            weights.push(weight);
        }
        self.patterns = patterns;
        self.weights = weights;
        self.folded = true;
        // Folding invalidates any locus-boundary bookkeeping tied to the
        // original per-site ordering.
        self.locus_end_indices = None;
        Ok(())
    }

    pub fn constant_site_patterns(&self) -> impl Iterator<Item = (&Pattern, f64)> {
        self.patterns
            .iter()
            .zip(self.weights.iter())
            .filter(|(p, _)| p.is_constant())
            .map(|(p, w)| (p, *w))
    }

    pub fn variable_site_patterns(&self) -> impl Iterator<Item = (&Pattern, f64)> {
        self.patterns
            .iter()
            .zip(self.weights.iter())
            .filter(|(p, _)| !p.is_constant())
            .map(|(p, w)| (p, *w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(red: &[u32], total: &[u32]) -> Pattern {
        Pattern { red: red.to_vec(), total: total.to_vec() }
    }

    #[test]
    fn red_exceeding_total_is_rejected() {
        let mut data = BiallelicData::new(2, false);
        assert!(data.add_site(pat(&[3, 0], &[2, 2])).is_err());
    }

    #[test]
    fn identical_sites_merge_weight() {
        let mut data = BiallelicData::new(2, false);
        data.add_site(pat(&[1, 0], &[2, 2])).unwrap();
        data.add_site(pat(&[1, 0], &[2, 2])).unwrap();
        assert_eq!(data.n_patterns(), 1);
        assert_eq!(data.pattern_weight(0), 2.0);
    }

    #[test]
    fn constant_site_detection() {
        assert!(pat(&[0, 0], &[2, 2]).is_constant());
        assert!(pat(&[2, 2], &[2, 2]).is_constant());
        assert!(!pat(&[1, 0], &[2, 2]).is_constant());
    }

    #[test]
    fn missing_population_detection() {
        assert!(pat(&[0, 1], &[0, 2]).has_missing_population());
        assert!(!pat(&[1, 1], &[2, 2]).has_missing_population());
    }

    #[test]
    fn folding_merges_complementary_patterns_and_is_forbidden_for_dominant_data() {
        let mut data = BiallelicData::new(2, false);
        data.add_site(pat(&[1, 0], &[2, 2])).unwrap();
        data.add_site(pat(&[1, 2], &[2, 2])).unwrap(); // complement of the above
        data.fold().unwrap();
        assert_eq!(data.n_patterns(), 1);
        assert_eq!(data.pattern_weight(0), 2.0);

        let mut dominant = BiallelicData::new(2, true);
        dominant.add_site(pat(&[1, 0], &[2, 2])).unwrap();
        assert!(dominant.fold().is_err());
    }
}

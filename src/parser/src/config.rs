//! YAML configuration model (`serde_yaml`-backed, following the teacher's
//! `Cli::serialize`/`deserialize` round-trip convention) describing a full
//! analysis: which character matrices to load, the starting tree, the MCMC
//! schedule, and where results go.

use std::path::PathBuf;

use popgen::Distribution;
use serde::{Deserialize, Serialize};

use crate::ParserError;

/// A prior distribution as written in YAML, e.g. `{gamma: {shape: 2, scale: 0.5}}`.
/// Kept separate from [`popgen::Distribution`] so malformed parameters surface
/// as a [`ParserError`] rather than a silent `panic!` during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorSpec {
    Uniform { min: f64, max: f64 },
    Beta { alpha: f64, beta: f64 },
    Gamma { shape: f64, scale: f64 },
    OffsetGamma { shape: f64, scale: f64, offset: f64 },
    Exponential { rate: f64 },
    OffsetExponential { rate: f64, offset: f64 },
    Dirichlet { alphas: Vec<f64> },
}

impl PriorSpec {
    pub fn to_distribution(&self) -> Result<Distribution, ParserError> {
        let invalid = |reason: String| ParserError::InvalidSetting { setting: "prior", reason };
        match self {
            Self::Uniform { min, max } => Distribution::uniform(*min, *max),
            Self::Beta { alpha, beta } => Distribution::beta(*alpha, *beta),
            Self::Gamma { shape, scale } => Distribution::gamma(*shape, *scale),
            Self::OffsetGamma { shape, scale, offset } => {
                Distribution::offset_gamma(*shape, *scale, *offset)
            }
            Self::Exponential { rate } => Distribution::exponential(*rate),
            Self::OffsetExponential { rate, offset } => {
                Distribution::offset_exponential(*rate, *offset)
            }
            Self::Dirichlet { alphas } => Distribution::dirichlet(alphas.clone()),
        }
        .map_err(|e| invalid(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Path to a Nexus-formatted biallelic character matrix.
    pub path: PathBuf,
    /// Delimiter used to split taxon labels into population labels, e.g. `"_"`.
    #[serde(default)]
    pub population_label_delimiter: Option<String>,
    /// When `true`, the population label is the suffix after the last
    /// delimiter occurrence rather than the prefix before the first.
    #[serde(default)]
    pub population_label_is_suffix: bool,
    /// `true` for diploid genotype matrices, `false` for haploid/pooled counts.
    #[serde(default = "default_true")]
    pub genotypes_are_diploid: bool,
    /// `true` for dominant (AFLP-style) markers, where allele polarity cannot
    /// be folded.
    #[serde(default)]
    pub markers_are_dominant: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Starting newick string, or a path to a file containing one. When
    /// absent a random starting tree is drawn.
    #[serde(default)]
    pub starting_tree: Option<String>,
    #[serde(default)]
    pub fix_root_height: bool,
    /// Beta(alpha, beta) hyperprior placed on each non-root relative node
    /// age fraction.
    #[serde(default = "default_relative_height_prior")]
    pub relative_height_prior: PriorSpec,
    pub root_height_prior: PriorSpec,
}

fn default_relative_height_prior() -> PriorSpec {
    PriorSpec::Beta { alpha: 1.0, beta: 1.0 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McmcConfig {
    pub generations: u64,
    #[serde(default = "default_sample_frequency")]
    pub sample_frequency: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_true")]
    pub use_dpp: bool,
    #[serde(default = "default_concentration_prior")]
    pub concentration_prior: PriorSpec,
}

fn default_sample_frequency() -> u64 {
    100
}

fn default_threads() -> usize {
    1
}

fn default_concentration_prior() -> PriorSpec {
    PriorSpec::Gamma { shape: 1.0, scale: 1.0 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub prefix: PathBuf,
    #[serde(default)]
    pub overwrite: bool,
    #[serde(default = "default_newick_precision")]
    pub newick_precision: usize,
}

fn default_newick_precision() -> usize {
    12
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub comparisons: Vec<ComparisonConfig>,
    pub tree: TreeConfig,
    pub mcmc: McmcConfig,
    pub output: OutputConfig,
}

impl Config {
    pub fn from_yaml(path: &std::path::Path) -> Result<Self, ParserError> {
        let file = std::fs::File::open(path)
            .map_err(|_| ParserError::MissingFileEntity(path.to_path_buf()))?;
        let config: Self = serde_yaml::from_reader(file)
            .map_err(|source| ParserError::InvalidYaml { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ParserError> {
        if self.comparisons.is_empty() {
            return Err(ParserError::EmptyComparisons);
        }
        if self.mcmc.generations % self.mcmc.sample_frequency != 0 {
            return Err(ParserError::IncompatibleSampleFrequency);
        }
        if !self.output.overwrite && self.output_state_log_path().exists() {
            return Err(ParserError::CannotOverwrite { path: self.output_state_log_path() });
        }
        Ok(())
    }

    pub fn output_state_log_path(&self) -> PathBuf {
        let mut path = self.output.prefix.clone();
        path.set_extension("log");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
comparisons:
  - path: data/hemi129.nex
    population_label_delimiter: "_"
tree:
  root_height_prior:
    exponential:
      rate: 100.0
mcmc:
  generations: 1000
  sample_frequency: 100
output:
  prefix: results/run1
"#
    }

    #[test]
    fn deserializes_minimal_config() {
        let config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        assert_eq!(config.comparisons.len(), 1);
        assert!(config.mcmc.use_dpp);
        assert_eq!(config.mcmc.threads, 1);
        assert_eq!(config.output.newick_precision, 12);
    }

    #[test]
    fn rejects_incompatible_sample_frequency() {
        let mut config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        config.mcmc.sample_frequency = 300;
        assert!(matches!(config.validate(), Err(ParserError::IncompatibleSampleFrequency)));
    }

    #[test]
    fn rejects_empty_comparisons() {
        let mut config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        config.comparisons.clear();
        assert!(matches!(config.validate(), Err(ParserError::EmptyComparisons)));
    }

    #[test]
    fn prior_spec_rejects_invalid_parameters() {
        let bad = PriorSpec::Gamma { shape: -1.0, scale: 1.0 };
        assert!(bad.to_distribution().is_err());
    }
}

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("{0} does not exist")]
    MissingFileEntity(PathBuf),

    #[error("{path:?} already exists. Use --overwrite to force.")]
    CannotOverwrite { path: PathBuf },

    #[error("Failed to parse configuration file {path:?}: [{source}]")]
    InvalidYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("comparisons: list must not be empty")]
    EmptyComparisons,

    #[error("mcmc.sample_frequency must divide mcmc.generations evenly")]
    IncompatibleSampleFrequency,

    #[error("invalid setting for {setting}: {reason}")]
    InvalidSetting { setting: &'static str, reason: String },
}

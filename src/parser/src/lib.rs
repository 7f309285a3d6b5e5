use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

mod config;
mod error;
pub use config::{ComparisonConfig, Config, McmcConfig, OutputConfig, PriorSpec, TreeConfig};
pub use error::ParserError;

#[derive(Parser, Debug)]
#[clap(name = "ecoevolity", author, version, about, long_about = None)]
#[clap(propagate_version = true)]
/// Bayesian estimation of shared evolutionary divergence times from biallelic data.
pub struct Cli {
    /// Set the verbosity level (-v -vv -vvv)
    ///
    /// -v: Info | -vv: Debug | -vvv: Trace {n}
    ///
    /// The program still emits warnings by default. Use --quiet/-q to
    /// disable them.
    #[clap(short = 'v', long, parse(from_occurrences), global = true)]
    pub verbose: u8,

    /// Disable warnings. Only errors will be displayed.
    #[clap(short = 'q', long, global = true)]
    pub quiet: bool,

    #[clap(subcommand)]
    pub commands: Commands,
}

impl Cli {
    pub fn log_verbosity(&self) -> u8 {
        self.verbose + u8::from(!self.quiet)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the MCMC chain described by a YAML configuration file.
    Run {
        config: PathBuf,
        /// Overwrite existing output files, ignoring `output.overwrite` in the config.
        #[clap(long)]
        overwrite: bool,
    },
    /// Simulate gene trees and biallelic character matrices from a
    /// configuration file's tree and population parameters, without running
    /// inference.
    SimulateData {
        config: PathBuf,
        /// Number of independent datasets to simulate.
        #[clap(short, long, default_value("1"))]
        n_replicates: u32,
        #[clap(long)]
        overwrite: bool,
    },
    /// Summarize a previously written state log: effective sample size,
    /// potential scale reduction factor, and highest posterior density
    /// intervals per column.
    Summarize {
        log: PathBuf,
        /// Fraction of the chain to discard as burn-in.
        #[clap(short, long, default_value("0.1"))]
        burnin: f64,
        /// Probability mass of the reported HPD interval.
        #[clap(long, default_value("0.95"))]
        hpd_mass: f64,
    },
}

/// Subset of [`Config`] echoed back to the user / serialized alongside
/// results, mirroring the teacher's `Cli::serialize` convention of writing
/// out the exact settings a run used.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub config_path: PathBuf,
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from(["ecoevolity", "-vv", "run", "config.yml"]);
        assert_eq!(cli.verbose, 2);
        match cli.commands {
            Commands::Run { config, overwrite } => {
                assert_eq!(config, PathBuf::from("config.yml"));
                assert!(!overwrite);
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }
    }

    #[test]
    fn log_verbosity_adds_implicit_warn_level() {
        let cli = Cli::parse_from(["ecoevolity", "run", "config.yml"]);
        assert_eq!(cli.log_verbosity(), 1);
        let cli = Cli::parse_from(["ecoevolity", "-q", "run", "config.yml"]);
        assert_eq!(cli.log_verbosity(), 0);
    }
}

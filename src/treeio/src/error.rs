use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TreeIoError {
    #[error("{0} does not exist")]
    MissingFile(PathBuf),

    #[error("'{path}' already exists. Use --overwrite to force")]
    OverwriteDisallowed { path: PathBuf },

    #[error("malformed newick string at byte {pos}: {reason}")]
    Newick { pos: usize, reason: String },

    #[error("malformed Nexus file {path:?}: {reason}")]
    Nexus { path: PathBuf, reason: String },

    #[error("taxon label {label:?} does not contain delimiter {delimiter:?}; cannot infer population")]
    UnresolvedPopulationLabel { label: String, delimiter: String },

    #[error("character matrix declares {declared} characters but row for {taxon:?} has {actual}")]
    RowLengthMismatch { taxon: String, declared: usize, actual: usize },

    #[error("unrecognized state symbol {symbol:?} for taxon {taxon:?} at site {site}")]
    UnknownStateSymbol { taxon: String, site: usize, symbol: char },

    #[error(transparent)]
    Biallelic(#[from] popgen::biallelic::BiallelicDataError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

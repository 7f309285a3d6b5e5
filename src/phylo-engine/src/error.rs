use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhyloError {
    #[error("tree is not ultrametric: leaf {label:?} is at depth {depth}, expected {expected}")]
    NotUltrametric { label: String, depth: f64, expected: f64 },

    #[error("height index {0} is out of range")]
    InvalidHeightIndex(usize),

    #[error("node {0:?} has no height index")]
    MissingHeightIndex(String),

    #[error("malformed topology: {0}")]
    InvalidTopology(String),

    #[error("a leaf label in the tree has no matching population comparison: {0:?}")]
    UnknownLeafLabel(String),

    #[error(transparent)]
    TreeIo(#[from] treeio::TreeIoError),

    #[error(transparent)]
    Biallelic(#[from] popgen::biallelic::BiallelicDataError),

    #[error(transparent)]
    Distribution(#[from] popgen::distributions::DistributionError),
}

//! File I/O for the tree/data side of an analysis: extended-newick tree
//! strings ([`newick`]), Nexus-like biallelic character matrices
//! ([`nexus`]), and the tab-delimited MCMC state log ([`statelog`]).

mod error;
pub use error::TreeIoError;

pub mod newick;
pub mod nexus;
pub mod statelog;

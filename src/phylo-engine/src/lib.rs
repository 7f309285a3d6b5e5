//! The shared-divergence-time Bayesian inference engine: ultrametric
//! population trees, a biallelic-marker likelihood, and the MCMC operators
//! (including a Dirichlet-process Gibbs move) that let independent
//! population-pair comparisons cluster onto common divergence events.

pub mod chain;
pub mod comparisons;
pub mod error;
pub mod node;
pub mod operators;
pub mod population_tree;
pub mod tree;

pub use chain::Chain;
pub use comparisons::ComparisonSet;
pub use error::PhyloError;
pub use node::{Node, NodeId};
pub use population_tree::PopulationTree;
pub use tree::{BaseTree, CollisionPolicy};

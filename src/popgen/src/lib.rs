//! Leaf-level domain types shared by the tree and likelihood engine:
//! [`split::Split`] clade bitsets, [`parameter::Parameter`] with its prior
//! [`distributions::Distribution`], [`stats`] MCMC diagnostics, the
//! [`random::RandomSource`] PRNG wrapper, and pattern-weighted
//! [`biallelic::BiallelicData`].

pub mod biallelic;
pub mod distributions;
pub mod parameter;
pub mod random;
pub mod split;
pub mod stats;

pub use biallelic::{BiallelicData, Pattern};
pub use distributions::Distribution;
pub use parameter::Parameter;
pub use random::RandomSource;
pub use split::Split;

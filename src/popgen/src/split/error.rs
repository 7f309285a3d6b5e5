use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplitError {
    #[error("Splits have mismatched widths: {lhs} leaves vs {rhs} leaves")]
    WidthMismatch { lhs: usize, rhs: usize },

    #[error("Cannot compute the parent of an empty set of splits")]
    EmptySiblingSet,

    #[error("Splits are not pairwise disjoint and non-empty; they cannot be siblings")]
    NotSiblings,
}

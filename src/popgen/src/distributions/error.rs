use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("{0} is an improper distribution and has no well-defined {1}")]
    Improper(&'static str, &'static str),

    #[error("Invalid distribution parameters: {0}")]
    InvalidParameters(String),

    #[error("Value {0} is outside of the support of this distribution")]
    OutOfSupport(f64),
}

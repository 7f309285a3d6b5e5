//! Prior distributions placeable on a [`crate::parameter::Parameter`].
//!
//! Every variant exposes `ln_pdf`, `relative_ln_pdf` (the same density with
//! any additive normalization constant that doesn't depend on `x` dropped —
//! safe inside a Metropolis-Hastings ratio, where normalization constants
//! cancel), `draw`, `mean`, and `variance`. The two "improper" variants are
//! valid priors (their density need never be evaluated if the parameter
//! they're attached to stays fixed, or if only `relative_ln_pdf` over a
//! ratio of two proposals is used) but error out on every other query.

mod error;
pub use error::DistributionError;

use crate::random::RandomSource;
use statrs::function::beta::ln_beta;
use statrs::function::gamma::ln_gamma;

#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Uniform { min: f64, max: f64 },
    ImproperUniform,
    ImproperPositiveUniform,
    Beta { alpha: f64, beta: f64 },
    Gamma { shape: f64, scale: f64 },
    OffsetGamma { shape: f64, scale: f64, offset: f64 },
    Exponential { rate: f64 },
    OffsetExponential { rate: f64, offset: f64 },
    Dirichlet { alphas: Vec<f64> },
}

impl Distribution {
    pub fn uniform(min: f64, max: f64) -> Result<Self, DistributionError> {
        if !(min < max) {
            return Err(DistributionError::InvalidParameters(format!(
                "Uniform requires min < max, got min={min}, max={max}"
            )));
        }
        Ok(Self::Uniform { min, max })
    }

    pub fn beta(alpha: f64, beta: f64) -> Result<Self, DistributionError> {
        Self::require_positive("Beta alpha", alpha)?;
        Self::require_positive("Beta beta", beta)?;
        Ok(Self::Beta { alpha, beta })
    }

    pub fn gamma(shape: f64, scale: f64) -> Result<Self, DistributionError> {
        Self::require_positive("Gamma shape", shape)?;
        Self::require_positive("Gamma scale", scale)?;
        Ok(Self::Gamma { shape, scale })
    }

    pub fn offset_gamma(shape: f64, scale: f64, offset: f64) -> Result<Self, DistributionError> {
        Self::require_positive("OffsetGamma shape", shape)?;
        Self::require_positive("OffsetGamma scale", scale)?;
        Ok(Self::OffsetGamma { shape, scale, offset })
    }

    pub fn exponential(rate: f64) -> Result<Self, DistributionError> {
        Self::require_positive("Exponential rate", rate)?;
        Ok(Self::Exponential { rate })
    }

    pub fn offset_exponential(rate: f64, offset: f64) -> Result<Self, DistributionError> {
        Self::require_positive("OffsetExponential rate", rate)?;
        Ok(Self::OffsetExponential { rate, offset })
    }

    pub fn dirichlet(alphas: Vec<f64>) -> Result<Self, DistributionError> {
        if alphas.len() < 2 || alphas.iter().any(|a| *a <= 0.0) {
            return Err(DistributionError::InvalidParameters(
                "Dirichlet needs at least 2 positive concentration parameters".into(),
            ));
        }
        Ok(Self::Dirichlet { alphas })
    }

    fn require_positive(name: &'static str, v: f64) -> Result<(), DistributionError> {
        if v > 0.0 {
            Ok(())
        } else {
            Err(DistributionError::InvalidParameters(format!("{name} must be > 0, got {v}")))
        }
    }

    pub fn is_improper(&self) -> bool {
        matches!(self, Self::ImproperUniform | Self::ImproperPositiveUniform)
    }

    pub fn ln_pdf(&self, x: f64) -> Result<f64, DistributionError> {
        match self {
            Self::Uniform { min, max } => {
                if x < *min || x > *max {
                    return Ok(f64::NEG_INFINITY);
                }
                Ok(-(max - min).ln())
            }
            Self::ImproperUniform => Err(DistributionError::Improper("ImproperUniform", "pdf")),
            Self::ImproperPositiveUniform => {
                Err(DistributionError::Improper("ImproperPositiveUniform", "pdf"))
            }
            Self::Beta { alpha, beta } => {
                if !(0.0..=1.0).contains(&x) {
                    return Ok(f64::NEG_INFINITY);
                }
                if (x == 0.0 && *alpha < 1.0) || (x == 1.0 && *beta < 1.0) {
                    return Ok(f64::INFINITY);
                }
                if (x == 0.0 && *alpha == 1.0) || (x == 1.0 && *beta == 1.0) {
                    return Ok(-ln_beta(*alpha, *beta));
                }
                if x == 0.0 || x == 1.0 {
                    return Ok(f64::NEG_INFINITY);
                }
                Ok((alpha - 1.0) * x.ln() + (beta - 1.0) * (1.0 - x).ln() - ln_beta(*alpha, *beta))
            }
            Self::Gamma { shape, scale } => Ok(gamma_ln_pdf(x, *shape, *scale)),
            Self::OffsetGamma { shape, scale, offset } => {
                if x < *offset {
                    return Ok(f64::NEG_INFINITY);
                }
                Ok(gamma_ln_pdf(x - offset, *shape, *scale))
            }
            Self::Exponential { rate } => Ok(exponential_ln_pdf(x, *rate)),
            Self::OffsetExponential { rate, offset } => {
                if x < *offset {
                    return Ok(f64::NEG_INFINITY);
                }
                Ok(exponential_ln_pdf(x - offset, *rate))
            }
            Self::Dirichlet { alphas } => dirichlet_ln_pdf(x_as_simplex(x), alphas),
        }
    }

    /// Same density, with any term that doesn't depend on `x` dropped. Safe
    /// inside a Hastings ratio (the constants cancel between numerator and
    /// denominator) but never safe to treat as a true log-density.
    pub fn relative_ln_pdf(&self, x: f64) -> Result<f64, DistributionError> {
        match self {
            Self::Beta { alpha, beta } => {
                if !(0.0..=1.0).contains(&x) {
                    return Ok(f64::NEG_INFINITY);
                }
                Ok((alpha - 1.0) * x.ln() + (beta - 1.0) * (1.0 - x).ln())
            }
            Self::Gamma { shape, scale } => Ok((shape - 1.0) * x.ln() - x / scale),
            Self::OffsetGamma { shape, scale, offset } => {
                if x < *offset {
                    return Ok(f64::NEG_INFINITY);
                }
                let y = x - offset;
                Ok((shape - 1.0) * y.ln() - y / scale)
            }
            Self::Exponential { rate } => Ok(-rate * x),
            Self::OffsetExponential { rate, offset } => {
                if x < *offset {
                    return Ok(f64::NEG_INFINITY);
                }
                Ok(-rate * (x - offset))
            }
            _ => self.ln_pdf(x),
        }
    }

    pub fn draw(&self, rng: &mut RandomSource) -> Result<f64, DistributionError> {
        match self {
            Self::Uniform { min, max } => Ok(rng.uniform_real(*min, *max)),
            Self::ImproperUniform => Err(DistributionError::Improper("ImproperUniform", "draw")),
            Self::ImproperPositiveUniform => {
                Err(DistributionError::Improper("ImproperPositiveUniform", "draw"))
            }
            Self::Beta { alpha, beta } => Ok(rng.beta(*alpha, *beta)),
            Self::Gamma { shape, scale } => Ok(rng.gamma(*shape, *scale)),
            Self::OffsetGamma { shape, scale, offset } => Ok(offset + rng.gamma(*shape, *scale)),
            Self::Exponential { rate } => Ok(-rng.uniform_unit().ln() / rate),
            Self::OffsetExponential { rate, offset } => Ok(offset - rng.uniform_unit().ln() / rate),
            Self::Dirichlet { alphas } => {
                // Caller wants a scalar; expose the first simplex component
                // for the single-parameter Parameter API. Multi-dimensional
                // draws go through `draw_vector`.
                Ok(rng.dirichlet(alphas)[0])
            }
        }
    }

    pub fn draw_vector(&self, rng: &mut RandomSource) -> Result<Vec<f64>, DistributionError> {
        match self {
            Self::Dirichlet { alphas } => Ok(rng.dirichlet(alphas)),
            _ => Ok(vec![self.draw(rng)?]),
        }
    }

    pub fn mean(&self) -> Result<f64, DistributionError> {
        match self {
            Self::Uniform { min, max } => Ok((min + max) / 2.0),
            Self::ImproperUniform => Err(DistributionError::Improper("ImproperUniform", "mean")),
            Self::ImproperPositiveUniform => {
                Err(DistributionError::Improper("ImproperPositiveUniform", "mean"))
            }
            Self::Beta { alpha, beta } => Ok(alpha / (alpha + beta)),
            Self::Gamma { shape, scale } => Ok(shape * scale),
            Self::OffsetGamma { shape, scale, offset } => Ok(offset + shape * scale),
            Self::Exponential { rate } => Ok(1.0 / rate),
            Self::OffsetExponential { rate, offset } => Ok(offset + 1.0 / rate),
            Self::Dirichlet { alphas } => {
                let total: f64 = alphas.iter().sum();
                Ok(alphas[0] / total)
            }
        }
    }

    pub fn variance(&self) -> Result<f64, DistributionError> {
        match self {
            Self::Uniform { min, max } => Ok((max - min).powi(2) / 12.0),
            Self::ImproperUniform => Err(DistributionError::Improper("ImproperUniform", "variance")),
            Self::ImproperPositiveUniform => {
                Err(DistributionError::Improper("ImproperPositiveUniform", "variance"))
            }
            Self::Beta { alpha, beta } => {
                let sum = alpha + beta;
                Ok(alpha * beta / (sum * sum * (sum + 1.0)))
            }
            Self::Gamma { shape, scale } => Ok(shape * scale * scale),
            Self::OffsetGamma { shape, scale, .. } => Ok(shape * scale * scale),
            Self::Exponential { rate } => Ok(1.0 / (rate * rate)),
            Self::OffsetExponential { rate, .. } => Ok(1.0 / (rate * rate)),
            Self::Dirichlet { alphas } => {
                let total: f64 = alphas.iter().sum();
                let a0 = alphas[0];
                Ok(a0 * (total - a0) / (total * total * (total + 1.0)))
            }
        }
    }
}

fn gamma_ln_pdf(x: f64, shape: f64, scale: f64) -> f64 {
    if x < 0.0 {
        return f64::NEG_INFINITY;
    }
    if x == 0.0 {
        return if shape < 1.0 {
            f64::INFINITY
        } else if shape == 1.0 {
            -scale.ln()
        } else {
            f64::NEG_INFINITY
        };
    }
    (shape - 1.0) * x.ln() - x / scale - ln_gamma(shape) - shape * scale.ln()
}

fn exponential_ln_pdf(x: f64, rate: f64) -> f64 {
    if x < 0.0 {
        f64::NEG_INFINITY
    } else {
        rate.ln() - rate * x
    }
}

/// The Dirichlet is the only multivariate distribution here; `ln_pdf(x)`
/// with a scalar `x` is interpreted as the density of the 2-simplex point
/// `(x, 1-x)`, which only makes sense for a 2-parameter Dirichlet. Calling
/// it on a higher-dimensional Dirichlet is a caller error reflected as
/// `OutOfSupport`.
fn x_as_simplex(x: f64) -> f64 {
    x
}

fn dirichlet_ln_pdf(x: f64, alphas: &[f64]) -> Result<f64, DistributionError> {
    if alphas.len() != 2 {
        return Err(DistributionError::InvalidParameters(
            "scalar ln_pdf only defined for a 2-component Dirichlet".into(),
        ));
    }
    if !(0.0..=1.0).contains(&x) {
        return Ok(f64::NEG_INFINITY);
    }
    if x == 0.0 || x == 1.0 {
        // Vertex of the simplex.
        return Ok(f64::NEG_INFINITY);
    }
    let ln_norm = alphas.iter().map(|a| ln_gamma(*a)).sum::<f64>()
        - ln_gamma(alphas.iter().sum());
    let ln_density = (alphas[0] - 1.0) * x.ln() + (alphas[1] - 1.0) * (1.0 - x).ln() - ln_norm;
    Ok(ln_density)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn improper_distributions_error_on_query() {
        let d = Distribution::ImproperUniform;
        assert!(d.ln_pdf(1.0).is_err());
        assert!(d.mean().is_err());
        assert!(d.variance().is_err());
        assert!(d.draw(&mut RandomSource::seeded(1)).is_err());
    }

    #[test]
    fn uniform_pdf_is_reciprocal_width() {
        let d = Distribution::uniform(0.0, 4.0).unwrap();
        assert!((d.ln_pdf(2.0).unwrap() - (-4.0f64.ln())).abs() < 1e-12);
        assert_eq!(d.ln_pdf(5.0).unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn gamma_mean_and_variance() {
        let d = Distribution::gamma(2.0, 3.0).unwrap();
        assert!((d.mean().unwrap() - 6.0).abs() < 1e-12);
        assert!((d.variance().unwrap() - 18.0).abs() < 1e-12);
    }

    #[test]
    fn offset_forms_shift_support() {
        let d = Distribution::offset_exponential(1.0, 2.0).unwrap();
        assert_eq!(d.ln_pdf(1.0).unwrap(), f64::NEG_INFINITY);
        assert!(d.ln_pdf(3.0).unwrap().is_finite());
    }

    #[test]
    fn dirichlet_pdf_is_negative_infinity_at_simplex_vertices() {
        let d = Distribution::dirichlet(vec![2.0, 3.0]).unwrap();
        assert_eq!(d.ln_pdf(0.0).unwrap(), f64::NEG_INFINITY);
        assert_eq!(d.ln_pdf(1.0).unwrap(), f64::NEG_INFINITY);
        assert!(d.ln_pdf(0.5).unwrap().is_finite());
    }

    #[test]
    fn dirichlet_draw_sums_to_one() {
        let mut rng = RandomSource::seeded(5);
        let d = Distribution::dirichlet(vec![1.0, 2.0, 3.0]).unwrap();
        let draw = d.draw_vector(&mut rng).unwrap();
        let sum: f64 = draw.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}

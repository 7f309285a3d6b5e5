//! MCMC operators: tagged variants rather than a class hierarchy, each
//! exposing a `propose` that mutates a [`ComparisonSet`] in place and
//! returns the log-Hastings ratio of the move. Callers are responsible for
//! `store`/`restore` around the proposal (see `chain.rs`); operators never
//! snapshot state themselves.

mod tuning;
pub use tuning::OperatorTuning;

use popgen::{Distribution, RandomSource};

use crate::comparisons::ComparisonSet;
use crate::node::NodeId;

/// Identifies which scalar parameter a [`Operator::Scaler`] or
/// [`Operator::WindowMover`] acts on.
#[derive(Debug, Clone, Copy)]
pub enum ScaleTarget {
    PopulationSize { comparison: usize, node: NodeId },
    MutationRateU { comparison: usize },
    MutationRateV { comparison: usize },
    AncestralFreq { comparison: usize },
    Concentration,
    EventHeight { event: usize },
}

fn read_target(set: &ComparisonSet, target: ScaleTarget) -> f64 {
    match target {
        ScaleTarget::PopulationSize { comparison, node } => {
            set.trees[comparison].population_size_value(node)
        }
        ScaleTarget::MutationRateU { comparison } => set.trees[comparison].mutation_rate_u.value(),
        ScaleTarget::MutationRateV { comparison } => set.trees[comparison].mutation_rate_v.value(),
        ScaleTarget::AncestralFreq { comparison } => set.trees[comparison].ancestral_freq_1.value(),
        ScaleTarget::Concentration => set.concentration.value(),
        ScaleTarget::EventHeight { event } => set.event_heights[event].value(),
    }
}

fn write_target(set: &mut ComparisonSet, target: ScaleTarget, value: f64) {
    match target {
        ScaleTarget::PopulationSize { comparison, node } => {
            set.trees[comparison].set_population_size(node, value)
        }
        ScaleTarget::MutationRateU { comparison } => set.trees[comparison].mutation_rate_u.set_value(value),
        ScaleTarget::MutationRateV { comparison } => set.trees[comparison].mutation_rate_v.set_value(value),
        ScaleTarget::AncestralFreq { comparison } => {
            set.trees[comparison].ancestral_freq_1.set_value(value)
        }
        ScaleTarget::Concentration => set.concentration.set_value(value),
        ScaleTarget::EventHeight { event } => {
            set.event_heights[event].set_value(value);
            set.sync_heights();
        }
    }
}

/// Multiply the target by `exp(scale * (u - 0.5))`, `u ~ Uniform(0,1)`.
/// Returns the log-Hastings ratio, which for this proposal is exactly the
/// log of the multiplier (the Jacobian of `x -> x*m` cancels the 1/m change
/// of proposal density in the reverse direction... leaving `ln(m)`).
pub fn propose_scaler(set: &mut ComparisonSet, target: ScaleTarget, tuning: &OperatorTuning, rng: &mut RandomSource) -> f64 {
    let old = read_target(set, target);
    let multiplier = (tuning.tuning_parameter() * (rng.uniform_unit() - 0.5)).exp();
    write_target(set, target, old * multiplier);
    multiplier.ln()
}

/// Add a draw from `Uniform(-window, window)`, reflecting into `[0, 1]`.
/// Used for the ancestral allele frequency. Symmetric: Hastings ratio is 1.
pub fn propose_window_mover(set: &mut ComparisonSet, comparison: usize, tuning: &OperatorTuning, rng: &mut RandomSource) -> f64 {
    let param = &mut set.trees[comparison].ancestral_freq_1;
    let mut proposal = param.value() + rng.uniform_real(-tuning.tuning_parameter(), tuning.tuning_parameter());
    while !(0.0..=1.0).contains(&proposal) {
        if proposal < 0.0 {
            proposal = -proposal;
        }
        if proposal > 1.0 {
            proposal = 2.0 - proposal;
        }
    }
    param.set_value(proposal);
    0.0
}

/// `ln Dirichlet(x; alpha)`, used by [`propose_relative_population_size_mixer`]
/// to evaluate the forward and reverse proposal densities.
fn ln_dirichlet_pdf(x: &[f64], alpha: &[f64]) -> f64 {
    use statrs::function::gamma::ln_gamma;
    let sum_alpha: f64 = alpha.iter().sum();
    let mut ln_pdf = ln_gamma(sum_alpha);
    for (&xi, &ai) in x.iter().zip(alpha.iter()) {
        ln_pdf -= ln_gamma(ai);
        ln_pdf += (ai - 1.0) * xi.ln();
    }
    ln_pdf
}

/// Dirichlet-style proportional remix of every population-size parameter
/// within one comparison, holding their sum fixed. Reparameterized in terms
/// of proportions `p_i = v_i / total`: the Jacobian of `v <-> p` at fixed
/// `total` is identical forward and reverse, so it cancels and the
/// log-Hastings ratio reduces to the ratio of the reverse and forward
/// Dirichlet proposal densities, `ln_dirichlet_pdf(old; reverse_alpha) -
/// ln_dirichlet_pdf(new; forward_alpha)`, evaluated with the concentration
/// recomputed around each side's own proportions (the proposal is centered
/// on the current state, so forward and reverse alphas differ).
pub fn propose_relative_population_size_mixer(
    set: &mut ComparisonSet,
    comparison: usize,
    tuning: &OperatorTuning,
    rng: &mut RandomSource,
) -> f64 {
    let tree = &mut set.trees[comparison];
    let keys = tree.population_size_keys();
    if keys.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = keys.iter().map(|&k| tree.population_size_value(k)).collect();
    let total: f64 = values.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let concentration = 1.0 / tuning.tuning_parameter().max(1e-6);

    let old_proportions: Vec<f64> = values.iter().map(|&v| v / total).collect();
    let forward_alpha: Vec<f64> = old_proportions.iter().map(|&p| p * concentration + 1.0).collect();
    let new_proportions = rng.dirichlet(&forward_alpha);
    let reverse_alpha: Vec<f64> = new_proportions.iter().map(|&p| p * concentration + 1.0).collect();

    for (&k, &p) in keys.iter().zip(new_proportions.iter()) {
        tree.set_population_size(k, p * total);
    }

    ln_dirichlet_pdf(&old_proportions, &reverse_alpha) - ln_dirichlet_pdf(&new_proportions, &forward_alpha)
}

/// Scale a shared event height. If the move pushes it past the floor or
/// ceiling of any comparison currently clustered on it, the proposal is
/// rejected outright (`-infinity` Hastings) rather than attempting the
/// collision-resolving slide-bump machinery `BaseTree` uses for in-tree
/// heights — crossing a neighbor here would require re-running the DPP
/// clustering, which is the `ModelOperator`'s job, not this one's.
pub fn propose_event_time_scaler(
    set: &mut ComparisonSet,
    event: usize,
    tuning: &OperatorTuning,
    rng: &mut RandomSource,
) -> f64 {
    let old = set.event_heights[event].value();
    let multiplier = (tuning.tuning_parameter() * (rng.uniform_unit() - 0.5)).exp();
    let proposal = old * multiplier;
    set.event_heights[event].set_value(proposal);
    set.sync_heights();

    for (tree, &cluster) in set.trees.iter().zip(set.cluster_of.iter()) {
        if cluster != event {
            continue;
        }
        let root = tree.tree.root();
        if let Some(height_index) = tree.tree.get_node_height_index(root) {
            let floor = tree.tree.height_floor(height_index);
            if proposal <= floor {
                set.event_heights[event].set_value(old);
                set.sync_heights();
                return f64::NEG_INFINITY;
            }
        }
    }
    multiplier.ln()
}

/// Scale the Dirichlet-process concentration parameter on the log scale.
pub fn propose_concentration_scaler(set: &mut ComparisonSet, tuning: &OperatorTuning, rng: &mut RandomSource) -> f64 {
    propose_scaler(set, ScaleTarget::Concentration, tuning, rng)
}

/// Neal's conditional Gibbs reclassification of one comparison's cluster
/// assignment — the trans-dimensional "model" move. See
/// [`ComparisonSet::gibbs_resample_cluster`].
pub fn propose_model_operator(
    set: &mut ComparisonSet,
    comparison: usize,
    n_auxiliary_clusters: usize,
    relative_height_prior: &Distribution,
    rng: &mut RandomSource,
) {
    set.gibbs_resample_cluster(comparison, n_auxiliary_clusters, relative_height_prior, rng);
}

/// Every operator kind, for the weight-sampled scheduler in `chain.rs`.
#[derive(Debug, Clone, Copy)]
pub enum OperatorKind {
    Scaler(ScaleTarget),
    AncestralFreqWindowMover { comparison: usize },
    RelativePopulationSizeMixer { comparison: usize },
    EventTimeScaler { event: usize },
    ConcentrationScaler,
    ModelOperator { comparison: usize, n_auxiliary_clusters: usize },
}

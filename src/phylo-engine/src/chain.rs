//! The MCMC chain runner: a weight-sampled operator scheduler driving one
//! [`ComparisonSet`] through `generations` Metropolis-Hastings steps (plus
//! the always-accepted Gibbs `ModelOperator`), periodically writing a
//! sampled row to the state log. Single-threaded at this level — the only
//! concurrency is the `rayon` pattern-parallel likelihood evaluation inside
//! each comparison's own `PopulationTree::log_likelihood`.

use std::io::Write;

use log::{debug, info, trace};
use popgen::{Distribution, RandomSource};
use treeio::statelog::StateLogWriter;

use crate::comparisons::ComparisonSet;
use crate::error::PhyloError;
use crate::node::NodeId;
use crate::operators::{self, OperatorKind, OperatorTuning, ScaleTarget};

struct ScheduledOperator {
    kind: OperatorKind,
    weight: f64,
    tuning: OperatorTuning,
}

pub struct Chain {
    pub comparisons: ComparisonSet,
    pub relative_height_prior: Distribution,
    operators: Vec<ScheduledOperator>,
    rng: RandomSource,
    generation: u64,
    /// Fixed per-comparison iteration order for population-size parameters,
    /// captured once so state-log columns stay aligned across the run
    /// (`HashMap` iteration order is stable absent insertion/removal, but
    /// this avoids relying on that for the log's column identity).
    population_size_keys: Vec<Vec<NodeId>>,
    ln_likelihood: f64,
    ln_prior: f64,
}

/// Generations spent auto-optimizing each operator's tuning parameter
/// before the scheduler freezes it for the remainder of the run.
const TUNING_WINDOW: u64 = 5_000;

impl Chain {
    pub fn new(comparisons: ComparisonSet, relative_height_prior: Distribution, seed: u64) -> Self {
        let population_size_keys: Vec<Vec<NodeId>> =
            comparisons.trees.iter().map(|t| t.population_size_keys()).collect();
        let operators = Self::default_operators(&comparisons);
        let mut chain = Self {
            comparisons,
            relative_height_prior,
            operators,
            rng: RandomSource::seeded(seed),
            generation: 0,
            population_size_keys,
            ln_likelihood: 0.0,
            ln_prior: 0.0,
        };
        chain.comparisons.sync_heights();
        chain.ln_likelihood = chain.comparisons.log_likelihood();
        chain.ln_prior = chain.comparisons.log_prior(&chain.relative_height_prior);
        chain
    }

    fn default_operators(comparisons: &ComparisonSet) -> Vec<ScheduledOperator> {
        let mut operators = Vec::new();
        for i in 0..comparisons.n_comparisons() {
            operators.push(ScheduledOperator {
                kind: OperatorKind::Scaler(ScaleTarget::MutationRateU { comparison: i }),
                weight: 1.0,
                tuning: OperatorTuning::with_default_target(1.0),
            });
            operators.push(ScheduledOperator {
                kind: OperatorKind::Scaler(ScaleTarget::MutationRateV { comparison: i }),
                weight: 1.0,
                tuning: OperatorTuning::with_default_target(1.0),
            });
            operators.push(ScheduledOperator {
                kind: OperatorKind::AncestralFreqWindowMover { comparison: i },
                weight: 1.0,
                tuning: OperatorTuning::with_default_target(0.1),
            });
            operators.push(ScheduledOperator {
                kind: OperatorKind::RelativePopulationSizeMixer { comparison: i },
                weight: 1.0,
                tuning: OperatorTuning::with_default_target(1.0),
            });
            for &node in &comparisons.trees[i].population_size_keys() {
                operators.push(ScheduledOperator {
                    kind: OperatorKind::Scaler(ScaleTarget::PopulationSize { comparison: i, node }),
                    weight: 1.0,
                    tuning: OperatorTuning::with_default_target(1.0),
                });
            }
            operators.push(ScheduledOperator {
                kind: OperatorKind::ModelOperator { comparison: i, n_auxiliary_clusters: 4 },
                weight: 1.0,
                tuning: OperatorTuning::with_default_target(0.234),
            });
        }
        for event in 0..comparisons.n_events() {
            operators.push(ScheduledOperator {
                kind: OperatorKind::EventTimeScaler { event },
                weight: 2.0,
                tuning: OperatorTuning::with_default_target(1.0),
            });
        }
        operators.push(ScheduledOperator {
            kind: OperatorKind::ConcentrationScaler,
            weight: 1.0,
            tuning: OperatorTuning::with_default_target(1.0),
        });
        operators
    }

    pub fn log_posterior(&self) -> f64 {
        self.ln_likelihood + self.ln_prior
    }

    fn pick_operator(&mut self) -> usize {
        let total: f64 = self.operators.iter().map(|o| o.weight).sum();
        let draw = self.rng.uniform_real(0.0, total);
        let mut cumulative = 0.0;
        for (i, op) in self.operators.iter().enumerate() {
            cumulative += op.weight;
            if draw <= cumulative {
                return i;
            }
        }
        self.operators.len() - 1
    }

    /// Advance the chain by one operator proposal and one generation.
    fn step(&mut self) {
        let op_index = self.pick_operator();

        if let OperatorKind::ModelOperator { comparison, n_auxiliary_clusters } = self.operators[op_index].kind {
            operators::propose_model_operator(
                &mut self.comparisons,
                comparison,
                n_auxiliary_clusters,
                &self.relative_height_prior,
                &mut self.rng,
            );
            self.ln_likelihood = self.comparisons.log_likelihood();
            self.ln_prior = self.comparisons.log_prior(&self.relative_height_prior);
            self.generation += 1;
            return;
        }

        self.comparisons.store();
        let old_ln_likelihood = self.ln_likelihood;
        let old_ln_prior = self.ln_prior;

        let ln_hastings = {
            let tuning = &self.operators[op_index].tuning;
            match self.operators[op_index].kind {
                OperatorKind::Scaler(target) => operators::propose_scaler(&mut self.comparisons, target, tuning, &mut self.rng),
                OperatorKind::AncestralFreqWindowMover { comparison } => {
                    operators::propose_window_mover(&mut self.comparisons, comparison, tuning, &mut self.rng)
                }
                OperatorKind::RelativePopulationSizeMixer { comparison } => {
                    operators::propose_relative_population_size_mixer(&mut self.comparisons, comparison, tuning, &mut self.rng)
                }
                OperatorKind::EventTimeScaler { event } => {
                    operators::propose_event_time_scaler(&mut self.comparisons, event, tuning, &mut self.rng)
                }
                OperatorKind::ConcentrationScaler => {
                    operators::propose_concentration_scaler(&mut self.comparisons, tuning, &mut self.rng)
                }
                OperatorKind::ModelOperator { .. } => unreachable!("handled above"),
            }
        };

        let new_ln_likelihood = self.comparisons.log_likelihood();
        let new_ln_prior = self.comparisons.log_prior(&self.relative_height_prior);
        let ln_ratio = (new_ln_likelihood + new_ln_prior) - (old_ln_likelihood + old_ln_prior) + ln_hastings;
        let accepted = ln_ratio >= 0.0 || self.rng.uniform_unit().ln() < ln_ratio;

        if accepted {
            self.ln_likelihood = new_ln_likelihood;
            self.ln_prior = new_ln_prior;
        } else {
            self.comparisons.restore();
            self.ln_likelihood = old_ln_likelihood;
            self.ln_prior = old_ln_prior;
        }

        let op = &mut self.operators[op_index];
        op.tuning.record(accepted);
        if self.generation < TUNING_WINDOW {
            op.tuning.auto_optimize();
        }
        self.generation += 1;
    }

    /// Column names for a [`StateLogWriter`] built to receive this chain's
    /// rows; construct the writer with these before calling [`Chain::run`].
    pub fn state_log_columns(&self) -> Vec<String> {
        let mut columns = vec![
            "generation".to_string(),
            "ln_likelihood".to_string(),
            "ln_prior".to_string(),
            "n_events".to_string(),
            "concentration".to_string(),
        ];
        for i in 0..self.comparisons.n_comparisons() {
            columns.push(format!("height_{i}"));
            columns.push(format!("mutation_rate_u_{i}"));
            columns.push(format!("mutation_rate_v_{i}"));
            columns.push(format!("freq_1_{i}"));
            for k in 0..self.population_size_keys[i].len() {
                columns.push(format!("population_size_{i}_{k}"));
            }
        }
        columns
    }

    fn state_log_row(&self) -> Vec<f64> {
        let mut row = vec![
            self.generation as f64,
            self.ln_likelihood,
            self.ln_prior,
            self.comparisons.n_events() as f64,
            self.comparisons.concentration.value(),
        ];
        for (i, tree) in self.comparisons.trees.iter().enumerate() {
            row.push(tree.root_height());
            row.push(tree.mutation_rate_u.value());
            row.push(tree.mutation_rate_v.value());
            row.push(tree.ancestral_freq_1.value());
            for &node in &self.population_size_keys[i] {
                row.push(tree.population_size_value(node));
            }
        }
        row
    }

    /// Run `n_generations` steps, sampling a state-log row every
    /// `sample_frequency` generations (generation 0 included).
    pub fn run<W: Write>(
        &mut self,
        n_generations: u64,
        sample_frequency: u64,
        writer: &mut StateLogWriter<W>,
    ) -> Result<(), PhyloError> {
        info!(
            "starting chain: {n_generations} generations over {} operators, sampling every {sample_frequency}",
            self.operators.len()
        );
        writer.write_row(&self.state_log_row()).map_err(PhyloError::from)?;

        for gen in 1..=n_generations {
            self.step();
            if gen % sample_frequency == 0 {
                trace!("generation {gen}: ln_posterior = {}", self.log_posterior());
                writer.write_row(&self.state_log_row()).map_err(PhyloError::from)?;
            }
            if gen % (sample_frequency * 100).max(1) == 0 {
                debug!(
                    "generation {gen}: ln_posterior = {:.4}, n_events = {}",
                    self.log_posterior(),
                    self.comparisons.n_events()
                );
            }
        }

        info!("chain finished at generation {n_generations}");
        Ok(())
    }
}

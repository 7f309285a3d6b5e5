//! The collection of population-pair comparisons analyzed together, tied by
//! the Dirichlet-process clustering that lets independent comparisons share
//! one divergence-time event. Each comparison keeps its own small
//! [`PopulationTree`] (own topology, own population sizes, own biallelic
//! data); sharing a height is expressed by synchronizing an `event_heights`
//! entry into every clustered comparison's own root-height parameter before
//! each likelihood evaluation, rather than by aliasing a single `Parameter`
//! across trees — see `DESIGN.md` for why.

use popgen::{Distribution, Parameter};

use crate::population_tree::PopulationTree;

pub struct ComparisonSet {
    pub trees: Vec<PopulationTree>,
    /// `cluster_of[i]` is the index into `event_heights` comparison `i`'s
    /// root divergence time is currently assigned to.
    pub cluster_of: Vec<usize>,
    pub event_heights: Vec<Parameter>,
    pub concentration: Parameter,
}

impl ComparisonSet {
    pub fn new(trees: Vec<PopulationTree>, concentration: Parameter) -> Self {
        let event_heights: Vec<Parameter> =
            trees.iter().map(|t| Parameter::new(t.root_height())).collect();
        let cluster_of: Vec<usize> = (0..trees.len()).collect();
        Self { trees, cluster_of, event_heights, concentration }
    }

    pub fn n_comparisons(&self) -> usize {
        self.trees.len()
    }

    pub fn n_events(&self) -> usize {
        self.event_heights.len()
    }

    /// Push every comparison's clustered event height into its own tree
    /// before evaluating likelihood or prior. Must be called after any move
    /// that touches `event_heights` or `cluster_of`.
    pub fn sync_heights(&mut self) {
        for (tree, &cluster) in self.trees.iter_mut().zip(self.cluster_of.iter()) {
            tree.set_root_height(self.event_heights[cluster].value());
        }
    }

    pub fn log_likelihood(&self) -> f64 {
        self.trees.iter().map(PopulationTree::log_likelihood).sum()
    }

    /// Sum of the event-height priors (owned here, not by any one
    /// comparison's tree, which is why `PopulationTree::log_prior`'s own
    /// root-height contribution is always zero — its root `Parameter` never
    /// carries a prior, only a value kept in sync from `event_heights`),
    /// the concentration prior, and every comparison's own
    /// population-size/mutation/frequency priors.
    pub fn log_prior(&self, relative_height_prior: &Distribution) -> f64 {
        let mut total: f64 = self.event_heights.iter().map(Parameter::prior_ln_pdf).sum();
        total += self.concentration.prior_ln_pdf();
        for tree in &self.trees {
            total += tree.log_prior(relative_height_prior);
        }
        total
    }

    /// Sentinel cluster id meaning "temporarily unassigned", used while a
    /// comparison is detached mid-Gibbs-move.
    const UNASSIGNED: usize = usize::MAX;

    /// Snapshot every comparison's own state and every event height. Cluster
    /// assignments are not snapshotted: the only operator that changes them
    /// is the Gibbs `ModelOperator`, which is always accepted (it is an
    /// exact conditional draw, not a Metropolis-Hastings proposal) and so
    /// never needs reverting.
    pub fn store(&mut self) {
        for tree in &mut self.trees {
            tree.store();
        }
        for h in &mut self.event_heights {
            h.store();
        }
        self.concentration.store();
    }

    pub fn restore(&mut self) {
        for tree in &mut self.trees {
            tree.restore();
        }
        for h in &mut self.event_heights {
            h.restore();
        }
        self.concentration.restore();
        self.sync_heights();
    }

    pub fn cluster_size(&self, event: usize) -> usize {
        self.cluster_of.iter().filter(|&&c| c == event).count()
    }

    /// Remove comparison `i` from whatever cluster it currently occupies
    /// (marking it [`Self::UNASSIGNED`]), compacting `event_heights`/
    /// `cluster_of` if that leaves the cluster empty.
    fn detach(&mut self, i: usize) {
        let old = self.cluster_of[i];
        self.cluster_of[i] = Self::UNASSIGNED;
        if self.cluster_size(old) == 0 {
            self.event_heights.remove(old);
            for c in self.cluster_of.iter_mut() {
                if *c != Self::UNASSIGNED && *c > old {
                    *c -= 1;
                }
            }
        }
    }

    /// Neal's Algorithm-8-style conditional Gibbs move for comparison `i`'s
    /// cluster assignment: weigh every existing event height by its current
    /// cluster size times comparison `i`'s likelihood at that height, and
    /// `n_aux` freshly-drawn candidate heights by `concentration / n_aux`
    /// each, then resample. A simplification of the true marginalized DPP
    /// Gibbs sampler (which integrates the new cluster's height out of the
    /// relative-height prior exactly); conditioning on a single auxiliary
    /// draw per candidate is the standard non-conjugate approximation.
    pub fn gibbs_resample_cluster(
        &mut self,
        i: usize,
        n_aux: usize,
        relative_height_prior: &Distribution,
        rng: &mut popgen::RandomSource,
    ) {
        self.sync_heights();
        let original_event = self.event_heights[self.cluster_of[i]].value();
        self.detach(i);

        let mut candidate_heights: Vec<f64> =
            self.event_heights.iter().map(Parameter::value).collect();
        let mut candidate_weights: Vec<f64> = (0..candidate_heights.len())
            .map(|e| self.cluster_size(e) as f64)
            .collect();

        let aux_start = candidate_heights.len();
        for _ in 0..n_aux.max(1) {
            let draw = relative_height_prior.draw(rng).unwrap_or(original_event).max(1e-9);
            candidate_heights.push(draw);
            candidate_weights.push(self.concentration.value() / n_aux.max(1) as f64);
        }

        let comparison_tree_root_backup = self.trees[i].root_height();
        let mut ln_likelihoods = Vec::with_capacity(candidate_heights.len());
        for &h in &candidate_heights {
            self.trees[i].set_root_height(h);
            ln_likelihoods.push(self.trees[i].log_likelihood());
        }
        self.trees[i].set_root_height(comparison_tree_root_backup);

        let max_ln = ln_likelihoods.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let unnormalized: Vec<f64> = candidate_weights
            .iter()
            .zip(ln_likelihoods.iter())
            .map(|(w, ln_l)| w * (ln_l - max_ln).exp())
            .collect();
        let total: f64 = unnormalized.iter().sum();
        let draw = rng.uniform_real(0.0, total);
        let mut cumulative = 0.0;
        let mut chosen = unnormalized.len() - 1;
        for (idx, w) in unnormalized.iter().enumerate() {
            cumulative += w;
            if draw <= cumulative {
                chosen = idx;
                break;
            }
        }

        if chosen < aux_start {
            self.cluster_of[i] = chosen;
        } else {
            self.event_heights.push(Parameter::new(candidate_heights[chosen]));
            self.cluster_of[i] = self.event_heights.len() - 1;
        }
        self.sync_heights();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use popgen::{BiallelicData, Pattern, RandomSource};
    use std::collections::HashMap;

    fn cherry(label_a: &str, label_b: &str, height: f64) -> PopulationTree {
        let newick = format!(
            "({label_a}[&height=0]:{height},{label_b}[&height=0]:{height})[&height={height},height_index=0];"
        );
        let parsed = treeio::newick::parse(&newick).unwrap();
        let tree = crate::tree::BaseTree::from_newick(&parsed, &[label_a.into(), label_b.into()]).unwrap();
        let mut data = BiallelicData::new(2, false);
        data.add_site(Pattern { red: vec![1, 1], total: vec![2, 2] }).unwrap();
        PopulationTree::new(
            tree,
            HashMap::new(),
            Parameter::new(1.0),
            Parameter::new(1.0),
            Parameter::new(0.5),
            data,
            false,
        )
    }

    #[test]
    fn new_comparison_set_starts_with_one_event_per_comparison() {
        let set = ComparisonSet::new(vec![cherry("A", "B", 0.1), cherry("C", "D", 0.2)], Parameter::new(1.0));
        assert_eq!(set.n_events(), 2);
        assert_eq!(set.cluster_of, vec![0, 1]);
    }

    #[test]
    fn gibbs_resample_keeps_every_comparison_assigned_to_a_valid_cluster() {
        let mut set =
            ComparisonSet::new(vec![cherry("A", "B", 0.1), cherry("C", "D", 0.1)], Parameter::new(1.0));
        let prior = Distribution::gamma(1.0, 0.1).unwrap();
        let mut rng = RandomSource::seeded(3);
        for _ in 0..20 {
            set.gibbs_resample_cluster(0, 4, &prior, &mut rng);
            assert!(set.cluster_of[0] < set.n_events());
        }
    }
}

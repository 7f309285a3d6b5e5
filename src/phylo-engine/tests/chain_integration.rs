//! End-to-end exercises of the chain runner against small synthetic
//! datasets. The likelihood engine's exact-peeling properties (matrix
//! exponential of the biallelic generator, coalescent rate, simulator
//! self-consistency) are pinned directly against closed-form values in
//! `population_tree.rs`'s own test module; the regression constants tied to
//! specific external `.nex` datasets (`hemi129.nex`, `aflp_25.nex`,
//! `diploid-standard-data-ntax5-nchar5.nex`) cannot be reproduced here
//! because those files are not part of this repository (see `DESIGN.md`).
//! This suite instead checks behavioral invariants of the chain runner
//! itself — generation counting, posterior finiteness, and the
//! trans-dimensional model move — against small synthetic datasets.

use std::collections::HashMap;
use std::io::Cursor;

use phylo_engine::{BaseTree, Chain, ComparisonSet, PopulationTree};
use popgen::{BiallelicData, Distribution, Parameter, Pattern, RandomSource};
use treeio::statelog::StateLogWriter;

fn cherry(label_a: &str, label_b: &str, height: f64, patterns: &[(Vec<u32>, Vec<u32>)]) -> PopulationTree {
    let newick = format!(
        "({label_a}[&height=0]:{height},{label_b}[&height=0]:{height})[&height={height},height_index=0];"
    );
    let parsed = treeio::newick::parse(&newick).unwrap();
    let tree = BaseTree::from_newick(&parsed, &[label_a.into(), label_b.into()]).unwrap();
    let mut data = BiallelicData::new(2, false);
    for (red, total) in patterns {
        data.add_site(Pattern { red: red.clone(), total: total.clone() }).unwrap();
    }
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
fn a_short_chain_advances_the_generation_counter_and_samples_every_row() {
    let trees = vec![
        cherry("A", "B", 0.2, &[(vec![1, 1], vec![2, 2]), (vec![2, 0], vec![2, 2])]),
        cherry("C", "D", 0.3, &[(vec![1, 2], vec![2, 2])]),
    ];
    let comparisons = ComparisonSet::new(trees, Parameter::new(1.0));
    let relative_height_prior = Distribution::beta(1.0, 1.0).unwrap();
    let mut chain = Chain::new(comparisons, relative_height_prior, 42);

    let columns = chain.state_log_columns();
    let mut buffer = Vec::new();
    {
        let mut writer = StateLogWriter::new(Cursor::new(&mut buffer), columns.clone());
        chain.run(100, 10, &mut writer).unwrap();
    }

    let text = String::from_utf8(buffer).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    // One header row, plus one row at generation 0 and one every 10 generations up to 100.
    assert_eq!(lines.len(), 1 + 1 + 10);
    assert_eq!(lines[0].split('\t').count(), columns.len());

    let last_row: Vec<f64> = lines.last().unwrap().split('\t').map(|v| v.parse().unwrap()).collect();
    let generation_col = columns.iter().position(|c| c == "generation").unwrap();
    assert_eq!(last_row[generation_col], 100.0);
}

#[test]
fn chain_log_posterior_stays_finite_after_many_generations() {
    let trees = vec![cherry("A", "B", 0.25, &[(vec![1, 1], vec![2, 2]), (vec![0, 2], vec![2, 2])])];
    let comparisons = ComparisonSet::new(trees, Parameter::new(1.0));
    let relative_height_prior = Distribution::beta(1.0, 1.0).unwrap();
    let mut chain = Chain::new(comparisons, relative_height_prior, 7);

    let columns = chain.state_log_columns();
    let mut buffer = Vec::new();
    let mut writer = StateLogWriter::new(Cursor::new(&mut buffer), columns);
    chain.run(500, 50, &mut writer).unwrap();

    assert!(chain.log_posterior().is_finite());
}

#[test]
fn comparisons_can_merge_onto_a_shared_divergence_event_via_the_model_operator() {
    // Two comparisons given the same starting height and identical data are
    // the easiest case for the Gibbs move to merge, since merging costs
    // nothing in likelihood.
    let trees = vec![
        cherry("A", "B", 0.15, &[(vec![1, 1], vec![2, 2])]),
        cherry("C", "D", 0.15, &[(vec![1, 1], vec![2, 2])]),
    ];
    let mut comparisons = ComparisonSet::new(trees, Parameter::new(5.0));
    let relative_height_prior = Distribution::gamma(1.0, 0.15).unwrap();
    let mut rng = RandomSource::seeded(11);

    let mut merged_at_least_once = false;
    for _ in 0..200 {
        comparisons.gibbs_resample_cluster(0, 4, &relative_height_prior, &mut rng);
        comparisons.gibbs_resample_cluster(1, 4, &relative_height_prior, &mut rng);
        if comparisons.cluster_of[0] == comparisons.cluster_of[1] {
            merged_at_least_once = true;
            break;
        }
    }
    assert!(merged_at_least_once, "identical comparisons should eventually cluster together");
    assert!(comparisons.n_events() <= 2);
}

//! Top-level orchestration: load a YAML-described analysis, build a
//! [`phylo_engine::ComparisonSet`] from Nexus character matrices and a
//! starting tree, and either run the MCMC chain, simulate data from the
//! configured tree/population parameters, or summarize a completed state log.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use located_error::prelude::*;
use log::info;

use parser::{Cli, Commands, Config};
use phylo_engine::{BaseTree, Chain, ComparisonSet, NodeId, PopulationTree};
use popgen::{Distribution, Parameter, RandomSource};
use treeio::statelog::StateLogWriter;

pub fn run(cli: Cli) -> Result<()> {
    logger::Logger::init(cli.log_verbosity());
    match cli.commands {
        Commands::Run { config, overwrite } => run_chain(&config, overwrite),
        Commands::SimulateData { config, n_replicates, overwrite } => {
            simulate_data(&config, n_replicates, overwrite)
        }
        Commands::Summarize { log, burnin, hpd_mass } => summarize(&log, burnin, hpd_mass),
    }
}

/// A newick node for a two-population cherry at the given root height,
/// matching the pairwise-comparison scope documented in `DESIGN.md`: every
/// comparison is exactly one population pair sharing a single divergence
/// event, the event `ComparisonSet`'s Dirichlet-process clustering acts on.
fn cherry_newick(pop_a: &str, pop_b: &str, height: f64) -> treeio::newick::Node {
    let leaf = |label: &str| treeio::newick::Node {
        label: Some(label.to_string()),
        branch_length: Some(height),
        height: Some(0.0),
        height_index: None,
        children: Vec::new(),
    };
    treeio::newick::Node {
        label: None,
        branch_length: None,
        height: Some(height),
        height_index: Some(0),
        children: vec![leaf(pop_a), leaf(pop_b)],
    }
}

fn non_root_node_ids(tree: &BaseTree) -> Vec<NodeId> {
    fn recurse(tree: &BaseTree, id: NodeId, out: &mut Vec<NodeId>, is_root: bool) {
        if !is_root {
            out.push(id);
        }
        for &child in &tree.node(id).children {
            recurse(tree, child, out, false);
        }
    }
    let mut out = Vec::new();
    recurse(tree, tree.root(), &mut out, true);
    out
}

fn default_population_sizes(tree: &BaseTree) -> HashMap<NodeId, Parameter> {
    non_root_node_ids(tree).into_iter().map(|id| (id, Parameter::new(1.0))).collect()
}

/// Read one comparison's Nexus matrix, infer its two population labels, and
/// build a starting [`PopulationTree`] for it. The matrix's character count
/// is echoed back so `SimulateData` can reuse the same site count as the
/// real dataset it was derived from.
fn load_comparison(
    comparison: &parser::ComparisonConfig,
    root_height_prior: &Distribution,
    rng: &mut RandomSource,
) -> Result<(PopulationTree, usize)> {
    let matrix = treeio::nexus::read(&comparison.path)
        .with_loc(|| format!("reading character matrix {:?}", comparison.path))?;
    let delimiter = comparison.population_label_delimiter.as_deref().unwrap_or("_");
    let populations_of_taxa: std::result::Result<Vec<String>, treeio::TreeIoError> = matrix
        .taxa
        .iter()
        .map(|taxon| {
            treeio::nexus::infer_population(taxon, delimiter, comparison.population_label_is_suffix)
        })
        .collect();
    let populations_of_taxa =
        populations_of_taxa.with_loc(|| format!("inferring population labels for {:?}", comparison.path))?;

    let (data, population_labels) = treeio::nexus::to_biallelic_data(
        &matrix,
        &populations_of_taxa,
        comparison.genotypes_are_diploid,
        comparison.markers_are_dominant,
    )
    .with_loc(|| format!("recoding {:?} into biallelic site patterns", comparison.path))?;

    if population_labels.len() != 2 {
        bail!(
            "{:?} resolves to {} populations; only pairwise comparisons are supported",
            comparison.path,
            population_labels.len()
        );
    }

    let height = root_height_prior.draw(rng).with_loc(|| "drawing a starting root height")?;
    let newick = cherry_newick(&population_labels[0], &population_labels[1], height);
    let base_tree = BaseTree::from_newick(&newick, &population_labels)
        .with_loc(|| format!("building the starting tree for {:?}", comparison.path))?;
    let population_sizes = default_population_sizes(&base_tree);

    let tree = PopulationTree::new(
        base_tree,
        population_sizes,
        Parameter::new(1.0),
        Parameter::new(1.0),
        Parameter::new(0.5),
        data,
        true,
    );
    Ok((tree, matrix.nchar))
}

fn load_comparisons(
    config: &Config,
    root_height_prior: &Distribution,
    rng: &mut RandomSource,
) -> Result<(Vec<PopulationTree>, Vec<usize>)> {
    let mut trees = Vec::with_capacity(config.comparisons.len());
    let mut site_counts = Vec::with_capacity(config.comparisons.len());
    for comparison in &config.comparisons {
        let (tree, n_sites) = load_comparison(comparison, root_height_prior, rng)?;
        trees.push(tree);
        site_counts.push(n_sites);
    }
    Ok((trees, site_counts))
}

fn run_chain(config_path: &Path, overwrite: bool) -> Result<()> {
    let mut config = Config::from_yaml(config_path).with_loc(|| format!("loading {config_path:?}"))?;
    if overwrite {
        config.output.overwrite = true;
    }
    config.validate().loc("validating configuration")?;

    let mut rng = match config.mcmc.seed {
        Some(seed) => RandomSource::seeded(seed),
        None => RandomSource::from_entropy(),
    };

    let relative_height_prior =
        config.tree.relative_height_prior.to_distribution().loc("tree.relative_height_prior")?;
    let root_height_prior =
        config.tree.root_height_prior.to_distribution().loc("tree.root_height_prior")?;
    let concentration_prior =
        config.mcmc.concentration_prior.to_distribution().loc("mcmc.concentration_prior")?;

    let (trees, _) = load_comparisons(&config, &root_height_prior, &mut rng)?;
    info!("loaded {} comparison(s)", trees.len());

    let concentration = Parameter::with_prior(1.0, concentration_prior);
    let comparisons = ComparisonSet::new(trees, concentration);
    if !config.mcmc.use_dpp {
        info!("mcmc.use_dpp is false: comparisons each start on their own private divergence event");
    }

    rayon::ThreadPoolBuilder::new().num_threads(config.mcmc.threads).build_global().ok();

    let chain_seed = rng.uniform_positive_int(u64::MAX as usize) as u64;
    let mut chain = Chain::new(comparisons, relative_height_prior, chain_seed);

    let log_path = config.output_state_log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).with_loc(|| format!("creating {parent:?}"))?;
    }
    let file = File::create(&log_path).with_loc(|| format!("creating {log_path:?}"))?;
    let columns = chain.state_log_columns();
    let mut writer = StateLogWriter::new(BufWriter::new(file), columns);

    chain
        .run(config.mcmc.generations, config.mcmc.sample_frequency, &mut writer)
        .with_loc(|| "running the chain")?;

    info!("wrote state log to {log_path:?}");
    Ok(())
}

fn simulate_data(config_path: &Path, n_replicates: u32, overwrite: bool) -> Result<()> {
    let mut config = Config::from_yaml(config_path).with_loc(|| format!("loading {config_path:?}"))?;
    if overwrite {
        config.output.overwrite = true;
    }

    let mut rng = match config.mcmc.seed {
        Some(seed) => RandomSource::seeded(seed),
        None => RandomSource::from_entropy(),
    };
    let root_height_prior =
        config.tree.root_height_prior.to_distribution().loc("tree.root_height_prior")?;
    let (trees, site_counts) = load_comparisons(&config, &root_height_prior, &mut rng)?;

    for (comparison_index, (tree, &n_sites)) in trees.iter().zip(site_counts.iter()).enumerate() {
        let n_pop = tree.data().n_populations();
        let samples_per_population: Vec<u32> = (0..n_pop)
            .map(|pop| tree.data().patterns().iter().map(|p| p.total[pop]).max().unwrap_or(2))
            .collect();

        for replicate in 0..n_replicates {
            let file_stem = config
                .output
                .prefix
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("sim")
                .to_string();
            let mut out_path: PathBuf = config.output.prefix.clone();
            out_path.set_file_name(format!("{file_stem}_comparison{comparison_index}_replicate{replicate}.sim.tsv"));
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).with_loc(|| format!("creating {parent:?}"))?;
            }
            if !config.output.overwrite && out_path.exists() {
                bail!("{out_path:?} already exists. Use --overwrite to force.");
            }
            let file = File::create(&out_path).with_loc(|| format!("creating {out_path:?}"))?;
            let mut writer = BufWriter::new(file);
            use std::io::Write as _;
            for _ in 0..n_sites {
                let pattern = tree.simulate_biallelic_site(&mut rng, &samples_per_population);
                let red: Vec<String> = pattern.red.iter().map(u32::to_string).collect();
                let total: Vec<String> = pattern.total.iter().map(u32::to_string).collect();
                writeln!(writer, "{}\t{}", red.join(" "), total.join(" "))
                    .with_loc(|| format!("writing {out_path:?}"))?;
            }
            info!("wrote {n_sites} simulated sites to {out_path:?}");
        }
    }
    Ok(())
}

fn summarize(log_path: &Path, burnin: f64, hpd_mass: f64) -> Result<()> {
    let state_log = treeio::statelog::read(log_path).with_loc(|| format!("reading {log_path:?}"))?;
    for (name, samples) in state_log.columns.iter().zip(state_log.samples.iter()) {
        if name == "generation" {
            continue;
        }
        let start = ((samples.len() as f64) * burnin).floor() as usize;
        let post_burnin = &samples[start.min(samples.len())..];
        if post_burnin.is_empty() {
            continue;
        }
        let mut moments = popgen::stats::OnlineMoments::new();
        for &x in post_burnin {
            moments.update(x);
        }
        let ess = popgen::stats::effective_sample_size(post_burnin);
        let (lo, hi) = popgen::stats::highest_posterior_density_interval(post_burnin, hpd_mass);
        println!(
            "{name}\tmean={:.6}\tvariance={:.6}\tess={:.1}\thpd_{:.0}%=[{:.6}, {:.6}]",
            moments.mean(),
            moments.variance(),
            ess,
            hpd_mass * 100.0,
            lo,
            hi
        );
    }
    Ok(())
}

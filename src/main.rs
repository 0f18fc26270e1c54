use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use hypercut::algorithms::MultiLevelPartitioner;
use hypercut::config::{
    AcceptancePolicy, Context, HeavyNodePenalty, LpAlgorithm, Mode, RatingFunction, Scheme,
};
use hypercut::io::{
    partition_file_name, read_community_file, read_hypergraph_file, write_partition_file,
};
use hypercut::partitioned::Objective;
use hypercut::{Partition, NO_PART};

#[derive(Parser)]
#[command(
    name = "hypercut",
    about = "Shared-memory parallel multilevel hypergraph partitioner"
)]
struct Cli {
    /// Hypergraph file in hMETIS format.
    hypergraph: PathBuf,

    /// Number of blocks.
    #[clap(short, long)]
    k: i32,

    /// Imbalance tolerance (e.g. 0.03).
    #[clap(short, long)]
    epsilon: f64,

    /// Objective to minimize.
    #[clap(short, long, value_enum, default_value_t = Objective::Km1)]
    objective: Objective,

    /// Partitioning mode.
    #[clap(short, long, value_enum, default_value_t = Mode::Direct)]
    mode: Mode,

    /// Coarsening granularity.
    #[clap(long, value_enum, default_value_t = Scheme::Multilevel)]
    scheme: Scheme,

    /// Seed for the random number generators.
    #[clap(long, default_value_t = 0)]
    seed: u64,

    /// Number of worker threads (0 = all cores).
    #[clap(short = 't', long, default_value_t = 0)]
    threads: usize,

    /// Optional community labels, one per vertex.
    #[clap(long)]
    community_file: Option<PathBuf>,

    /// Preset file (JSON) populating any of the configuration options.
    #[clap(long)]
    preset: Option<PathBuf>,

    /// Nets larger than this are ignored during partitioning.
    #[clap(long)]
    cmaxnet: Option<usize>,

    /// Rating function for coarsening candidates.
    #[clap(long, value_enum)]
    rating: Option<RatingFunction>,

    /// Heavy-node penalty of the rating function.
    #[clap(long, value_enum)]
    heavy_node_penalty: Option<HeavyNodePenalty>,

    /// Acceptance policy among equally rated candidates.
    #[clap(long, value_enum)]
    acceptance: Option<AcceptancePolicy>,

    /// Maximum coarse vertex weight multiplier (s).
    #[clap(long)]
    max_allowed_weight_multiplier: Option<f64>,

    /// Contraction limit multiplier (t).
    #[clap(long)]
    contraction_limit_multiplier: Option<u32>,

    /// Skip vertices with degree above mean + 5·stdev during coarsening.
    #[clap(long)]
    use_degree_threshold: bool,

    /// Label propagation variant.
    #[clap(long, value_enum)]
    lp_algorithm: Option<LpAlgorithm>,

    /// Label propagation iteration cap.
    #[clap(long)]
    lp_iterations: Option<u32>,

    /// Block-weight snapshot refresh frequency during label propagation.
    #[clap(long)]
    part_weight_update_frequency: Option<u32>,

    /// Visit vertices by increasing degree during label propagation.
    #[clap(long)]
    lp_degree_order: bool,

    /// Number of multitry FM rounds.
    #[clap(long)]
    fm_rounds: Option<u32>,

    /// Seed vertices per localized FM search.
    #[clap(long)]
    fm_seed_nodes: Option<u32>,

    /// Release claimed but unmoved vertices after each localized search.
    #[clap(long)]
    fm_release_nodes: Option<bool>,

    /// Redistribute vertices so coarsening only matches within communities.
    #[clap(long)]
    use_community_structure: Option<bool>,

    /// Time limit for top-level refinement, in seconds.
    #[clap(long)]
    time_limit: Option<f64>,

    /// Sort incident-net lists for deterministic construction.
    #[clap(long)]
    stable_construction: bool,
}

impl Cli {
    fn into_context(self) -> Result<(Context, PathBuf, Option<PathBuf>), Box<dyn std::error::Error>> {
        let mut context = match &self.preset {
            Some(path) => Context::from_preset_file(path)?,
            None => Context::default(),
        };
        context.k = self.k;
        context.epsilon = self.epsilon;
        context.objective = self.objective;
        context.mode = self.mode;
        context.scheme = self.scheme;
        context.seed = self.seed;
        context.num_threads = self.threads;
        context.stable_construction |= self.stable_construction;
        context.coarsening.use_degree_threshold |= self.use_degree_threshold;
        context.label_propagation.degree_order |= self.lp_degree_order;
        if self.cmaxnet.is_some() {
            context.max_net_size = self.cmaxnet;
        }
        if let Some(rating) = self.rating {
            context.coarsening.rating = rating;
        }
        if let Some(penalty) = self.heavy_node_penalty {
            context.coarsening.heavy_node_penalty = penalty;
        }
        if let Some(acceptance) = self.acceptance {
            context.coarsening.acceptance = acceptance;
        }
        if let Some(s) = self.max_allowed_weight_multiplier {
            context.coarsening.max_allowed_weight_multiplier = s;
        }
        if let Some(t) = self.contraction_limit_multiplier {
            context.coarsening.contraction_limit_multiplier = t;
        }
        if let Some(algorithm) = self.lp_algorithm {
            context.label_propagation.algorithm = algorithm;
        }
        if let Some(iterations) = self.lp_iterations {
            context.label_propagation.max_iterations = iterations;
        }
        if let Some(frequency) = self.part_weight_update_frequency {
            context.label_propagation.part_weight_update_frequency = frequency;
        }
        if let Some(rounds) = self.fm_rounds {
            context.fm.multitry_rounds = rounds;
        }
        if let Some(seeds) = self.fm_seed_nodes {
            context.fm.num_seed_nodes = seeds;
        }
        if let Some(release) = self.fm_release_nodes {
            context.fm.release_nodes = release;
        }
        if let Some(communities) = self.use_community_structure {
            context.use_community_structure = communities;
        }
        if self.time_limit.is_some() {
            context.time_limit_secs = self.time_limit;
        }
        Ok((context, self.hypergraph, self.community_file))
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let (context, input, community_file) = cli.into_context()?;
    context.validate()?;

    if context.num_threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(context.num_threads)
            .build_global()?;
    }

    let mut hg = read_hypergraph_file(&input, context.stable_construction)?;
    log::info!(
        "read {}: {} vertices, {} nets, {} pins",
        input.display(),
        hg.num_nodes(),
        hg.num_edges(),
        hg.num_pins()
    );
    if let Some(path) = &community_file {
        let communities = read_community_file(path, hg.num_nodes() as usize)?;
        hg.set_communities(communities);
    }

    let mut part_ids = vec![NO_PART; hg.num_nodes() as usize];
    let start = Instant::now();
    let metadata = MultiLevelPartitioner::new(context.clone()).partition(&mut part_ids, &mut hg)?;
    let elapsed = start.elapsed();

    println!("objective ({:?}) = {}", context.objective, metadata.objective);
    println!("imbalance = {:.5}", metadata.imbalance);
    println!("time = {elapsed:?}");

    let out = partition_file_name(&input, context.k, context.epsilon, context.seed);
    write_partition_file(&part_ids, &out)?;
    println!("partition written to {}", out.display());
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

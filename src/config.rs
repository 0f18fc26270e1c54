use std::fmt;
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algorithms::Error;
use crate::imbalance;
use crate::partitioned::Objective;
use crate::{NodeWeight, PartitionId};

/// How the k-way partition is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Direct k-way partitioning.
    Direct,
    /// Recursive bisection down to k blocks.
    RecursiveBisection,
}

/// Granularity of the coarsening hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// A stack of cluster-contracted levels.
    Multilevel,
    /// One vertex per level, uncontracted in batches.
    NLevel,
}

/// Rating function for coarsening candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RatingFunction {
    HeavyEdge,
}

/// Penalty discouraging the contraction of heavy vertex pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HeavyNodePenalty {
    Multiplicative,
    None,
    EdgeFrequency,
}

/// Tie-breaking policy among equally rated contraction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AcceptancePolicy {
    Best,
    BestPreferUnmatched,
}

/// Which label propagation variant runs during refinement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LpAlgorithm {
    LabelPropagationKm1,
    LabelPropagationCut,
    DoNothing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseningContext {
    pub rating: RatingFunction,
    pub heavy_node_penalty: HeavyNodePenalty,
    pub acceptance: AcceptancePolicy,
    /// s: the maximum weight of a coarse vertex is s·W/(t·k).
    pub max_allowed_weight_multiplier: f64,
    /// t: coarsening stops at ≤ t·k vertices.
    pub contraction_limit_multiplier: u32,
    /// Skip vertices whose degree exceeds mean + 5·stdev.
    pub use_degree_threshold: bool,
    /// Upper bound on the size of an n-level uncontraction batch.
    pub max_batch_size: usize,
}

impl Default for CoarseningContext {
    fn default() -> Self {
        CoarseningContext {
            rating: RatingFunction::HeavyEdge,
            heavy_node_penalty: HeavyNodePenalty::Multiplicative,
            acceptance: AcceptancePolicy::BestPreferUnmatched,
            max_allowed_weight_multiplier: 1.0,
            contraction_limit_multiplier: 160,
            use_degree_threshold: false,
            max_batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LpContext {
    pub algorithm: LpAlgorithm,
    pub max_iterations: u32,
    /// Refresh the worker's block-weight snapshot every this many vertices.
    pub part_weight_update_frequency: u32,
    /// Visit vertices by increasing degree instead of randomly.
    pub degree_order: bool,
}

impl Default for LpContext {
    fn default() -> Self {
        LpContext {
            algorithm: LpAlgorithm::LabelPropagationKm1,
            max_iterations: 5,
            part_weight_update_frequency: 100,
            degree_order: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FmContext {
    /// Rounds are repeated while the previous round improved, up to this cap.
    pub multitry_rounds: u32,
    /// Seed vertices pulled per localized search.
    pub num_seed_nodes: u32,
    /// Per-search move budget.
    pub max_moves_per_search: usize,
    /// Release claimed but unmoved vertices when a search ends.
    pub release_nodes: bool,
    /// Shuffle the seed queue before each round.
    pub shuffle: bool,
    /// Minimum border vertices collected before localized n-level refinement.
    pub min_num_border_vertices: usize,
}

impl Default for FmContext {
    fn default() -> Self {
        FmContext {
            multitry_rounds: 10,
            num_seed_nodes: 25,
            max_moves_per_search: 400,
            release_nodes: true,
            shuffle: true,
            min_num_border_vertices: 50,
        }
    }
}

/// The configuration bundle threaded through the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    pub k: PartitionId,
    pub epsilon: f64,
    pub objective: Objective,
    pub mode: Mode,
    pub scheme: Scheme,
    pub seed: u64,
    pub num_threads: usize,
    /// Nets larger than this are ignored during partitioning.
    pub max_net_size: Option<usize>,
    /// Sort incident-net lists for run-to-run deterministic construction.
    pub stable_construction: bool,
    /// Restrict coarsening to vertices of the same community.
    pub use_community_structure: bool,
    pub coarsening: CoarseningContext,
    pub label_propagation: LpContext,
    pub fm: FmContext,
    /// Wall-clock budget for top-level refinement, in seconds.
    pub time_limit_secs: Option<f64>,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            k: 2,
            epsilon: 0.03,
            objective: Objective::Km1,
            mode: Mode::Direct,
            scheme: Scheme::Multilevel,
            seed: 0,
            num_threads: 0,
            max_net_size: None,
            stable_construction: false,
            use_community_structure: true,
            coarsening: CoarseningContext::default(),
            label_propagation: LpContext::default(),
            fm: FmContext::default(),
            time_limit_secs: None,
        }
    }
}

impl Context {
    pub fn validate(&self) -> Result<(), Error> {
        if self.k < 2 {
            return Err(Error::InvalidNumberOfBlocks { k: self.k });
        }
        if self.epsilon <= 0.0 {
            return Err(Error::InvalidImbalance {
                epsilon: self.epsilon,
            });
        }
        if self.coarsening.max_allowed_weight_multiplier <= 0.0 {
            return Err(Error::UnknownEnumerant {
                option: "coarsening.max_allowed_weight_multiplier",
                value: self.coarsening.max_allowed_weight_multiplier.to_string(),
            });
        }
        if self.coarsening.contraction_limit_multiplier == 0 {
            return Err(Error::UnknownEnumerant {
                option: "coarsening.contraction_limit_multiplier",
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Coarsening stops at `t·k` vertices.
    pub fn contraction_limit(&self) -> usize {
        self.coarsening.contraction_limit_multiplier as usize * self.k as usize
    }

    /// Maximum weight of a coarse vertex: `s·W/(t·k)`.
    pub fn max_coarse_node_weight(&self, total_weight: NodeWeight) -> NodeWeight {
        let limit = self.coarsening.max_allowed_weight_multiplier * total_weight as f64
            / self.contraction_limit() as f64;
        (limit.ceil() as NodeWeight).max(1)
    }

    /// Per-block weight ceilings: (1 + ε)·⌈W/k⌉.
    pub fn max_part_weights(&self, total_weight: NodeWeight) -> Vec<NodeWeight> {
        imbalance::max_part_weights(self.k as usize, self.epsilon, total_weight)
    }

    /// Loads a preset file (JSON) and returns the context it describes.
    /// Missing fields fall back to the defaults.
    pub fn from_preset_file(path: &Path) -> Result<Context, PresetError> {
        let file = File::open(path).map_err(PresetError::Io)?;
        let context: Context = serde_json::from_reader(file).map_err(PresetError::Parse)?;
        Ok(context)
    }
}

/// Errors raised while loading a preset file.
#[derive(Debug)]
pub enum PresetError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for PresetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetError::Io(err) => write!(f, "cannot read preset file: {err}"),
            PresetError::Parse(err) => write!(f, "cannot parse preset file: {err}"),
        }
    }
}

impl std::error::Error for PresetError {}

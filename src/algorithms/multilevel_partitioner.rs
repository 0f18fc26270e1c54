use crate::algorithms::coarsener::Coarsener;
use crate::algorithms::initial::PoolInitialPartitioner;
use crate::algorithms::rebalancer::Rebalancer;
use crate::algorithms::uncoarsener::{
    is_balanced, MultilevelUncoarsener, NLevelUncoarsener,
};
use crate::algorithms::Error;
use crate::config::{Context, Mode, Scheme};
use crate::hypergraph::Hypergraph;
use crate::imbalance::imbalance_of_loads;
use crate::partitioned::{Objective, PartitionedHypergraph};
use crate::{EdgeWeight, HypernodeId, Partition, PartitionId, NO_PART};

/// Diagnostic data of one partitioner run.
#[derive(Debug, Clone, Copy)]
pub struct PartitionMetadata {
    /// Final value of the configured objective.
    pub objective: EdgeWeight,
    /// Final imbalance (largest relative deviation from the ideal weight).
    pub imbalance: f64,
}

/// The multilevel engine: coarsen, partition the coarsest hypergraph,
/// uncoarsen and refine. Direct k-way and recursive bisection modes, with a
/// multilevel or n-level hierarchy.
pub struct MultiLevelPartitioner {
    pub context: Context,
}

impl MultiLevelPartitioner {
    pub fn new(context: Context) -> Self {
        MultiLevelPartitioner { context }
    }
}

impl Default for MultiLevelPartitioner {
    fn default() -> Self {
        MultiLevelPartitioner {
            context: Context::default(),
        }
    }
}

impl<'a> Partition<&'a mut Hypergraph> for MultiLevelPartitioner {
    type Metadata = PartitionMetadata;
    type Error = Error;

    fn partition(
        &mut self,
        part_ids: &mut [PartitionId],
        hg: &'a mut Hypergraph,
    ) -> Result<Self::Metadata, Self::Error> {
        self.context.validate()?;
        if part_ids.len() != hg.num_nodes() as usize {
            return Err(Error::InputLenMismatch {
                expected: hg.num_nodes() as usize,
                actual: part_ids.len(),
            });
        }
        if (0..hg.num_nodes()).any(|u| hg.node_weight(u) < 0)
            || (0..hg.num_edges()).any(|e| hg.edge_weight(e) < 0)
        {
            return Err(Error::NegativeValues);
        }

        let removed_large = match self.context.max_net_size {
            Some(max_size) => hg.remove_large_edges(max_size),
            None => Vec::new(),
        };
        if !removed_large.is_empty() {
            log::info!("ignoring {} nets above the size threshold", removed_large.len());
        }

        let assignment = match self.context.mode {
            Mode::Direct => partition_direct(&self.context, hg),
            Mode::RecursiveBisection => partition_recursive_bisection(&self.context, hg),
        };

        // Final accounting over the complete hypergraph, with ignored nets
        // restored and a rebalancing pass if the constraint is violated.
        let mut phg = PartitionedHypergraph::new(self.context.k, hg);
        for u in phg.nodes().collect::<Vec<_>>() {
            phg.set_only_node_part(u, assignment[u as usize]);
        }
        phg.initialize_partition();
        for &e in &removed_large {
            phg.restore_large_edge(e);
        }
        if !is_balanced(&self.context, &phg) && !Rebalancer::new(&self.context).rebalance(&phg) {
            log::warn!("returning the best found partition despite the balance violation");
        }

        let metadata = PartitionMetadata {
            objective: phg.objective(self.context.objective),
            imbalance: imbalance_of_loads(&phg.part_weights_vec()),
        };
        for u in 0..phg.num_nodes() {
            part_ids[u as usize] = phg.part_id(u);
        }
        log::info!(
            "partitioned into {} blocks: objective = {}, imbalance = {:.4}",
            self.context.k,
            metadata.objective,
            metadata.imbalance
        );
        Ok(metadata)
    }
}

/// Direct k-way partitioning of `hg` (which may be a sub-hypergraph during
/// recursive bisection).
fn partition_direct(context: &Context, hg: &mut Hypergraph) -> Vec<PartitionId> {
    match context.scheme {
        Scheme::Multilevel => {
            let mut hierarchy = Coarsener::new(context).coarsen_multilevel(hg);
            let coarsest_partition = match hierarchy.hypergraphs.last_mut() {
                Some(coarsest) => {
                    let mut phg = PartitionedHypergraph::new(context.k, coarsest);
                    PoolInitialPartitioner::new(context).partition(&mut phg);
                    (0..phg.num_nodes()).map(|u| phg.part_id(u)).collect()
                }
                None => {
                    // Already below the contraction limit.
                    let mut phg = PartitionedHypergraph::new(context.k, hg);
                    PoolInitialPartitioner::new(context).partition(&mut phg);
                    (0..phg.num_nodes()).map(|u| phg.part_id(u)).collect()
                }
            };
            MultilevelUncoarsener::new(context).uncoarsen(hg, &mut hierarchy, coarsest_partition)
        }
        Scheme::NLevel => {
            let hierarchy = Coarsener::new(context).coarsen_nlevel(hg);
            let mut phg = PartitionedHypergraph::new(context.k, hg);
            PoolInitialPartitioner::new(context).partition(&mut phg);
            NLevelUncoarsener::new(context).uncoarsen(&mut phg, &hierarchy);
            (0..phg.num_nodes()).map(|u| phg.part_id(u)).collect()
        }
    }
}

/// Recursive bisection: split into two blocks with the multilevel engine,
/// extract both sides and recurse until every block range is a singleton.
fn partition_recursive_bisection(context: &Context, hg: &mut Hypergraph) -> Vec<PartitionId> {
    let mut result = vec![NO_PART; hg.num_nodes() as usize];
    let original_ids: Vec<HypernodeId> = (0..hg.num_nodes()).collect();
    bisect(context, hg, 0, context.k, &original_ids, &mut result);
    result
}

/// Imbalance tolerance of an individual bisection so that the nested
/// bisections compose to the requested tolerance: (1+ε)^(1/⌈log₂ k⌉) − 1.
fn adaptive_epsilon(epsilon: f64, k: PartitionId) -> f64 {
    let levels = (k as f64).log2().ceil().max(1.0);
    (1.0 + epsilon).powf(1.0 / levels) - 1.0
}

fn bisect(
    context: &Context,
    hg: &mut Hypergraph,
    block_lo: PartitionId,
    block_hi: PartitionId,
    original_ids: &[HypernodeId],
    result: &mut [PartitionId],
) {
    let num_blocks = block_hi - block_lo;
    debug_assert!(num_blocks >= 1);
    if num_blocks == 1 {
        for u in hg.nodes() {
            result[original_ids[u as usize] as usize] = block_lo;
        }
        return;
    }
    if hg.num_nodes() == 0 {
        return;
    }

    let mut sub_context = context.clone();
    sub_context.k = 2;
    sub_context.mode = Mode::Direct;
    sub_context.epsilon = adaptive_epsilon(context.epsilon, context.k);
    sub_context.seed = context.seed.wrapping_add(block_lo as u64);

    let assignment = partition_direct(&sub_context, hg);
    let phg = PartitionedHypergraph::new(2, hg);
    for u in phg.nodes().collect::<Vec<_>>() {
        phg.set_only_node_part(u, assignment[u as usize]);
    }
    phg.initialize_partition();

    // Cut nets are split for km1 (their remainder still counts per side) and
    // dropped for the cut objective.
    let cut_net_splitting = context.objective == Objective::Km1;
    let sides = [
        (0, block_lo, block_lo + (num_blocks + 1) / 2),
        (1, block_lo + (num_blocks + 1) / 2, block_hi),
    ];
    let mut extracted = Vec::new();
    for &(side, lo, hi) in &sides {
        let (side_hg, side_mapping) = phg.extract(side, cut_net_splitting);
        let mut side_original_ids = vec![0; side_hg.num_nodes() as usize];
        for u in phg.nodes() {
            if phg.part_id(u) == side {
                side_original_ids[side_mapping[u as usize] as usize] =
                    original_ids[u as usize];
            }
        }
        extracted.push((side_hg, side_original_ids, lo, hi));
    }
    drop(phg);

    for (mut side_hg, side_original_ids, lo, hi) in extracted {
        bisect(context, &mut side_hg, lo, hi, &side_original_ids, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LpAlgorithm;

    #[test]
    fn test_three_vertices_one_net() {
        // Arrange: k = 2, ε = 0.03, one net {0, 1, 2}
        let mut hg = Hypergraph::new(3, &[vec![0, 1, 2]], None, None, true);
        let mut part_ids = vec![NO_PART; 3];
        let mut partitioner = MultiLevelPartitioner::default();
        partitioner.context.epsilon = 0.03;

        // Act
        let metadata = partitioner.partition(&mut part_ids, &mut hg).unwrap();

        // Assert: block sizes 1 and 2, objective km1 = cut = 1
        let mut sizes = [0usize; 2];
        for &p in &part_ids {
            sizes[p as usize] += 1;
        }
        sizes.sort_unstable();
        assert_eq!(sizes, [1, 2]);
        assert_eq!(metadata.objective, 1);
    }

    #[test]
    fn test_two_disconnected_cliques() {
        // Arrange: two disconnected 4-vertex nets, k = 4, ε = 0.1
        let mut hg = Hypergraph::new(
            8,
            &[vec![0, 1, 2, 3], vec![4, 5, 6, 7]],
            None,
            None,
            true,
        );
        let mut part_ids = vec![NO_PART; 8];
        let mut partitioner = MultiLevelPartitioner::default();
        partitioner.context.k = 4;
        partitioner.context.epsilon = 0.1;
        partitioner.context.use_community_structure = false;

        // Act
        let metadata = partitioner.partition(&mut part_ids, &mut hg).unwrap();

        // Assert: balance forces blocks of two, so each net spans at least
        // two blocks; km1 = 2 is optimal
        let mut sizes = [0usize; 4];
        for &p in &part_ids {
            sizes[p as usize] += 1;
        }
        assert_eq!(sizes, [2, 2, 2, 2]);
        assert!(metadata.objective >= 2);
        assert!(metadata.imbalance <= 0.1);
    }

    #[test]
    fn test_direct_kway_on_larger_instance_is_feasible() {
        // Arrange
        let edges: Vec<Vec<HypernodeId>> = (0..64)
            .map(|i| vec![i, (i + 1) % 64, (i + 9) % 64])
            .collect();
        let weights = crate::gen_weights::gen_uniform_weights(64);
        let mut hg = Hypergraph::new(64, &edges, None, Some(&weights), true);
        let mut part_ids = vec![NO_PART; 64];
        let mut partitioner = MultiLevelPartitioner::default();
        partitioner.context.k = 4;
        partitioner.context.epsilon = 0.1;
        partitioner.context.seed = 13;
        partitioner.context.use_community_structure = false;
        partitioner.context.coarsening.contraction_limit_multiplier = 4;

        // Act
        let metadata = partitioner.partition(&mut part_ids, &mut hg).unwrap();

        // Assert
        assert!(part_ids.iter().all(|&p| (0..4).contains(&p)));
        let ceilings = partitioner.context.max_part_weights(64);
        let mut weights = [0i64; 4];
        for &p in &part_ids {
            weights[p as usize] += 1;
        }
        for p in 0..4 {
            assert!(weights[p] <= ceilings[p]);
        }
        assert!(metadata.objective > 0);
    }

    #[test]
    fn test_nlevel_scheme_end_to_end() {
        // Arrange
        let edges: Vec<Vec<HypernodeId>> = (0..32)
            .map(|i| vec![i, (i + 1) % 32, (i + 5) % 32])
            .collect();
        let mut hg = Hypergraph::new(32, &edges, None, None, true);
        let mut part_ids = vec![NO_PART; 32];
        let mut partitioner = MultiLevelPartitioner::default();
        partitioner.context.k = 2;
        partitioner.context.epsilon = 0.2;
        partitioner.context.scheme = Scheme::NLevel;
        partitioner.context.use_community_structure = false;
        partitioner.context.coarsening.contraction_limit_multiplier = 4;

        // Act
        let metadata = partitioner.partition(&mut part_ids, &mut hg).unwrap();

        // Assert
        assert!(part_ids.iter().all(|&p| p == 0 || p == 1));
        assert!(metadata.imbalance <= 0.2);
    }

    #[test]
    fn test_recursive_bisection_assigns_all_blocks() {
        // Arrange
        let edges: Vec<Vec<HypernodeId>> = (0..40)
            .map(|i| vec![i, (i + 1) % 40, (i + 4) % 40])
            .collect();
        let mut hg = Hypergraph::new(40, &edges, None, None, true);
        let mut part_ids = vec![NO_PART; 40];
        let mut partitioner = MultiLevelPartitioner::default();
        partitioner.context.k = 4;
        partitioner.context.epsilon = 0.2;
        partitioner.context.mode = Mode::RecursiveBisection;
        partitioner.context.use_community_structure = false;
        partitioner.context.coarsening.contraction_limit_multiplier = 4;

        // Act
        partitioner.partition(&mut part_ids, &mut hg).unwrap();

        // Assert: every vertex assigned, every block populated
        assert!(part_ids.iter().all(|&p| (0..4).contains(&p)));
        for block in 0..4 {
            assert!(part_ids.iter().any(|&p| p == block));
        }
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        // Arrange
        let mut hg = Hypergraph::new(3, &[vec![0, 1, 2]], None, None, true);
        let mut part_ids = vec![NO_PART; 3];
        let mut partitioner = MultiLevelPartitioner::default();
        partitioner.context.k = 1;

        // Act
        let result = partitioner.partition(&mut part_ids, &mut hg);

        // Assert
        assert!(matches!(result, Err(Error::InvalidNumberOfBlocks { k: 1 })));
    }

    #[test]
    fn test_cut_objective_with_lp_only() {
        // Arrange
        let edges: Vec<Vec<HypernodeId>> = (0..24).map(|i| vec![i, (i + 1) % 24]).collect();
        let mut hg = Hypergraph::new(24, &edges, None, None, true);
        let mut part_ids = vec![NO_PART; 24];
        let mut partitioner = MultiLevelPartitioner::default();
        partitioner.context.k = 2;
        partitioner.context.epsilon = 0.2;
        partitioner.context.objective = Objective::Cut;
        partitioner.context.label_propagation.algorithm = LpAlgorithm::LabelPropagationCut;
        partitioner.context.use_community_structure = false;
        partitioner.context.coarsening.contraction_limit_multiplier = 4;

        // Act
        let metadata = partitioner.partition(&mut part_ids, &mut hg).unwrap();

        // Assert: a ring of 24 vertices cut into two arcs has cut >= 2
        assert!(metadata.objective >= 2);
        assert!(metadata.imbalance <= 0.2);
    }
}

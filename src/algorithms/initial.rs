use std::collections::VecDeque;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::Context;
use crate::partitioned::PartitionedHypergraph;
use crate::{EdgeWeight, HypernodeId, NodeWeight, PartitionId, NO_PART};

#[derive(Debug, Clone, Copy)]
enum Strategy {
    Random,
    Greedy,
    BfsGrowth,
}

const STRATEGIES: [Strategy; 3] = [Strategy::Random, Strategy::Greedy, Strategy::BfsGrowth];

/// Initial partitioning oracle for the coarsest hypergraph: a pool of flat
/// strategies, each producing a complete assignment; the best feasible
/// result (by objective) wins, falling back to the least imbalanced one.
pub struct PoolInitialPartitioner<'c> {
    context: &'c Context,
    rng: SmallRng,
}

impl<'c> PoolInitialPartitioner<'c> {
    pub fn new(context: &'c Context) -> Self {
        PoolInitialPartitioner {
            context,
            rng: SmallRng::seed_from_u64(context.seed.wrapping_add(1)),
        }
    }

    /// Partitions the (coarsest) hypergraph bound to `phg`. On return every
    /// enabled vertex has a block and all partition tables are initialized.
    pub fn partition(&mut self, phg: &mut PartitionedHypergraph<'_>) {
        let max_part_weights = self.context.max_part_weights(phg.total_weight());

        let mut best: Option<(Vec<PartitionId>, bool, EdgeWeight, NodeWeight)> = None;
        for strategy in STRATEGIES {
            let assignment = self.run_strategy(strategy, phg, &max_part_weights);
            phg.reset_partition();
            apply(phg, &assignment);
            let objective = phg.objective(self.context.objective);
            let overweight: NodeWeight = (0..phg.k())
                .map(|p| (phg.part_weight(p) - max_part_weights[p as usize]).max(0))
                .sum();
            let feasible = overweight == 0;
            let better = match &best {
                None => true,
                Some((_, best_feasible, best_objective, best_overweight)) => {
                    if feasible != *best_feasible {
                        feasible
                    } else if feasible {
                        objective < *best_objective
                    } else {
                        (overweight, objective) < (*best_overweight, *best_objective)
                    }
                }
            };
            log::debug!(
                "initial partitioning {strategy:?}: objective = {objective}, feasible = {feasible}"
            );
            if better {
                best = Some((assignment, feasible, objective, overweight));
            }
        }

        let (assignment, _, _, _) = best.expect("initial partitioning pool is never empty");
        phg.reset_partition();
        apply(phg, &assignment);
    }

    fn run_strategy(
        &mut self,
        strategy: Strategy,
        phg: &PartitionedHypergraph<'_>,
        max_part_weights: &[NodeWeight],
    ) -> Vec<PartitionId> {
        let k = phg.k() as usize;
        let mut assignment = vec![NO_PART; phg.num_nodes() as usize];
        let mut weights = vec![0i64; k];

        // Isolated vertices carry weight but no nets; they are held back and
        // placed greedily once the connected vertices are assigned.
        let mut connected = Vec::new();
        let mut isolated = Vec::new();
        for u in phg.nodes() {
            if phg.incident_nets(u).next().is_some() {
                connected.push(u);
            } else {
                isolated.push(u);
            }
        }

        match strategy {
            Strategy::Random => {
                connected.shuffle(&mut self.rng);
                for &u in &connected {
                    let start = self.rng.gen_range(0..k);
                    let block = (0..k)
                        .map(|i| (start + i) % k)
                        .find(|&p| weights[p] + phg.node_weight(u) <= max_part_weights[p])
                        .unwrap_or_else(|| lightest_block(&weights));
                    assignment[u as usize] = block as PartitionId;
                    weights[block] += phg.node_weight(u);
                }
            }
            Strategy::Greedy => {
                // Largest weight first into the lightest block.
                connected.sort_by_key(|&u| std::cmp::Reverse(phg.node_weight(u)));
                for &u in &connected {
                    let block = lightest_block(&weights);
                    assignment[u as usize] = block as PartitionId;
                    weights[block] += phg.node_weight(u);
                }
            }
            Strategy::BfsGrowth => {
                self.bfs_growth(phg, &connected, max_part_weights, &mut assignment, &mut weights);
            }
        }

        for &u in &isolated {
            let block = lightest_block(&weights);
            assignment[u as usize] = block as PartitionId;
            weights[block] += phg.node_weight(u);
        }
        assignment
    }

    /// Grows k regions from random seeds in round-robin fashion; vertices
    /// not reached (disconnected components) go to the lightest block.
    fn bfs_growth(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        connected: &[HypernodeId],
        max_part_weights: &[NodeWeight],
        assignment: &mut [PartitionId],
        weights: &mut [NodeWeight],
    ) {
        let k = phg.k() as usize;
        let mut seeds = connected.to_vec();
        seeds.shuffle(&mut self.rng);
        let mut queues: Vec<VecDeque<HypernodeId>> = vec![VecDeque::new(); k];
        for (p, &seed) in seeds.iter().take(k).enumerate() {
            queues[p].push_back(seed);
        }

        let mut remaining = connected.len();
        while remaining > 0 && queues.iter().any(|q| !q.is_empty()) {
            for p in 0..k {
                let Some(u) = pop_unassigned(&mut queues[p], assignment) else {
                    continue;
                };
                if weights[p] + phg.node_weight(u) > max_part_weights[p] {
                    // Region is full; hand the vertex back to the pool.
                    queues[p].clear();
                    continue;
                }
                assignment[u as usize] = p as PartitionId;
                weights[p] += phg.node_weight(u);
                remaining -= 1;
                for e in phg.incident_nets(u) {
                    for pin in phg.pins(e) {
                        if assignment[pin as usize] == NO_PART {
                            queues[p].push_back(pin);
                        }
                    }
                }
            }
        }

        for &u in connected {
            if assignment[u as usize] == NO_PART {
                let block = lightest_block(weights);
                assignment[u as usize] = block as PartitionId;
                weights[block] += phg.node_weight(u);
            }
        }
    }
}

fn lightest_block(weights: &[NodeWeight]) -> usize {
    weights
        .iter()
        .enumerate()
        .min_by_key(|&(_, &w)| w)
        .map(|(p, _)| p)
        .expect("at least two blocks")
}

fn pop_unassigned(
    queue: &mut VecDeque<HypernodeId>,
    assignment: &[PartitionId],
) -> Option<HypernodeId> {
    while let Some(u) = queue.pop_front() {
        if assignment[u as usize] == NO_PART {
            return Some(u);
        }
    }
    None
}

fn apply(phg: &PartitionedHypergraph<'_>, assignment: &[PartitionId]) {
    for u in phg.nodes() {
        debug_assert!(assignment[u as usize] != NO_PART);
        phg.set_only_node_part(u, assignment[u as usize]);
    }
    phg.initialize_partition();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::Hypergraph;
    use crate::imbalance::imbalance_of_loads;

    #[test]
    fn test_pool_produces_complete_feasible_partition() {
        // Arrange
        let edges: Vec<Vec<HypernodeId>> = (0..12)
            .map(|i| vec![i, (i + 1) % 12, (i + 2) % 12])
            .collect();
        let mut hg = Hypergraph::new(12, &edges, None, None, true);
        let mut phg = PartitionedHypergraph::new(3, &mut hg);
        let mut context = Context::default();
        context.k = 3;
        context.epsilon = 0.2;
        let ceilings = context.max_part_weights(12);

        // Act
        PoolInitialPartitioner::new(&context).partition(&mut phg);

        // Assert: complete, tables consistent, balance respected
        for u in phg.nodes() {
            assert_ne!(phg.part_id(u), NO_PART);
        }
        assert!(phg.check_tracked_partition_information());
        for p in 0..3 {
            assert!(phg.part_weight(p) <= ceilings[p as usize]);
        }
    }

    #[test]
    fn test_isolated_vertices_are_spread_by_weight() {
        // Arrange: one net, three heavy isolated vertices
        let mut hg = Hypergraph::new(
            5,
            &[vec![0, 1]],
            None,
            Some(&[1, 1, 5, 5, 5]),
            true,
        );
        let mut phg = PartitionedHypergraph::new(2, &mut hg);
        let mut context = Context::default();
        context.epsilon = 0.5;

        // Act
        PoolInitialPartitioner::new(&context).partition(&mut phg);

        // Assert: the isolated vertices keep the blocks balanced
        let loads = phg.part_weights_vec();
        assert!(imbalance_of_loads(&loads) < 0.5, "loads: {loads:?}");
        assert_eq!(loads.iter().sum::<i64>(), 17);
    }
}

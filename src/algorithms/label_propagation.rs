use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::{Context, LpAlgorithm};
use crate::gain::{cut_delta, km1_delta, Km1GainCache};
use crate::partitioned::{Objective, PartitionedHypergraph};
use crate::{EdgeWeight, HypernodeId, NodeWeight, PartitionId};

/// Label propagation refinement: bounded iterations of parallel vertex-wise
/// best-block moves. For km1 the active set starts from the border vertices,
/// for cut from all vertices; a localized node set can be supplied instead
/// (n-level refinement around uncontracted vertices).
pub struct LabelPropagationRefiner<'c> {
    context: &'c Context,
    objective: Objective,
    rng: SmallRng,
}

impl<'c> LabelPropagationRefiner<'c> {
    pub fn new(context: &'c Context) -> Self {
        let objective = match context.label_propagation.algorithm {
            LpAlgorithm::LabelPropagationKm1 => Objective::Km1,
            LpAlgorithm::LabelPropagationCut => Objective::Cut,
            LpAlgorithm::DoNothing => context.objective,
        };
        LabelPropagationRefiner {
            context,
            objective,
            rng: SmallRng::seed_from_u64(context.seed.wrapping_add(2)),
        }
    }

    /// Runs up to `max_iterations` passes; terminates early when a pass
    /// accepts no move. Returns whether the objective improved.
    pub fn refine(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        refinement_nodes: Option<&[HypernodeId]>,
    ) -> bool {
        if self.context.label_propagation.algorithm == LpAlgorithm::DoNothing {
            return false;
        }
        let max_part_weights = self.context.max_part_weights(phg.total_weight());

        let mut active: Vec<HypernodeId> = match refinement_nodes {
            Some(nodes) => nodes.to_vec(),
            None => match self.objective {
                Objective::Km1 => phg.nodes().filter(|&u| phg.is_border_node(u)).collect(),
                Objective::Cut => phg.nodes().collect(),
            },
        };
        if self.context.label_propagation.degree_order {
            active.sort_by_key(|&u| phg.node_degree(u));
        } else {
            active.shuffle(&mut self.rng);
        }

        let mut total_delta: EdgeWeight = 0;
        for iteration in 0..self.context.label_propagation.max_iterations {
            let (moves, delta, moved) = self.run_iteration(phg, &active, &max_part_weights);
            total_delta += delta;
            if phg.gain_cache_initialized() {
                // A pin observed while another worker moved it can collect a
                // misattributed penalty update; recompute the terms of this
                // pass's movers now that the workers joined.
                for &u in &moved {
                    phg.gain_cache()
                        .set_penalty(u, Km1GainCache::recompute_penalty(phg, u));
                }
            }
            log::debug!("label propagation iteration {iteration}: {moves} moves, delta {delta}");
            if moves == 0 {
                break;
            }
        }
        total_delta < 0
    }

    /// One parallel pass over the active vertices. Each worker filters move
    /// candidates against a private block-weight snapshot refreshed every
    /// `part_weight_update_frequency` vertices; the ceiling is enforced
    /// atomically by `change_node_part` regardless of snapshot staleness.
    fn run_iteration(
        &self,
        phg: &PartitionedHypergraph<'_>,
        active: &[HypernodeId],
        max_part_weights: &[NodeWeight],
    ) -> (usize, EdgeWeight, Vec<HypernodeId>) {
        let update_frequency = self.context.label_propagation.part_weight_update_frequency.max(1);
        active
            .par_chunks(256)
            .map(|chunk| {
                let k = phg.k() as usize;
                let mut scratch = vec![0i64; k];
                let mut snapshot = phg.part_weights_vec();
                let mut since_refresh = 0u32;
                let mut moves = 0usize;
                let mut delta_sum: EdgeWeight = 0;
                let mut moved_nodes: Vec<HypernodeId> = Vec::new();
                for &u in chunk {
                    if since_refresh >= update_frequency {
                        snapshot = phg.part_weights_vec();
                        since_refresh = 0;
                    }
                    since_refresh += 1;
                    let Some((to, gain)) =
                        self.best_move(phg, u, &mut scratch, &snapshot, max_part_weights)
                    else {
                        continue;
                    };
                    if gain <= 0 {
                        continue;
                    }
                    let from = phg.part_id(u);
                    let mut move_delta: EdgeWeight = 0;
                    let objective = self.objective;
                    let record =
                        |_: crate::HyperedgeId, we: EdgeWeight, size: usize, nf: u32, nt: u32| {
                            move_delta += match objective {
                                Objective::Km1 => km1_delta(we, nf, nt),
                                Objective::Cut => cut_delta(we, size, nf, nt),
                            };
                        };
                    let moved = if phg.gain_cache_initialized() {
                        phg.change_node_part_km1(
                            u,
                            from,
                            to,
                            max_part_weights[to as usize],
                            || {},
                            record,
                        )
                    } else {
                        phg.change_node_part(
                            u,
                            from,
                            to,
                            max_part_weights[to as usize],
                            || {},
                            record,
                        )
                    };
                    if moved {
                        moves += 1;
                        delta_sum += move_delta;
                        moved_nodes.push(u);
                        let wu = phg.node_weight(u);
                        snapshot[from as usize] -= wu;
                        snapshot[to as usize] += wu;
                    }
                }
                (moves, delta_sum, moved_nodes)
            })
            .reduce(
                || (0, 0, Vec::new()),
                |mut a, mut b| {
                    a.0 += b.0;
                    a.1 += b.1;
                    a.2.append(&mut b.2);
                    a
                },
            )
    }

    /// Best destination block of `u` under the weight ceilings, with its
    /// gain; ties prefer the lighter block.
    fn best_move(
        &self,
        phg: &PartitionedHypergraph<'_>,
        u: HypernodeId,
        scratch: &mut [EdgeWeight],
        snapshot: &[NodeWeight],
        max_part_weights: &[NodeWeight],
    ) -> Option<(PartitionId, EdgeWeight)> {
        let from = phg.part_id(u);
        let mut penalty: EdgeWeight = 0;
        let mut touched: Vec<PartitionId> = Vec::new();
        for e in phg.incident_nets(u) {
            let we = phg.edge_weight(e);
            let size = phg.edge_size(e);
            let pc_from = phg.pin_count_in_part(e, from) as usize;
            match self.objective {
                Objective::Km1 => {
                    if pc_from > 1 {
                        penalty += we;
                    }
                    for p in phg.connectivity_set(e) {
                        if p != from {
                            if scratch[p as usize] == 0 {
                                touched.push(p);
                            }
                            scratch[p as usize] += we;
                        }
                    }
                }
                Objective::Cut => {
                    if pc_from == size {
                        penalty += we;
                    }
                    for p in phg.connectivity_set(e) {
                        if p != from && phg.pin_count_in_part(e, p) as usize == size - 1 {
                            if scratch[p as usize] == 0 {
                                touched.push(p);
                            }
                            scratch[p as usize] += we;
                        }
                    }
                }
            }
        }

        let wu = phg.node_weight(u);
        let mut best: Option<(PartitionId, EdgeWeight, NodeWeight)> = None;
        for &p in &touched {
            let gain = scratch[p as usize] - penalty;
            scratch[p as usize] = 0;
            if snapshot[p as usize] + wu > max_part_weights[p as usize] {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, best_gain, best_weight)) => {
                    gain > best_gain || (gain == best_gain && snapshot[p as usize] < best_weight)
                }
            };
            if better {
                best = Some((p, gain, snapshot[p as usize]));
            }
        }
        best.map(|(p, gain, _)| (p, gain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::Hypergraph;
    use crate::partitioned::PartitionedHypergraph;

    fn ring(n: u32) -> Hypergraph {
        let edges: Vec<Vec<HypernodeId>> = (0..n).map(|i| vec![i, (i + 1) % n]).collect();
        Hypergraph::new(n, &edges, None, None, true)
    }

    fn context(k: i32, objective: LpAlgorithm) -> Context {
        let mut context = Context::default();
        context.k = k;
        context.epsilon = 0.1;
        context.seed = 3;
        context.label_propagation.algorithm = objective;
        context
    }

    #[test]
    fn test_km1_refinement_improves_scattered_partition() {
        // Arrange: alternating blocks on a ring cut every net
        let mut hg = ring(16);
        let phg = {
            let phg = PartitionedHypergraph::new(2, &mut hg);
            for u in 0..16 {
                phg.set_only_node_part(u, (u % 2) as PartitionId);
            }
            phg.initialize_partition();
            phg
        };
        let km1_before = phg.km1();
        let context = context(2, LpAlgorithm::LabelPropagationKm1);

        // Act
        let improved = LabelPropagationRefiner::new(&context).refine(&phg, None);

        // Assert
        assert!(improved);
        assert!(phg.km1() < km1_before);
        assert!(phg.check_tracked_partition_information());
    }

    #[test]
    fn test_cut_refinement_respects_weight_ceiling() {
        // Arrange
        let mut hg = ring(12);
        let phg = {
            let phg = PartitionedHypergraph::new(2, &mut hg);
            for u in 0..12 {
                phg.set_only_node_part(u, (u % 2) as PartitionId);
            }
            phg.initialize_partition();
            phg
        };
        let context = context(2, LpAlgorithm::LabelPropagationCut);
        let ceilings = context.max_part_weights(12);

        // Act
        LabelPropagationRefiner::new(&context).refine(&phg, None);

        // Assert
        for p in 0..2 {
            assert!(phg.part_weight(p) <= ceilings[p as usize]);
        }
        assert!(phg.check_tracked_partition_information());
    }

    #[test]
    fn test_refinement_keeps_gain_cache_exact() {
        // Arrange
        let mut hg = ring(16);
        let mut phg = PartitionedHypergraph::new(2, &mut hg);
        for u in 0..16 {
            phg.set_only_node_part(u, (u % 2) as PartitionId);
        }
        phg.initialize_partition();
        phg.initialize_gain_cache();
        let context = context(2, LpAlgorithm::LabelPropagationKm1);

        // Act
        LabelPropagationRefiner::new(&context).refine(&phg, None);

        // Assert
        assert!(phg.gain_cache().verify(&phg));
    }
}

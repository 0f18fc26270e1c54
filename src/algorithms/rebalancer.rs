use crate::config::Context;
use crate::partitioned::{Objective, PartitionedHypergraph};
use crate::{EdgeWeight, HypernodeId, NodeWeight, PartitionId};

/// Greedy balance restoration: repeatedly moves the highest-gain vertex out
/// of the most overweight block into a feasible destination, accepting
/// negative-gain moves when nothing better exists.
pub struct Rebalancer<'c> {
    context: &'c Context,
}

impl<'c> Rebalancer<'c> {
    pub fn new(context: &'c Context) -> Self {
        Rebalancer { context }
    }

    /// Returns whether the partition satisfies the balance constraint on
    /// return. Failure to restore balance is reported with a warning and the
    /// best found partition is kept.
    pub fn rebalance(&self, phg: &PartitionedHypergraph<'_>) -> bool {
        let max_part_weights = self.context.max_part_weights(phg.total_weight());

        loop {
            let Some(overweight) = (0..phg.k())
                .filter(|&p| phg.part_weight(p) > max_part_weights[p as usize])
                .max_by_key(|&p| phg.part_weight(p) - max_part_weights[p as usize])
            else {
                return true;
            };

            let mut best: Option<(HypernodeId, PartitionId, EdgeWeight)> = None;
            for u in phg.nodes() {
                if phg.part_id(u) != overweight {
                    continue;
                }
                if let Some((to, gain)) = self.best_destination(phg, u, &max_part_weights) {
                    if best.is_none_or(|(_, _, best_gain)| gain > best_gain) {
                        best = Some((u, to, gain));
                    }
                }
            }

            let Some((u, to, gain)) = best else {
                log::warn!(
                    "rebalancer cannot restore balance: block {overweight} exceeds its \
                     ceiling and no vertex has a feasible destination"
                );
                return false;
            };
            log::debug!("rebalance: moving {u} from {overweight} to {to} (gain {gain})");
            let ceiling = max_part_weights[to as usize];
            let moved = if phg.gain_cache_initialized() && self.context.objective == Objective::Km1
            {
                phg.change_node_part_km1(u, overweight, to, ceiling, || {}, |_, _, _, _, _| {})
            } else {
                phg.change_node_part(u, overweight, to, ceiling, || {}, |_, _, _, _, _| {})
            };
            if !moved {
                log::warn!("rebalancer move of vertex {u} to block {to} failed");
                return false;
            }
        }
    }

    /// Best feasible destination for `u`, by gain; every block is a
    /// candidate, so the result may carry a negative gain.
    fn best_destination(
        &self,
        phg: &PartitionedHypergraph<'_>,
        u: HypernodeId,
        max_part_weights: &[NodeWeight],
    ) -> Option<(PartitionId, EdgeWeight)> {
        let from = phg.part_id(u);
        let wu = phg.node_weight(u);
        let k = phg.k() as usize;

        let mut benefit = vec![0i64; k];
        let mut penalty: EdgeWeight = 0;
        for e in phg.incident_nets(u) {
            let we = phg.edge_weight(e);
            let size = phg.edge_size(e);
            let pc_from = phg.pin_count_in_part(e, from) as usize;
            match self.context.objective {
                Objective::Km1 => {
                    if pc_from > 1 {
                        penalty += we;
                    }
                    for p in phg.connectivity_set(e) {
                        if p != from {
                            benefit[p as usize] += we;
                        }
                    }
                }
                Objective::Cut => {
                    if pc_from == size {
                        penalty += we;
                    }
                    for p in phg.connectivity_set(e) {
                        if p != from && phg.pin_count_in_part(e, p) as usize == size - 1 {
                            benefit[p as usize] += we;
                        }
                    }
                }
            }
        }

        let mut best: Option<(PartitionId, EdgeWeight, NodeWeight)> = None;
        for p in 0..phg.k() {
            if p == from {
                continue;
            }
            let to_weight = phg.part_weight(p);
            if to_weight + wu > max_part_weights[p as usize] {
                continue;
            }
            let gain = benefit[p as usize] - penalty;
            let better = match best {
                None => true,
                Some((_, best_gain, best_weight)) => {
                    gain > best_gain || (gain == best_gain && to_weight < best_weight)
                }
            };
            if better {
                best = Some((p, gain, to_weight));
            }
        }
        best.map(|(p, gain, _)| (p, gain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::Hypergraph;

    #[test]
    fn test_rebalancer_restores_balance() {
        // Arrange: everything piled into block 0
        let edges: Vec<Vec<HypernodeId>> = (0..8).map(|i| vec![i, (i + 1) % 8]).collect();
        let mut hg = Hypergraph::new(8, &edges, None, None, true);
        let phg = PartitionedHypergraph::new(2, &mut hg);
        for u in 0..8 {
            phg.set_only_node_part(u, 0);
        }
        phg.initialize_partition();
        let mut context = Context::default();
        context.epsilon = 0.25;
        let ceilings = context.max_part_weights(8);

        // Act
        let balanced = Rebalancer::new(&context).rebalance(&phg);

        // Assert
        assert!(balanced);
        for p in 0..2 {
            assert!(phg.part_weight(p) <= ceilings[p as usize]);
        }
        assert!(phg.check_tracked_partition_information());
    }

    #[test]
    fn test_rebalancer_reports_failure_for_oversized_vertex() {
        // Arrange: a vertex heavier than any ceiling
        let mut hg = Hypergraph::new(3, &[vec![0, 1, 2]], None, Some(&[10, 1, 1]), true);
        let phg = PartitionedHypergraph::new(2, &mut hg);
        phg.set_only_node_part(0, 0);
        phg.set_only_node_part(1, 0);
        phg.set_only_node_part(2, 1);
        phg.initialize_partition();
        let mut context = Context::default();
        context.epsilon = 0.1;

        // Act
        let balanced = Rebalancer::new(&context).rebalance(&phg);

        // Assert: block 0 holds 11 > floor(1.1·6) = 6 and vertex 0 fits nowhere
        assert!(!balanced);
    }
}

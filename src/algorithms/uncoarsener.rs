use std::time::{Duration, Instant};

use rustc_hash::FxHashSet;

use crate::algorithms::coarsener::{MultilevelHierarchy, NLevelHierarchy};
use crate::algorithms::label_propagation::LabelPropagationRefiner;
use crate::algorithms::multitry_fm::MultiTryFmRefiner;
use crate::algorithms::rebalancer::Rebalancer;
use crate::config::Context;
use crate::hypergraph::Hypergraph;
use crate::partitioned::{Objective, PartitionedHypergraph};
use crate::{HypernodeId, PartitionId, NO_PART};

/// Runs the refinement cascade (label propagation, then multitry FM for the
/// km1 objective) until neither finds an improvement. The deadline is only
/// consulted between refiner invocations and FM rounds; in-flight moves
/// always complete.
pub(crate) fn refine_partition(
    context: &Context,
    phg: &mut PartitionedHypergraph<'_>,
    nodes: Option<&[HypernodeId]>,
    deadline: Option<Instant>,
) {
    loop {
        let mut improvement = false;
        improvement |= LabelPropagationRefiner::new(context).refine(phg, nodes);
        if context.objective == Objective::Km1 && context.fm.multitry_rounds > 0 {
            improvement |= MultiTryFmRefiner::new(context).refine(phg, nodes, deadline);
        }
        if !improvement || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }
}

pub(crate) fn is_balanced(context: &Context, phg: &PartitionedHypergraph<'_>) -> bool {
    let max_part_weights = context.max_part_weights(phg.total_weight());
    (0..phg.k()).all(|p| phg.part_weight(p) <= max_part_weights[p as usize])
}

fn apply_partition(phg: &PartitionedHypergraph<'_>, assignment: &[PartitionId]) {
    for u in phg.nodes() {
        debug_assert!(assignment[u as usize] != NO_PART);
        phg.set_only_node_part(u, assignment[u as usize]);
    }
    phg.initialize_partition();
}

fn snapshot_partition(phg: &PartitionedHypergraph<'_>) -> Vec<PartitionId> {
    (0..phg.num_nodes()).map(|u| phg.part_id(u)).collect()
}

/// Multilevel uncoarsening: pops levels off the coarsening stack, projects
/// the partition from coarse to fine and refines at every level. The final
/// level is refined under the configured time limit and rebalanced if the
/// balance constraint is violated.
pub struct MultilevelUncoarsener<'c> {
    context: &'c Context,
}

impl<'c> MultilevelUncoarsener<'c> {
    pub fn new(context: &'c Context) -> Self {
        MultilevelUncoarsener { context }
    }

    /// Walks the hierarchy from the coarsest level down to `input`,
    /// returning the partition of `input`'s vertices.
    pub fn uncoarsen(
        &self,
        input: &mut Hypergraph,
        hierarchy: &mut MultilevelHierarchy,
        coarsest_partition: Vec<PartitionId>,
    ) -> Vec<PartitionId> {
        let k = self.context.k;
        let mut current = coarsest_partition;

        for level in (0..hierarchy.hypergraphs.len()).rev() {
            {
                let mut phg = PartitionedHypergraph::new(k, &mut hierarchy.hypergraphs[level]);
                apply_partition(&phg, &current);
                refine_partition(self.context, &mut phg, None, None);
                current = snapshot_partition(&phg);
            }
            // Project: each finer vertex inherits its representative's block.
            let mapping = &hierarchy.mappings[level];
            current = mapping
                .iter()
                .map(|&coarse| {
                    if coarse == u32::MAX {
                        NO_PART
                    } else {
                        current[coarse as usize]
                    }
                })
                .collect();
        }

        let deadline = self
            .context
            .time_limit_secs
            .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
        let mut phg = PartitionedHypergraph::new(k, input);
        apply_partition(&phg, &current);
        refine_partition(self.context, &mut phg, None, deadline);
        if !is_balanced(self.context, &phg) {
            Rebalancer::new(self.context).rebalance(&phg);
        }
        snapshot_partition(&phg)
    }
}

/// N-level uncoarsening: walks the batch list in reverse, restores the nets
/// removed at each pass boundary, uncontracts batch by batch and runs
/// localized refinement around the touched border vertices once enough of
/// them accumulated.
pub struct NLevelUncoarsener<'c> {
    context: &'c Context,
}

impl<'c> NLevelUncoarsener<'c> {
    pub fn new(context: &'c Context) -> Self {
        NLevelUncoarsener { context }
    }

    /// `phg` must hold the initial partition of the coarsest state; on
    /// return it holds the refined partition of the fully restored
    /// hypergraph.
    pub fn uncoarsen(&self, phg: &mut PartitionedHypergraph<'_>, hierarchy: &NLevelHierarchy) {
        if self.context.objective == Objective::Km1 && !phg.gain_cache_initialized() {
            phg.initialize_gain_cache();
        }
        let deadline = self
            .context
            .time_limit_secs
            .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
        let min_border = self.context.fm.min_num_border_vertices.max(1);

        let mut buffer: Vec<HypernodeId> = Vec::new();
        let mut collected: FxHashSet<HypernodeId> = FxHashSet::default();
        for pass in hierarchy.passes.iter().rev() {
            phg.restore_single_pin_and_parallel_nets(&pass.removed_nets);
            for batch in &pass.batches {
                phg.uncontract(batch);
                for m in batch {
                    for x in [m.u, m.v] {
                        if !collected.contains(&x) && phg.is_border_node(x) {
                            collected.insert(x);
                            buffer.push(x);
                        }
                    }
                }
                let expired = deadline.is_some_and(|d| Instant::now() >= d);
                if buffer.len() >= min_border && !expired {
                    refine_partition(self.context, phg, Some(&buffer), deadline);
                    buffer.clear();
                    collected.clear();
                }
            }
            // Drain the buffer at the pass boundary.
            if !buffer.is_empty() && !deadline.is_some_and(|d| Instant::now() >= d) {
                refine_partition(self.context, phg, Some(&buffer), deadline);
                buffer.clear();
                collected.clear();
            }
        }

        refine_partition(self.context, phg, None, deadline);
        if !is_balanced(self.context, phg) {
            Rebalancer::new(self.context).rebalance(phg);
        }
    }
}

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashMap;

use crate::config::{AcceptancePolicy, Context, HeavyNodePenalty};
use crate::hypergraph::{build_uncontraction_batches, Batch, Hypergraph, RemovedNet};
use crate::{HypernodeId, NodeWeight};

/// One coarsening pass of the n-level scheme: the uncontraction batches of
/// the contractions performed in the pass, and the nets removed afterwards.
pub struct NLevelPass {
    pub batches: Vec<Batch>,
    pub removed_nets: Vec<RemovedNet>,
}

/// Product of n-level coarsening, consumed in reverse pass order.
pub struct NLevelHierarchy {
    pub passes: Vec<NLevelPass>,
}

/// Product of multilevel coarsening: successively coarser hypergraphs and
/// the vertex mapping from each level to the next.
pub struct MultilevelHierarchy {
    pub hypergraphs: Vec<Hypergraph>,
    /// `mappings[i]` maps the vertices of level i−1 (or the input hypergraph
    /// for i = 0) to the vertices of `hypergraphs[i]`.
    pub mappings: Vec<Vec<HypernodeId>>,
}

impl MultilevelHierarchy {
    pub fn coarsest(&self) -> Option<&Hypergraph> {
        self.hypergraphs.last()
    }
}

/// Heavy-edge coarsener. Every vertex picks the neighbor maximizing
/// `Σ w(e)/(|e|−1)` over shared nets, scaled down by a heavy-node penalty;
/// coarsening stops at `t·k` vertices or when a pass makes no progress.
pub struct Coarsener<'c> {
    context: &'c Context,
    rng: SmallRng,
}

struct RatingConstraints {
    max_node_weight: NodeWeight,
    /// Vertices above this degree neither select nor serve as targets.
    degree_threshold: Option<usize>,
}

impl<'c> Coarsener<'c> {
    pub fn new(context: &'c Context) -> Self {
        Coarsener {
            context,
            rng: SmallRng::seed_from_u64(context.seed),
        }
    }

    fn constraints(&self, hg: &Hypergraph) -> RatingConstraints {
        RatingConstraints {
            max_node_weight: self.context.max_coarse_node_weight(hg.total_weight()),
            degree_threshold: self
                .context
                .coarsening
                .use_degree_threshold
                .then(|| degree_skip_threshold(hg)),
        }
    }

    // ------------------------------------------------------------------
    // Multilevel
    // ------------------------------------------------------------------

    /// Coarsens by repeated cluster contraction, producing a level stack.
    pub fn coarsen_multilevel(&mut self, input: &Hypergraph) -> MultilevelHierarchy {
        // The degree statistic is taken once over the input, not per pass.
        let constraints = self.constraints(input);
        let limit = self.context.contraction_limit();
        let mut hierarchy = MultilevelHierarchy {
            hypergraphs: Vec::new(),
            mappings: Vec::new(),
        };

        loop {
            let current = hierarchy.hypergraphs.last().unwrap_or(input);
            if current.num_enabled_nodes() <= limit {
                break;
            }
            let Some(clustering) = self.cluster_pass(current, &constraints) else {
                break;
            };
            let (coarse, mapping) = current.contract_clustering(&clustering);
            hierarchy.hypergraphs.push(coarse);
            hierarchy.mappings.push(mapping);
        }
        hierarchy
    }

    /// One clustering pass: unmatched vertices join the cluster of their
    /// best-rated neighbor, provided the cluster stays light enough.
    /// Returns `None` when no vertex could be matched.
    fn cluster_pass(
        &mut self,
        hg: &Hypergraph,
        constraints: &RatingConstraints,
    ) -> Option<Vec<HypernodeId>> {
        let n = hg.num_nodes() as usize;
        let mut clustering: Vec<HypernodeId> = (0..n as u32).collect();
        let mut cluster_weight: Vec<NodeWeight> = (0..n as u32).map(|u| hg.node_weight(u)).collect();
        let mut matched = vec![false; n];

        let mut order: Vec<HypernodeId> = hg.nodes().collect();
        order.shuffle(&mut self.rng);

        let mut num_contractions = 0usize;
        for &u in &order {
            if matched[u as usize] {
                continue;
            }
            if let Some(threshold) = constraints.degree_threshold {
                if hg.node_degree(u) > threshold {
                    continue;
                }
            }
            let target = self.best_target(hg, u, constraints, |v| {
                let rep = clustering[v as usize];
                (
                    cluster_weight[rep as usize],
                    !matched[v as usize],
                    // A cluster representative must not join another cluster.
                    rep != u,
                )
            });
            if let Some(v) = target {
                let rep = clustering[v as usize];
                clustering[u as usize] = rep;
                cluster_weight[rep as usize] += hg.node_weight(u);
                matched[u as usize] = true;
                matched[rep as usize] = true;
                num_contractions += 1;
            }
        }
        (num_contractions > 0).then_some(clustering)
    }

    // ------------------------------------------------------------------
    // N-level
    // ------------------------------------------------------------------

    /// Coarsens in place, one contraction at a time, recording uncontraction
    /// batches per pass and removing single-pin and parallel nets at every
    /// pass boundary.
    pub fn coarsen_nlevel(&mut self, hg: &mut Hypergraph) -> NLevelHierarchy {
        let constraints = self.constraints(hg);
        let limit = self.context.contraction_limit();
        let max_batch_size = self.context.coarsening.max_batch_size;
        let mut passes = Vec::new();

        while hg.num_enabled_nodes() > limit {
            let mut order: Vec<HypernodeId> = hg.nodes().collect();
            order.shuffle(&mut self.rng);

            let n = hg.num_nodes() as usize;
            let mut used = vec![false; n];
            let mut mementos = Vec::new();
            for &v in &order {
                if used[v as usize] || !hg.node_enabled(v) {
                    continue;
                }
                if let Some(threshold) = constraints.degree_threshold {
                    if hg.node_degree(v) > threshold {
                        continue;
                    }
                }
                let target = self.best_target(hg, v, &constraints, |u| {
                    (hg.node_weight(u), !used[u as usize], !used[u as usize])
                });
                if let Some(u) = target {
                    mementos.push(hg.contract(u, v));
                    used[u as usize] = true;
                    used[v as usize] = true;
                    if hg.num_enabled_nodes() <= limit {
                        break;
                    }
                }
            }
            if mementos.is_empty() {
                break;
            }
            let batches = build_uncontraction_batches(&mementos, max_batch_size);
            let removed_nets = hg.remove_single_pin_and_parallel_nets();
            passes.push(NLevelPass {
                batches,
                removed_nets,
            });
        }
        NLevelHierarchy { passes }
    }

    // ------------------------------------------------------------------
    // Rating
    // ------------------------------------------------------------------

    /// Best contraction target for `u`. `target_info(v)` supplies the
    /// effective weight of `v`'s cluster, whether `v` counts as unmatched
    /// for the acceptance policy, and whether it is eligible at all.
    fn best_target(
        &self,
        hg: &Hypergraph,
        u: HypernodeId,
        constraints: &RatingConstraints,
        target_info: impl Fn(HypernodeId) -> (NodeWeight, bool, bool),
    ) -> Option<HypernodeId> {
        let mut ratings: FxHashMap<HypernodeId, (f64, u32)> = FxHashMap::default();
        for e in hg.incident_nets(u) {
            let score = hg.edge_weight(e) as f64 / (hg.edge_size(e) - 1).max(1) as f64;
            for pin in hg.pins(e) {
                if pin != u {
                    let entry = ratings.entry(pin).or_insert((0.0, 0));
                    entry.0 += score;
                    entry.1 += 1;
                }
            }
        }

        let wu = hg.node_weight(u);
        let prefer_unmatched =
            self.context.coarsening.acceptance == AcceptancePolicy::BestPreferUnmatched;
        let mut best: Option<(HypernodeId, f64, bool)> = None;
        for (&v, &(heavy_edge, freq)) in &ratings {
            let (wv, unmatched, eligible) = target_info(v);
            if !eligible
                || wu + wv > constraints.max_node_weight
                || (self.context.use_community_structure && hg.community(u) != hg.community(v))
            {
                continue;
            }
            if let Some(threshold) = constraints.degree_threshold {
                if hg.node_degree(v) > threshold {
                    continue;
                }
            }
            let score = heavy_edge / self.penalty(wu, wv, freq);
            let better = match best {
                None => true,
                Some((_, best_score, best_unmatched)) => {
                    score > best_score
                        || (score == best_score && prefer_unmatched && unmatched && !best_unmatched)
                }
            };
            if better {
                best = Some((v, score, unmatched));
            }
        }
        best.map(|(v, _, _)| v)
    }

    fn penalty(&self, wu: NodeWeight, wv: NodeWeight, freq: u32) -> f64 {
        match self.context.coarsening.heavy_node_penalty {
            HeavyNodePenalty::Multiplicative => ((wu * wv) as f64).max(1.0),
            HeavyNodePenalty::None => 1.0,
            HeavyNodePenalty::EdgeFrequency => {
                ((wu * wv) as f64).max(1.0) / (1.0 + freq as f64)
            }
        }
    }
}

/// Degree above which vertices are skipped during coarsening:
/// mean + 5·stdev over the enabled vertices.
fn degree_skip_threshold(hg: &Hypergraph) -> usize {
    let degrees: Vec<f64> = hg.nodes().map(|u| hg.node_degree(u) as f64).collect();
    if degrees.is_empty() {
        return usize::MAX;
    }
    let mean = degrees.iter().sum::<f64>() / degrees.len() as f64;
    let variance =
        degrees.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / degrees.len() as f64;
    (mean + 5.0 * variance.sqrt()).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HyperedgeId;

    fn two_cliques() -> Hypergraph {
        // Two tight groups bridged by one light net.
        Hypergraph::new(
            8,
            &[
                vec![0, 1],
                vec![1, 2],
                vec![2, 3],
                vec![0, 3],
                vec![4, 5],
                vec![5, 6],
                vec![6, 7],
                vec![4, 7],
                vec![3, 4],
            ],
            Some(&[4, 4, 4, 4, 4, 4, 4, 4, 1]),
            None,
            true,
        )
    }

    fn test_context(k: i32, t: u32) -> Context {
        let mut context = Context::default();
        context.k = k;
        context.seed = 7;
        context.use_community_structure = false;
        context.coarsening.contraction_limit_multiplier = t;
        context
    }

    #[test]
    fn test_multilevel_coarsening_respects_contraction_limit() {
        // Arrange
        let hg = two_cliques();
        let context = test_context(2, 2);
        let mut coarsener = Coarsener::new(&context);

        // Act
        let hierarchy = coarsener.coarsen_multilevel(&hg);

        // Assert
        let coarsest = hierarchy.coarsest().expect("no coarsening happened");
        assert!(coarsest.num_enabled_nodes() <= 4);
        assert!(coarsest.num_enabled_nodes() >= 2);
        assert_eq!(coarsest.total_weight(), hg.total_weight());
        assert_eq!(hierarchy.hypergraphs.len(), hierarchy.mappings.len());
    }

    #[test]
    fn test_cluster_weights_respect_limit() {
        // Arrange
        let hg = two_cliques();
        let mut context = test_context(2, 2);
        context.coarsening.max_allowed_weight_multiplier = 1.0;
        let max_weight = context.max_coarse_node_weight(hg.total_weight());
        let mut coarsener = Coarsener::new(&context);

        // Act
        let hierarchy = coarsener.coarsen_multilevel(&hg);

        // Assert
        for level in &hierarchy.hypergraphs {
            for u in level.nodes() {
                assert!(level.node_weight(u) <= max_weight);
            }
        }
    }

    #[test]
    fn test_nlevel_round_trip_reconstructs_hypergraph() {
        // Arrange
        let mut hg = two_cliques();
        let snapshot: Vec<Vec<HypernodeId>> = (0..hg.num_edges())
            .map(|e| {
                let mut pins: Vec<_> = hg.pins(e).collect();
                pins.sort_unstable();
                pins
            })
            .collect();
        let weights: Vec<_> = (0..hg.num_edges()).map(|e| hg.edge_weight(e)).collect();
        let context = test_context(2, 1);
        let mut coarsener = Coarsener::new(&context);

        // Act
        let hierarchy = coarsener.coarsen_nlevel(&mut hg);
        assert!(hg.num_enabled_nodes() < 8);
        for pass in hierarchy.passes.iter().rev() {
            hg.restore_removed_nets(&pass.removed_nets);
            for batch in &pass.batches {
                hg.uncontract_pins(batch, |_, _, _| {}, |_, _, _| {});
                hg.uncontract_finish(batch);
            }
        }

        // Assert: invariant 6, the original hypergraph is reconstructed
        assert_eq!(hg.num_enabled_nodes(), 8);
        for e in 0..hg.num_edges() {
            assert!(hg.edge_enabled(e as HyperedgeId));
            let mut pins: Vec<_> = hg.pins(e).collect();
            pins.sort_unstable();
            assert_eq!(pins, snapshot[e as usize]);
            assert_eq!(hg.edge_weight(e), weights[e as usize]);
        }
        for u in hg.nodes() {
            assert_eq!(hg.node_weight(u), 1);
            for e in hg.incident_nets(u) {
                assert!(hg.pins(e).any(|p| p == u));
            }
        }
    }
}

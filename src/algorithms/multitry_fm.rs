use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::config::Context;
use crate::gain::{km1_delta, Km1GainCache};
use crate::partitioned::PartitionedHypergraph;
use crate::pqueue::IndexedMaxHeap;
use crate::work_queue::WorkQueue;
use crate::{EdgeWeight, HypernodeId, NodeWeight, PartitionId, NO_PART};

/// A move accepted by some localized search, in global apply order, with the
/// exact km1 delta collected from its own serialized per-net updates.
#[derive(Debug, Clone, Copy)]
struct AppliedMove {
    node: HypernodeId,
    from: PartitionId,
    to: PartitionId,
    delta: EdgeWeight,
}

/// Claims vertices for localized searches so no two concurrent searches
/// move the same vertex. Zero means unclaimed.
struct NodeTracker {
    search_of_node: Vec<AtomicU32>,
}

impl NodeTracker {
    fn new(num_nodes: usize) -> Self {
        NodeTracker {
            search_of_node: (0..num_nodes).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn claim(&self, v: HypernodeId, search: u32) -> bool {
        self.search_of_node[v as usize]
            .compare_exchange(0, search, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    fn owner(&self, v: HypernodeId) -> u32 {
        self.search_of_node[v as usize].load(Ordering::Relaxed)
    }

    fn release(&self, v: HypernodeId) {
        self.search_of_node[v as usize].store(0, Ordering::Release);
    }

    fn reset(&self) {
        self.search_of_node
            .par_iter()
            .for_each(|s| s.store(0, Ordering::Relaxed));
    }
}

struct FmSharedData {
    tracker: NodeTracker,
    /// Cached best destination per vertex, kept alongside the PQ keys.
    target_part: Vec<AtomicI32>,
    move_log: Mutex<Vec<AppliedMove>>,
    search_counter: AtomicU32,
}

impl FmSharedData {
    fn new(num_nodes: usize) -> Self {
        FmSharedData {
            tracker: NodeTracker::new(num_nodes),
            target_part: (0..num_nodes).map(|_| AtomicI32::new(NO_PART)).collect(),
            move_log: Mutex::new(Vec::new()),
            search_counter: AtomicU32::new(0),
        }
    }

    fn next_search_id(&self) -> u32 {
        self.search_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Parallel localized FM with global rollback (multitry k-way FM).
///
/// Every round streams the border vertices into a bucketed work queue;
/// workers pop seed vertices, run localized priority-queue searches that
/// apply gain-cache-verified moves, and a global scan rolls the move
/// sequence back to the best observed prefix. Rounds repeat while the
/// previous round improved the objective.
pub struct MultiTryFmRefiner<'c> {
    context: &'c Context,
}

impl<'c> MultiTryFmRefiner<'c> {
    pub fn new(context: &'c Context) -> Self {
        MultiTryFmRefiner { context }
    }

    /// Refines the partition; the gain cache is initialized on demand.
    /// `refinement_nodes` localizes the search (n-level); the deadline is
    /// checked between rounds and between searches.
    pub fn refine(
        &self,
        phg: &mut PartitionedHypergraph<'_>,
        refinement_nodes: Option<&[HypernodeId]>,
        deadline: Option<Instant>,
    ) -> bool {
        if !phg.gain_cache_initialized() {
            phg.initialize_gain_cache();
        }
        let phg: &PartitionedHypergraph<'_> = phg;
        let max_part_weights = self.context.max_part_weights(phg.total_weight());
        let shared = FmSharedData::new(phg.num_nodes() as usize);
        let num_workers = rayon::current_num_threads().max(1);

        let mut overall_improved = false;
        for round in 0..self.context.fm.multitry_rounds {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            let mut queue = WorkQueue::new(num_workers, phg.num_nodes() as usize);
            self.collect_refinement_nodes(phg, refinement_nodes, &queue);
            if queue.is_empty() {
                break;
            }
            if self.context.fm.shuffle {
                queue.shuffle(self.context.seed.wrapping_add(round as u64));
            }

            let km1_before = phg.km1();
            rayon::scope(|scope| {
                for worker in 0..num_workers {
                    let queue = &queue;
                    let shared = &shared;
                    let max_part_weights = &max_part_weights;
                    scope.spawn(move |_| {
                        let mut search = LocalizedSearch::new(phg.k() as usize);
                        loop {
                            if deadline.is_some_and(|d| Instant::now() >= d) {
                                break;
                            }
                            let seeds = self.pop_seeds(phg, queue, shared, worker);
                            if seeds.is_empty() {
                                break;
                            }
                            let search_id = shared.next_search_id();
                            search.run(
                                self.context,
                                phg,
                                shared,
                                max_part_weights,
                                &seeds,
                                search_id,
                            );
                        }
                    });
                }
            });

            let improvement = self.rollback_to_best_prefix(phg, &shared, km1_before);
            shared.tracker.reset();
            log::debug!("fm round {round}: improvement {improvement}");
            if improvement > 0 {
                overall_improved = true;
            } else {
                break;
            }
        }
        overall_improved
    }

    fn collect_refinement_nodes(
        &self,
        phg: &PartitionedHypergraph<'_>,
        refinement_nodes: Option<&[HypernodeId]>,
        queue: &WorkQueue,
    ) {
        match refinement_nodes {
            Some(nodes) => {
                nodes.par_iter().for_each(|&u| {
                    if phg.node_enabled(u) && phg.is_border_node(u) {
                        queue.push(u, rayon::current_thread_index().unwrap_or(0));
                    }
                });
            }
            None => {
                (0..phg.num_nodes()).into_par_iter().for_each(|u| {
                    if phg.node_enabled(u) && phg.is_border_node(u) {
                        queue.push(u, rayon::current_thread_index().unwrap_or(0));
                    }
                });
            }
        }
    }

    /// Pops up to `num_seed_nodes` claimable border vertices for one search.
    fn pop_seeds(
        &self,
        phg: &PartitionedHypergraph<'_>,
        queue: &WorkQueue,
        shared: &FmSharedData,
        worker: usize,
    ) -> Vec<HypernodeId> {
        let mut seeds = Vec::new();
        while seeds.len() < self.context.fm.num_seed_nodes as usize {
            let Some(u) = queue.try_pop(worker) else {
                break;
            };
            if phg.is_border_node(u) && shared.tracker.owner(u) == 0 {
                seeds.push(u);
            }
        }
        seeds
    }

    /// Scans the global move log for the prefix with the lowest cumulative
    /// objective and reverts every later move (balance violations among the
    /// reverted moves are forgiven by reverting without a ceiling). Under
    /// heavy contention the log order may skew the prefix estimate, so the
    /// result is checked against a recomputation and the whole round is
    /// reverted when it did not improve.
    fn rollback_to_best_prefix(
        &self,
        phg: &PartitionedHypergraph<'_>,
        shared: &FmSharedData,
        km1_before: EdgeWeight,
    ) -> EdgeWeight {
        let mut log = shared.move_log.lock();
        let mut best_cum = 0;
        let mut best_idx = 0;
        let mut cum = 0;
        for (i, m) in log.iter().enumerate() {
            cum += m.delta;
            if cum < best_cum {
                best_cum = cum;
                best_idx = i + 1;
            }
        }
        self.revert_suffix(phg, &log, best_idx);
        repair_mover_penalties(phg, &log);

        let km1_after = phg.km1();
        if km1_after > km1_before {
            // The prefix estimate was skewed by concurrent updates on shared
            // nets; fall back to reverting the complete round.
            self.revert_suffix(phg, &log[..best_idx], 0);
            repair_mover_penalties(phg, &log);
            log.clear();
            return 0;
        }
        log.clear();
        km1_before - km1_after
    }

    fn revert_suffix(
        &self,
        phg: &PartitionedHypergraph<'_>,
        log: &[AppliedMove],
        keep: usize,
    ) {
        for m in log[keep..].iter().rev() {
            debug_assert_eq!(phg.part_id(m.node), m.to);
            phg.change_node_part_km1(
                m.node,
                m.to,
                m.from,
                NodeWeight::MAX,
                || {},
                |_, _, _, _, _| {},
            );
        }
    }
}

/// One worker's localized search state: a vertex PQ per block keyed by the
/// best gain to the vertex's best destination, and a block PQ keyed by the
/// top gain of the corresponding vertex PQ.
struct LocalizedSearch {
    vertex_pqs: Vec<IndexedMaxHeap>,
    block_pq: IndexedMaxHeap,
    touched: Vec<HypernodeId>,
    moved: FxHashSet<HypernodeId>,
}

impl LocalizedSearch {
    fn new(k: usize) -> Self {
        LocalizedSearch {
            vertex_pqs: (0..k).map(|_| IndexedMaxHeap::new()).collect(),
            block_pq: IndexedMaxHeap::new(),
            touched: Vec::new(),
            moved: FxHashSet::default(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &mut self,
        context: &Context,
        phg: &PartitionedHypergraph<'_>,
        shared: &FmSharedData,
        max_part_weights: &[NodeWeight],
        seeds: &[HypernodeId],
        search_id: u32,
    ) {
        for &seed in seeds {
            if shared.tracker.claim(seed, search_id) {
                self.touched.push(seed);
                self.insert_into_pq(phg, shared, max_part_weights, seed);
            }
        }
        self.update_block_pq();

        let mut local_moves = 0usize;
        while local_moves < context.fm.max_moves_per_search {
            let Some((u, from, to, gain)) =
                self.find_next_move(phg, shared, max_part_weights)
            else {
                break;
            };
            if gain <= 0 {
                // No positive-gain move under the current balance constraint.
                break;
            }

            let mut delta: EdgeWeight = 0;
            let moved = phg.change_node_part_km1(
                u,
                from,
                to,
                max_part_weights[to as usize],
                || {},
                |_, we, _, nf, nt| delta += km1_delta(we, nf, nt),
            );
            if moved {
                local_moves += 1;
                self.moved.insert(u);
                shared.move_log.lock().push(AppliedMove {
                    node: u,
                    from,
                    to,
                    delta,
                });
                self.expand_neighborhood(phg, shared, max_part_weights, u, from, to, search_id);
            }
            self.update_block_pq();
        }

        self.finish(context, shared, local_moves);
    }

    fn insert_into_pq(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        shared: &FmSharedData,
        max_part_weights: &[NodeWeight],
        v: HypernodeId,
    ) {
        if let Some((target, gain)) = best_destination(phg, v, max_part_weights) {
            shared.target_part[v as usize].store(target, Ordering::Relaxed);
            self.vertex_pqs[phg.part_id(v) as usize].insert(v, gain);
        }
    }

    /// Extracts the globally best move candidate, verifying the cached gain
    /// against a fresh recomputation and reinserting with the new key when
    /// it became stale.
    fn find_next_move(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        shared: &FmSharedData,
        max_part_weights: &[NodeWeight],
    ) -> Option<(HypernodeId, PartitionId, PartitionId, EdgeWeight)> {
        loop {
            let (from, _) = self.block_pq.top()?;
            let from = from as PartitionId;
            let Some((u, estimated_gain)) = self.vertex_pqs[from as usize].top() else {
                self.block_pq.remove(from as u32);
                continue;
            };
            match best_destination(phg, u, max_part_weights) {
                Some((to, gain)) if gain >= estimated_gain => {
                    self.vertex_pqs[from as usize].pop();
                    shared.target_part[u as usize].store(to, Ordering::Relaxed);
                    return Some((u, from, to, gain));
                }
                Some((to, gain)) => {
                    shared.target_part[u as usize].store(to, Ordering::Relaxed);
                    self.vertex_pqs[from as usize].adjust_key(u, gain);
                    self.refresh_block_key(from);
                }
                None => {
                    self.vertex_pqs[from as usize].pop();
                    self.refresh_block_key(from);
                }
            }
        }
    }

    /// After a move, claims untouched neighbors into the PQ and refreshes
    /// the keys of neighbors this search already holds.
    #[allow(clippy::too_many_arguments)]
    fn expand_neighborhood(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        shared: &FmSharedData,
        max_part_weights: &[NodeWeight],
        u: HypernodeId,
        move_from: PartitionId,
        move_to: PartitionId,
        search_id: u32,
    ) {
        for e in phg.incident_nets(u) {
            for v in phg.pins(e) {
                if v == u {
                    continue;
                }
                let owner = shared.tracker.owner(v);
                if owner == 0 {
                    if shared.tracker.claim(v, search_id) {
                        self.touched.push(v);
                        self.insert_into_pq(phg, shared, max_part_weights, v);
                    }
                } else if owner == search_id {
                    self.update_gain(phg, shared, max_part_weights, v, move_from, move_to);
                }
            }
        }
    }

    /// Refreshes the cached gain of `v` after a neighboring move. When the
    /// designated target is unaffected by the move, only the move's source
    /// and target blocks can be better; otherwise all blocks are rescanned.
    #[allow(clippy::too_many_arguments)]
    fn update_gain(
        &mut self,
        phg: &PartitionedHypergraph<'_>,
        shared: &FmSharedData,
        max_part_weights: &[NodeWeight],
        v: HypernodeId,
        move_from: PartitionId,
        move_to: PartitionId,
    ) {
        let pv = phg.part_id(v);
        if !self.vertex_pqs[pv as usize].contains(v) {
            return;
        }
        let designated = shared.target_part[v as usize].load(Ordering::Relaxed);
        let fresh = if phg.k() < 4 || designated == move_from || designated == move_to {
            best_destination(phg, v, max_part_weights)
        } else {
            best_of_candidates(
                phg,
                v,
                max_part_weights,
                [designated, move_from, move_to],
            )
        };
        match fresh {
            Some((target, gain)) => {
                shared.target_part[v as usize].store(target, Ordering::Relaxed);
                self.vertex_pqs[pv as usize].adjust_key(v, gain);
            }
            None => self.vertex_pqs[pv as usize].remove(v),
        }
    }

    fn refresh_block_key(&mut self, block: PartitionId) {
        match self.vertex_pqs[block as usize].top() {
            Some((_, key)) => self.block_pq.insert_or_adjust(block as u32, key),
            None => self.block_pq.remove(block as u32),
        }
    }

    fn update_block_pq(&mut self) {
        for block in 0..self.vertex_pqs.len() {
            self.refresh_block_key(block as PartitionId);
        }
    }

    /// Ends the search: with the multitry release policy, vertices that were
    /// claimed but never moved are handed back so later searches may use
    /// them as seeds. Moved vertices stay claimed until the round ends.
    fn finish(&mut self, context: &Context, shared: &FmSharedData, local_moves: usize) {
        if context.fm.release_nodes && local_moves > 0 {
            for &v in &self.touched {
                if !self.moved.contains(&v) {
                    shared.tracker.release(v);
                }
            }
        }
        for pq in &mut self.vertex_pqs {
            pq.clear();
        }
        self.block_pq.clear();
        self.touched.clear();
        self.moved.clear();
    }
}

/// Flip-event scans identify pins by their current block, so a vertex
/// observed in the middle of its own move can collect a misattributed
/// penalty update on a shared net; the terms of this round's movers are
/// recomputed once the rollback settled.
fn repair_mover_penalties(phg: &PartitionedHypergraph<'_>, log: &[AppliedMove]) {
    for m in log {
        phg.gain_cache()
            .set_penalty(m.node, Km1GainCache::recompute_penalty(phg, m.node));
    }
}

/// Best destination block of `v` by cached gain, restricted to blocks whose
/// weight stays under the ceiling; ties prefer the lighter block.
fn best_destination(
    phg: &PartitionedHypergraph<'_>,
    v: HypernodeId,
    max_part_weights: &[NodeWeight],
) -> Option<(PartitionId, EdgeWeight)> {
    let from = phg.part_id(v);
    let wv = phg.node_weight(v);
    let mut best: Option<(PartitionId, EdgeWeight, NodeWeight)> = None;
    for p in 0..phg.k() {
        if p == from {
            continue;
        }
        let to_weight = phg.part_weight(p);
        if to_weight + wv > max_part_weights[p as usize] {
            continue;
        }
        let gain = phg.km1_gain(v, p);
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

fn best_of_candidates(
    phg: &PartitionedHypergraph<'_>,
    v: HypernodeId,
    max_part_weights: &[NodeWeight],
    candidates: [PartitionId; 3],
) -> Option<(PartitionId, EdgeWeight)> {
    let from = phg.part_id(v);
    let wv = phg.node_weight(v);
    let mut best: Option<(PartitionId, EdgeWeight, NodeWeight)> = None;
    for p in candidates {
        // Duplicate candidates are harmless; they compare equal and lose.
        if p == from || p == NO_PART {
            continue;
        }
        let to_weight = phg.part_weight(p);
        if to_weight + wv > max_part_weights[p as usize] {
            continue;
        }
        let gain = phg.km1_gain(v, p);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypergraph::Hypergraph;
    use crate::PartitionId;

    /// A single-thread pool makes the search schedule, and with it the
    /// accepted moves, reproducible across runs.
    fn single_threaded<R: Send>(f: impl FnOnce() -> R + Send) -> R {
        rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap()
            .install(f)
    }

    fn two_cliques() -> Hypergraph {
        Hypergraph::new(
            8,
            &[
                vec![0, 1, 2, 3],
                vec![0, 1],
                vec![2, 3],
                vec![4, 5, 6, 7],
                vec![4, 5],
                vec![6, 7],
                vec![3, 4],
            ],
            None,
            None,
            true,
        )
    }

    fn fm_context() -> Context {
        let mut context = Context::default();
        context.k = 2;
        context.epsilon = 0.5;
        context.seed = 11;
        context.fm.shuffle = false;
        context
    }

    #[test]
    fn test_fm_untangles_mixed_cliques() {
        // Arrange: each clique is split across both blocks
        let mut hg = two_cliques();
        let mut phg = PartitionedHypergraph::new(2, &mut hg);
        for (u, p) in [(0, 0), (1, 1), (2, 0), (3, 1), (4, 0), (5, 1), (6, 0), (7, 1)] {
            phg.set_only_node_part(u, p);
        }
        phg.initialize_partition();
        let km1_before = phg.km1();
        let context = fm_context();

        // Act
        let improved =
            single_threaded(|| MultiTryFmRefiner::new(&context).refine(&mut phg, None, None));

        // Assert
        assert!(improved);
        assert!(phg.km1() < km1_before);
        assert!(phg.check_tracked_partition_information());
        assert!(phg.gain_cache().verify(&phg));
    }

    #[test]
    fn test_fm_never_worsens_the_objective() {
        // Arrange: random-ish partition of a denser hypergraph
        let edges: Vec<Vec<HypernodeId>> = (0..24)
            .map(|i| vec![i, (i + 3) % 24, (i + 8) % 24])
            .collect();
        let mut hg = Hypergraph::new(24, &edges, None, None, true);
        let mut phg = PartitionedHypergraph::new(3, &mut hg);
        for u in 0..24u32 {
            phg.set_only_node_part(u, ((u * 7 + 3) % 3) as PartitionId);
        }
        phg.initialize_partition();
        let km1_before = phg.km1();
        let mut context = fm_context();
        context.k = 3;

        // Act
        single_threaded(|| MultiTryFmRefiner::new(&context).refine(&mut phg, None, None));

        // Assert: rollback to the best prefix is monotone
        assert!(phg.km1() <= km1_before);
        assert!(phg.check_tracked_partition_information());
    }

    #[test]
    fn test_localized_refinement_only_touches_reachable_vertices() {
        // Arrange: two far-apart components, seeds only in the first
        let mut hg = Hypergraph::new(
            8,
            &[
                vec![0, 1, 2],
                vec![1, 2, 3],
                vec![4, 5, 6],
                vec![5, 6, 7],
            ],
            None,
            None,
            true,
        );
        let mut phg = PartitionedHypergraph::new(2, &mut hg);
        for (u, p) in [(0, 0), (1, 1), (2, 0), (3, 0), (4, 0), (5, 1), (6, 0), (7, 1)] {
            phg.set_only_node_part(u, p);
        }
        phg.initialize_partition();
        let context = fm_context();
        let second_component_before: Vec<PartitionId> =
            (4..8).map(|u| phg.part_id(u)).collect();

        // Act
        single_threaded(|| {
            MultiTryFmRefiner::new(&context).refine(&mut phg, Some(&[0, 1, 2, 3]), None)
        });

        // Assert: the second component was never seeded or expanded into
        let second_component_after: Vec<PartitionId> = (4..8).map(|u| phg.part_id(u)).collect();
        assert_eq!(second_component_before, second_component_after);
        assert!(phg.check_tracked_partition_information());
    }
}

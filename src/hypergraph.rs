use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::{EdgeWeight, HyperedgeId, HypernodeId, NodeWeight};

/// A vertex of the hypergraph.
struct Hypernode {
    weight: AtomicI64,
    enabled: AtomicBool,
}

/// A net of the hypergraph. Pins live in a contiguous slice of the shared
/// incidence arena, `[first, first + size)`. Slots in
/// `[first + size, first + capacity)` hold pins disabled by contractions.
struct Hyperedge {
    first: usize,
    size: AtomicU32,
    weight: AtomicI64,
    hash: AtomicU64,
    enabled: AtomicBool,
}

/// Record of a single contraction: `u` absorbed `v`. `appended_nets` counts
/// the nets appended to `u`'s incident-net list by this contraction, so the
/// matching uncontraction can truncate them again.
#[derive(Debug, Clone, Copy)]
pub struct Memento {
    pub u: HypernodeId,
    pub v: HypernodeId,
    pub(crate) appended_nets: u32,
}

/// A batch of mementos that can be uncontracted in parallel: no two mementos
/// in a batch share a vertex, and batches are released in reverse
/// contraction order.
pub type Batch = Vec<Memento>;

/// A net removed during coarsening, to be restored during uncoarsening.
/// `representative: None` marks a single-pin net; otherwise the net was
/// parallel to `representative` and its weight was folded into it.
#[derive(Debug, Clone, Copy)]
pub struct RemovedNet {
    pub net: HyperedgeId,
    pub representative: Option<HyperedgeId>,
}

fn hash_id(x: HypernodeId) -> u64 {
    // splitmix64 finalizer; summed per pin so the edge hash is order-independent
    let mut z = (x as u64).wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Arena-backed hypergraph. Pin lists of all nets share one flat array, and
/// every vertex knows its incident nets. Both directions are built with a
/// prefix-sum pass and stay bidirectionally consistent through contractions
/// and uncontractions.
pub struct Hypergraph {
    hypernodes: Vec<Hypernode>,
    hyperedges: Vec<Hyperedge>,
    /// Flat pin arena. Mutated concurrently during batch uncontraction,
    /// hence atomic slots.
    incidence_array: Vec<AtomicU32>,
    incident_nets: Vec<Vec<HyperedgeId>>,
    communities: Vec<i32>,
    /// Per-net flag serializing pin-slot surgery during (un)contraction.
    acquired: Vec<AtomicBool>,
    /// Contraction forest: `parent[v] == v` for roots.
    parent: Vec<HypernodeId>,
    num_pins: usize,
    total_weight: NodeWeight,
    max_edge_size: usize,
}

impl Hypergraph {
    /// Builds a hypergraph from an edge vector and optional weights.
    ///
    /// The build runs in parallel: pin counts per net and thread-local
    /// incident-net histograms first, then a prefix sum for the arena
    /// offsets, then every net writes its pins and registers itself with
    /// each pin through an atomic per-vertex cursor.
    pub fn new(
        num_nodes: HypernodeId,
        edge_vector: &[Vec<HypernodeId>],
        edge_weights: Option<&[EdgeWeight]>,
        node_weights: Option<&[NodeWeight]>,
        stable_incident_nets: bool,
    ) -> Self {
        let n = num_nodes as usize;
        let m = edge_vector.len();

        let pins_per_net: Vec<usize> = edge_vector.par_iter().map(Vec::len).collect();
        let max_edge_size = pins_per_net.iter().copied().max().unwrap_or(0);

        // Thread-local histograms of incident-net counts, merged by summation.
        let incident_counts: Vec<usize> = edge_vector
            .par_iter()
            .fold(
                || vec![0usize; n],
                |mut local, pins| {
                    for &p in pins {
                        debug_assert!((p as usize) < n);
                        local[p as usize] += 1;
                    }
                    local
                },
            )
            .reduce(
                || vec![0usize; n],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    a
                },
            );

        // Prefix sums: arena offsets per net, incident-net offsets per vertex.
        let mut edge_offsets = Vec::with_capacity(m + 1);
        let mut acc = 0usize;
        for &c in &pins_per_net {
            edge_offsets.push(acc);
            acc += c;
        }
        edge_offsets.push(acc);
        let num_pins = acc;

        let mut node_offsets = Vec::with_capacity(n + 1);
        let mut acc = 0usize;
        for &c in &incident_counts {
            node_offsets.push(acc);
            acc += c;
        }
        node_offsets.push(acc);

        let incidence_array: Vec<AtomicU32> =
            (0..num_pins).map(|_| AtomicU32::new(u32::MAX)).collect();
        let incident_arena: Vec<AtomicU32> =
            (0..num_pins).map(|_| AtomicU32::new(u32::MAX)).collect();
        let cursors: Vec<AtomicU32> = incident_counts
            .iter()
            .map(|&c| AtomicU32::new(c as u32))
            .collect();

        let hyperedges: Vec<Hyperedge> = (0..m)
            .into_par_iter()
            .map(|e| {
                let pins = &edge_vector[e];
                let first = edge_offsets[e];
                let mut hash = 0u64;
                for (i, &p) in pins.iter().enumerate() {
                    hash = hash.wrapping_add(hash_id(p));
                    incidence_array[first + i].store(p, Ordering::Relaxed);
                    let slot = cursors[p as usize].fetch_sub(1, Ordering::Relaxed) - 1;
                    incident_arena[node_offsets[p as usize] + slot as usize]
                        .store(e as u32, Ordering::Relaxed);
                }
                Hyperedge {
                    first,
                    size: AtomicU32::new(pins.len() as u32),
                    weight: AtomicI64::new(edge_weights.map_or(1, |w| w[e])),
                    hash: AtomicU64::new(hash),
                    enabled: AtomicBool::new(true),
                }
            })
            .collect();

        let mut incident_nets: Vec<Vec<HyperedgeId>> = (0..n)
            .into_par_iter()
            .map(|u| {
                incident_arena[node_offsets[u]..node_offsets[u + 1]]
                    .iter()
                    .map(|e| e.load(Ordering::Relaxed))
                    .collect()
            })
            .collect();
        if stable_incident_nets {
            incident_nets.par_iter_mut().for_each(|nets| nets.sort_unstable());
        }

        let hypernodes: Vec<Hypernode> = (0..n)
            .map(|u| Hypernode {
                weight: AtomicI64::new(node_weights.map_or(1, |w| w[u])),
                enabled: AtomicBool::new(true),
            })
            .collect();
        let total_weight = hypernodes
            .iter()
            .map(|hn| hn.weight.load(Ordering::Relaxed))
            .sum();

        Hypergraph {
            hypernodes,
            hyperedges,
            incidence_array,
            incident_nets,
            communities: vec![0; n],
            acquired: (0..m).map(|_| AtomicBool::new(false)).collect(),
            parent: (0..num_nodes).collect(),
            num_pins,
            total_weight,
            max_edge_size,
        }
    }

    // ------------------------------------------------------------------
    // Stats and accessors
    // ------------------------------------------------------------------

    /// Number of vertex slots, including disabled ones.
    pub fn num_nodes(&self) -> HypernodeId {
        self.hypernodes.len() as HypernodeId
    }

    /// Number of net slots, including disabled ones.
    pub fn num_edges(&self) -> HyperedgeId {
        self.hyperedges.len() as HyperedgeId
    }

    pub fn num_pins(&self) -> usize {
        self.num_pins
    }

    pub fn total_weight(&self) -> NodeWeight {
        self.total_weight
    }

    pub fn max_edge_size(&self) -> usize {
        self.max_edge_size
    }

    pub fn num_enabled_nodes(&self) -> usize {
        self.hypernodes
            .iter()
            .filter(|hn| hn.enabled.load(Ordering::Relaxed))
            .count()
    }

    pub fn node_enabled(&self, u: HypernodeId) -> bool {
        self.hypernodes[u as usize].enabled.load(Ordering::Relaxed)
    }

    pub fn edge_enabled(&self, e: HyperedgeId) -> bool {
        self.hyperedges[e as usize].enabled.load(Ordering::Relaxed)
    }

    pub fn node_weight(&self, u: HypernodeId) -> NodeWeight {
        self.hypernodes[u as usize].weight.load(Ordering::Relaxed)
    }

    pub fn edge_weight(&self, e: HyperedgeId) -> EdgeWeight {
        self.hyperedges[e as usize].weight.load(Ordering::Relaxed)
    }

    pub fn edge_size(&self, e: HyperedgeId) -> usize {
        self.hyperedges[e as usize].size.load(Ordering::Relaxed) as usize
    }

    pub fn edge_hash(&self, e: HyperedgeId) -> u64 {
        self.hyperedges[e as usize].hash.load(Ordering::Relaxed)
    }

    pub fn community(&self, u: HypernodeId) -> i32 {
        self.communities[u as usize]
    }

    pub fn set_communities(&mut self, communities: Vec<i32>) {
        assert_eq!(communities.len(), self.hypernodes.len());
        self.communities = communities;
    }

    /// Length of the incident-net list of `u`, counting nets currently
    /// disabled by the coarsener. Cheap; used for degree thresholds.
    pub fn node_degree(&self, u: HypernodeId) -> usize {
        self.incident_nets[u as usize].len()
    }

    /// Enabled vertices.
    pub fn nodes(&self) -> impl Iterator<Item = HypernodeId> + '_ {
        (0..self.num_nodes()).filter(move |&u| self.node_enabled(u))
    }

    /// Enabled nets.
    pub fn edges(&self) -> impl Iterator<Item = HyperedgeId> + '_ {
        (0..self.num_edges()).filter(move |&e| self.edge_enabled(e))
    }

    /// Active pins of net `e`.
    pub fn pins(&self, e: HyperedgeId) -> impl Iterator<Item = HypernodeId> + '_ {
        let he = &self.hyperedges[e as usize];
        let first = he.first;
        let size = he.size.load(Ordering::Relaxed) as usize;
        self.incidence_array[first..first + size]
            .iter()
            .map(|p| p.load(Ordering::Relaxed))
    }

    /// Enabled nets incident to `u`.
    pub fn incident_nets(&self, u: HypernodeId) -> impl Iterator<Item = HyperedgeId> + '_ {
        self.incident_nets[u as usize]
            .iter()
            .copied()
            .filter(move |&e| self.edge_enabled(e))
    }

    /// Contraction forest parent of `v` (`v` itself for roots).
    pub fn forest_parent(&self, v: HypernodeId) -> HypernodeId {
        self.parent[v as usize]
    }

    // ------------------------------------------------------------------
    // Contraction / uncontraction
    // ------------------------------------------------------------------

    /// Contracts `v` into `u`: `v`'s pins become `u`'s, `v` is disabled and
    /// recorded as a child of `u` in the contraction forest.
    ///
    /// For every net of `v`, either `u` is already a pin (the net shrinks:
    /// `v` is swapped just past the active range) or `v`'s slot is
    /// overwritten with `u` (the net is appended to `u`'s incident list).
    pub fn contract(&mut self, u: HypernodeId, v: HypernodeId) -> Memento {
        debug_assert!(u != v);
        debug_assert!(self.node_enabled(u) && self.node_enabled(v));

        let nets_v = std::mem::take(&mut self.incident_nets[v as usize]);
        let mut appended = 0u32;
        for &e in &nets_v {
            if !self.edge_enabled(e) {
                continue;
            }
            let he = &self.hyperedges[e as usize];
            let first = he.first;
            let size = he.size.load(Ordering::Relaxed) as usize;
            let slice = &self.incidence_array[first..first + size];
            let pos_v = slice
                .iter()
                .position(|p| p.load(Ordering::Relaxed) == v)
                .expect("incidence arrays out of sync");
            let contains_u = slice.iter().any(|p| p.load(Ordering::Relaxed) == u);
            if contains_u {
                // Shrink: park v at the first disabled slot.
                let last = size - 1;
                let tmp = slice[last].load(Ordering::Relaxed);
                slice[last].store(v, Ordering::Relaxed);
                slice[pos_v].store(tmp, Ordering::Relaxed);
                he.size.store(last as u32, Ordering::Relaxed);
                he.hash
                    .fetch_sub(hash_id(v), Ordering::Relaxed);
            } else {
                // Replace v by u in the net.
                slice[pos_v].store(u, Ordering::Relaxed);
                he.hash.fetch_add(
                    hash_id(u).wrapping_sub(hash_id(v)),
                    Ordering::Relaxed,
                );
                self.incident_nets[u as usize].push(e);
                appended += 1;
            }
        }
        self.incident_nets[v as usize] = nets_v;

        let wv = self.node_weight(v);
        self.hypernodes[u as usize]
            .weight
            .fetch_add(wv, Ordering::Relaxed);
        self.hypernodes[v as usize]
            .enabled
            .store(false, Ordering::Relaxed);
        self.parent[v as usize] = u;

        Memento {
            u,
            v,
            appended_nets: appended,
        }
    }

    /// Parallel pin-slot phase of a batch uncontraction. For every memento
    /// `(u, v)` and every net `e` of `v`, either `v` is found in the
    /// disabled range of `e` and re-activated (`case_one(u, v, e)`: both
    /// `u` and `v` are pins afterwards), or `u` occupies `v`'s old slot and
    /// is swapped back (`case_two(u, v, e)`: pin counts unchanged).
    ///
    /// Callbacks run while the net's surgery flag is held, so observers see
    /// each net's pin set in a consistent state.
    pub fn uncontract_pins<F, G>(&self, batch: &[Memento], case_one: F, case_two: G)
    where
        F: Fn(HypernodeId, HypernodeId, HyperedgeId) + Sync,
        G: Fn(HypernodeId, HypernodeId, HyperedgeId) + Sync,
    {
        batch.par_iter().for_each(|m| {
            let (u, v) = (m.u, m.v);
            debug_assert!(self.node_enabled(u));
            debug_assert!(!self.node_enabled(v));

            for &e in &self.incident_nets[v as usize] {
                if !self.edge_enabled(e) {
                    continue;
                }
                self.acquire_edge(e);
                let he = &self.hyperedges[e as usize];
                let first = he.first;
                let size = he.size.load(Ordering::Relaxed) as usize;
                let capacity = self.edge_capacity(e);
                let disabled = &self.incidence_array[first + size..first + capacity];
                if let Some(off) = disabled
                    .iter()
                    .position(|p| p.load(Ordering::Relaxed) == v)
                {
                    // v was shrunk out of e; swap it back to the boundary.
                    let boundary = &self.incidence_array[first + size];
                    let tmp = boundary.load(Ordering::Relaxed);
                    boundary.store(v, Ordering::Relaxed);
                    disabled[off].store(tmp, Ordering::Relaxed);
                    he.size.store((size + 1) as u32, Ordering::Relaxed);
                    he.hash.fetch_add(hash_id(v), Ordering::Relaxed);
                    case_one(u, v, e);
                } else {
                    let active = &self.incidence_array[first..first + size];
                    let pos_u = active
                        .iter()
                        .position(|p| p.load(Ordering::Relaxed) == u)
                        .expect("replaced pin not found during uncontraction");
                    active[pos_u].store(v, Ordering::Relaxed);
                    he.hash.fetch_add(
                        hash_id(v).wrapping_sub(hash_id(u)),
                        Ordering::Relaxed,
                    );
                    case_two(u, v, e);
                }
                self.release_edge(e);
            }

            let wv = self.node_weight(v);
            self.hypernodes[u as usize]
                .weight
                .fetch_sub(wv, Ordering::Relaxed);
            self.hypernodes[v as usize]
                .enabled
                .store(true, Ordering::Relaxed);
        });
    }

    /// Sequential epilogue of a batch uncontraction: drops the incident nets
    /// that the matching contractions had appended to each representative.
    pub fn uncontract_finish(&mut self, batch: &[Memento]) {
        for m in batch {
            let nets_u = &mut self.incident_nets[m.u as usize];
            let new_len = nets_u.len() - m.appended_nets as usize;
            nets_u.truncate(new_len);
        }
    }

    fn edge_capacity(&self, e: HyperedgeId) -> usize {
        let first = self.hyperedges[e as usize].first;
        let next = self
            .hyperedges
            .get(e as usize + 1)
            .map_or(self.num_pins, |he| he.first);
        next - first
    }

    fn acquire_edge(&self, e: HyperedgeId) {
        while self.acquired[e as usize]
            .compare_exchange_weak(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    fn release_edge(&self, e: HyperedgeId) {
        self.acquired[e as usize].store(false, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Net removal / restore (n-level pass boundaries)
    // ------------------------------------------------------------------

    /// Disables single-pin nets and nets parallel to another net (equal pin
    /// sets, found via the order-independent hash). The weight of a parallel
    /// net is folded into its representative. Returns the removals in the
    /// order they must be reversed.
    pub fn remove_single_pin_and_parallel_nets(&mut self) -> Vec<RemovedNet> {
        let mut removed = Vec::new();
        let mut by_hash: FxHashMap<u64, Vec<HyperedgeId>> = FxHashMap::default();

        for e in 0..self.num_edges() {
            if !self.edge_enabled(e) {
                continue;
            }
            if self.edge_size(e) == 1 {
                self.hyperedges[e as usize]
                    .enabled
                    .store(false, Ordering::Relaxed);
                removed.push(RemovedNet {
                    net: e,
                    representative: None,
                });
                continue;
            }
            let hash = self.edge_hash(e);
            let candidates = by_hash.entry(hash).or_default();
            let mut pins_e: Vec<HypernodeId> = self.pins(e).collect();
            pins_e.sort_unstable();
            let mut rep = None;
            for &c in candidates.iter() {
                if self.edge_size(c) == pins_e.len() {
                    let mut pins_c: Vec<HypernodeId> = self.pins(c).collect();
                    pins_c.sort_unstable();
                    if pins_c == pins_e {
                        rep = Some(c);
                        break;
                    }
                }
            }
            match rep {
                Some(r) => {
                    let we = self.edge_weight(e);
                    self.hyperedges[r as usize]
                        .weight
                        .fetch_add(we, Ordering::Relaxed);
                    self.hyperedges[e as usize]
                        .enabled
                        .store(false, Ordering::Relaxed);
                    removed.push(RemovedNet {
                        net: e,
                        representative: Some(r),
                    });
                }
                None => candidates.push(e),
            }
        }
        removed
    }

    /// Re-enables a batch of removed nets, walking the removal record in
    /// reverse, and unfolds the weight of parallel nets from their
    /// representatives. Pin counts are the caller's business.
    pub fn restore_removed_nets(&mut self, removed: &[RemovedNet]) {
        for r in removed.iter().rev() {
            self.hyperedges[r.net as usize]
                .enabled
                .store(true, Ordering::Relaxed);
            if let Some(rep) = r.representative {
                let we = self.edge_weight(r.net);
                self.hyperedges[rep as usize]
                    .weight
                    .fetch_sub(we, Ordering::Relaxed);
            }
        }
    }

    /// Disables every enabled net with more than `max_size` pins; such nets
    /// are ignored during partitioning and restored at top level.
    pub fn remove_large_edges(&mut self, max_size: usize) -> Vec<HyperedgeId> {
        let mut removed = Vec::new();
        for e in 0..self.num_edges() {
            if self.edge_enabled(e) && self.edge_size(e) > max_size {
                self.hyperedges[e as usize]
                    .enabled
                    .store(false, Ordering::Relaxed);
                removed.push(e);
            }
        }
        removed
    }

    pub(crate) fn enable_edge(&mut self, e: HyperedgeId) {
        self.hyperedges[e as usize]
            .enabled
            .store(true, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Cluster contraction (multilevel)
    // ------------------------------------------------------------------

    /// Builds the coarse hypergraph induced by `clustering`, which maps each
    /// enabled vertex to the representative of its cluster. Returns the
    /// coarse hypergraph together with the fine-vertex to coarse-vertex
    /// mapping. Single-pin nets are dropped and parallel nets merged with
    /// summed weights.
    pub fn contract_clustering(
        &self,
        clustering: &[HypernodeId],
    ) -> (Hypergraph, Vec<HypernodeId>) {
        let n = self.num_nodes() as usize;
        debug_assert_eq!(clustering.len(), n);

        // Compact representative ids into a consecutive coarse id range.
        let mut coarse_of_rep: FxHashMap<HypernodeId, HypernodeId> = FxHashMap::default();
        let mut coarse_weights: Vec<NodeWeight> = Vec::new();
        let mut coarse_communities: Vec<i32> = Vec::new();
        let mut mapping = vec![u32::MAX; n];
        for u in self.nodes() {
            let rep = clustering[u as usize];
            let next_id = coarse_of_rep.len() as HypernodeId;
            let coarse = *coarse_of_rep.entry(rep).or_insert_with(|| {
                coarse_weights.push(0);
                coarse_communities.push(self.community(rep));
                next_id
            });
            coarse_weights[coarse as usize] += self.node_weight(u);
            mapping[u as usize] = coarse;
        }

        // Project each net onto coarse ids; nets that collapse to a single
        // pin vanish, identical nets merge.
        let projected: Vec<(Vec<HypernodeId>, EdgeWeight)> = self
            .edges()
            .collect::<Vec<_>>()
            .into_par_iter()
            .filter_map(|e| {
                let mut pins: Vec<HypernodeId> =
                    self.pins(e).map(|p| mapping[p as usize]).collect();
                pins.sort_unstable();
                pins.dedup();
                (pins.len() > 1).then(|| (pins, self.edge_weight(e)))
            })
            .collect();

        let mut merged: FxHashMap<Vec<HypernodeId>, EdgeWeight> = FxHashMap::default();
        for (pins, w) in projected {
            *merged.entry(pins).or_insert(0) += w;
        }
        let mut edge_vector: Vec<Vec<HypernodeId>> = Vec::with_capacity(merged.len());
        let mut edge_weights: Vec<EdgeWeight> = Vec::with_capacity(merged.len());
        for (pins, w) in merged {
            edge_vector.push(pins);
            edge_weights.push(w);
        }

        let num_coarse = coarse_weights.len() as HypernodeId;
        let mut coarse = Hypergraph::new(
            num_coarse,
            &edge_vector,
            Some(&edge_weights),
            Some(&coarse_weights),
            false,
        );
        coarse.communities = coarse_communities;
        (coarse, mapping)
    }
}

/// Packs a contraction sequence into uncontraction batches: the sequence is
/// reversed (ancestors must be released before descendants) and cut whenever
/// a vertex repeats or `max_batch_size` is reached.
pub fn build_uncontraction_batches(mementos: &[Memento], max_batch_size: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Batch = Vec::new();
    let mut used: rustc_hash::FxHashSet<HypernodeId> = rustc_hash::FxHashSet::default();
    for m in mementos.iter().rev() {
        if current.len() >= max_batch_size || used.contains(&m.u) || used.contains(&m.v) {
            batches.push(std::mem::take(&mut current));
            used.clear();
        }
        used.insert(m.u);
        used.insert(m.v);
        current.push(*m);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

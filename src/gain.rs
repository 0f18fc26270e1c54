use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use rayon::prelude::*;

use crate::partitioned::PartitionedHypergraph;
use crate::{EdgeWeight, HyperedgeId, HypernodeId, PartitionId};

/// km1 objective change of a single pin-count update:
/// `+w(e)` when the target block joined the net's connectivity set,
/// `-w(e)` when the source block left it.
pub fn km1_delta(we: EdgeWeight, new_from: u32, new_to: u32) -> EdgeWeight {
    let mut delta = 0;
    if new_to == 1 {
        delta += we;
    }
    if new_from == 0 {
        delta -= we;
    }
    delta
}

/// Cut objective change of a single pin-count update: a net leaves the cut
/// when all pins gather in the target block, and enters it when the source
/// block held all pins before the move.
pub fn cut_delta(we: EdgeWeight, size: usize, new_from: u32, new_to: u32) -> EdgeWeight {
    let mut delta = 0;
    if new_to as usize == size {
        delta -= we;
    }
    if new_from as usize == size - 1 {
        delta += we;
    }
    delta
}

/// Gain cache for the km1 objective.
///
/// For every vertex `u` it maintains
///   `benefit[u][p] = Σ { w(e) : e ∈ I(u), pins_in_part(e, p) ≥ 1 }` and
///   `penalty[u]   = Σ { w(e) : e ∈ I(u), pins_in_part(e, part(u)) > 1 }`,
/// so `gain(u, to) = benefit[u][to] − penalty[u]` is the km1 improvement of
/// moving `u` to `to`, in O(1).
///
/// The arrays are relaxed atomics; transient inconsistency under concurrent
/// moves is tolerated because refiners recheck gains at extraction and roll
/// back at round boundaries.
pub struct Km1GainCache {
    k: usize,
    benefit: Vec<AtomicI64>,
    penalty: Vec<AtomicI64>,
    initialized: AtomicBool,
}

impl Km1GainCache {
    pub fn new() -> Self {
        Km1GainCache {
            k: 0,
            benefit: Vec::new(),
            penalty: Vec::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Allocates the cache arrays; a no-op when already sized.
    pub fn allocate(&mut self, num_nodes: usize, k: usize) {
        if self.benefit.is_empty() {
            self.k = k;
            self.benefit = (0..num_nodes * k).map(|_| AtomicI64::new(0)).collect();
            self.penalty = (0..num_nodes).map(|_| AtomicI64::new(0)).collect();
        }
        debug_assert_eq!(self.k, k);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn invalidate(&self) {
        self.initialized.store(false, Ordering::Relaxed);
    }

    /// Fills the cache with a full parallel scan over all enabled vertices.
    /// Requires pin counts that reflect the current partition.
    pub fn initialize(&self, phg: &PartitionedHypergraph<'_>) {
        let k = self.k;
        self.benefit.par_iter().for_each(|b| b.store(0, Ordering::Relaxed));
        self.penalty.par_iter().for_each(|p| p.store(0, Ordering::Relaxed));

        let nodes: Vec<HypernodeId> = phg.nodes().collect();
        nodes.par_iter().for_each_init(
            || vec![0i64; k],
            |scratch, &u| {
                let from = phg.part_id(u);
                let mut penalty = 0;
                for e in phg.incident_nets(u) {
                    let we = phg.edge_weight(e);
                    for p in phg.connectivity_set(e) {
                        scratch[p as usize] += we;
                    }
                    if phg.pin_count_in_part(e, from) > 1 {
                        penalty += we;
                    }
                }
                for (p, b) in scratch.iter_mut().enumerate() {
                    self.benefit[u as usize * k + p].store(*b, Ordering::Relaxed);
                    *b = 0;
                }
                self.penalty[u as usize].store(penalty, Ordering::Relaxed);
            },
        );
        self.initialized.store(true, Ordering::Relaxed);
    }

    pub fn benefit(&self, u: HypernodeId, p: PartitionId) -> EdgeWeight {
        self.benefit[u as usize * self.k + p as usize].load(Ordering::Relaxed)
    }

    pub fn penalty(&self, u: HypernodeId) -> EdgeWeight {
        self.penalty[u as usize].load(Ordering::Relaxed)
    }

    /// km1 gain of moving `u` from its current block to `to`.
    pub fn gain(&self, u: HypernodeId, to: PartitionId) -> EdgeWeight {
        debug_assert!(self.is_initialized());
        self.benefit(u, to) - self.penalty(u)
    }

    pub(crate) fn add_benefit(&self, u: HypernodeId, p: PartitionId, delta: EdgeWeight) {
        self.benefit[u as usize * self.k + p as usize].fetch_add(delta, Ordering::Relaxed);
    }

    pub(crate) fn add_penalty(&self, u: HypernodeId, delta: EdgeWeight) {
        self.penalty[u as usize].fetch_add(delta, Ordering::Relaxed);
    }

    /// Absolute store of a penalty term. Never called on the concurrent
    /// move path (which is fetch-add only); reserved for the boundary
    /// repairs that recompute a mover's term from scratch.
    pub(crate) fn set_penalty(&self, u: HypernodeId, value: EdgeWeight) {
        self.penalty[u as usize].store(value, Ordering::Relaxed);
    }

    /// Incremental update for one net of a move `from → to` by `mover`,
    /// called with the pin counts after the update while the net's
    /// ownership flag is held.
    ///
    /// Four events matter:
    /// * `new_from == 1`: the remaining pin in `from` no longer shares the
    ///   net there, its penalty drops.
    /// * `new_from == 0`: `from` left the connectivity set, the net stops
    ///   benefiting any pin toward `from`.
    /// * `new_to == 1`: `to` joined the connectivity set, the net now
    ///   benefits every pin toward `to`.
    /// * `new_to == 2`: the previously sole pin in `to` now shares the net
    ///   there, its penalty rises.
    ///
    /// Every write is a fetch-add, so concurrent updates to the same entry
    /// cannot be lost. The mover's own penalty is adjusted per net by the
    /// caller and is excluded here. The scans identify pins by their
    /// current block; no early exit, since a pin observed in the middle of
    /// its own move can shadow the remaining resident. Such in-flight pins
    /// may collect a misattributed update, which the refiners repair for
    /// their movers at round boundaries.
    #[allow(clippy::too_many_arguments)]
    pub fn delta_gain_update(
        &self,
        phg: &PartitionedHypergraph<'_>,
        e: HyperedgeId,
        we: EdgeWeight,
        mover: HypernodeId,
        from: PartitionId,
        new_from: u32,
        to: PartitionId,
        new_to: u32,
    ) {
        debug_assert!(self.is_initialized());
        if new_from == 1 {
            for pin in phg.pins(e) {
                if pin != mover && phg.part_id(pin) == from {
                    self.add_penalty(pin, -we);
                }
            }
        } else if new_from == 0 {
            for pin in phg.pins(e) {
                self.add_benefit(pin, from, -we);
            }
        }

        if new_to == 1 {
            for pin in phg.pins(e) {
                self.add_benefit(pin, to, we);
            }
        } else if new_to == 2 {
            for pin in phg.pins(e) {
                if pin != mover && phg.part_id(pin) == to {
                    self.add_penalty(pin, we);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Recomputation (tests and heavy verification)
    // ------------------------------------------------------------------

    pub fn recompute_benefit(
        phg: &PartitionedHypergraph<'_>,
        u: HypernodeId,
        p: PartitionId,
    ) -> EdgeWeight {
        phg.incident_nets(u)
            .filter(|&e| phg.pin_count_in_part(e, p) >= 1)
            .map(|e| phg.edge_weight(e))
            .sum()
    }

    pub fn recompute_penalty(phg: &PartitionedHypergraph<'_>, u: HypernodeId) -> EdgeWeight {
        let block = phg.part_id(u);
        phg.incident_nets(u)
            .filter(|&e| phg.pin_count_in_part(e, block) > 1)
            .map(|e| phg.edge_weight(e))
            .sum()
    }

    /// Compares every entry of enabled vertices against recomputation.
    pub fn verify(&self, phg: &PartitionedHypergraph<'_>) -> bool {
        let mut ok = true;
        for u in phg.nodes() {
            for p in 0..phg.k() {
                let cached = self.benefit(u, p);
                let actual = Self::recompute_benefit(phg, u, p);
                if cached != actual {
                    log::error!("vertex {u}: benefit[{p}] is {cached}, expected {actual}");
                    ok = false;
                }
            }
            let cached = self.penalty(u);
            let actual = Self::recompute_penalty(phg, u);
            if cached != actual {
                log::error!("vertex {u}: penalty is {cached}, expected {actual}");
                ok = false;
            }
        }
        ok
    }
}

impl Default for Km1GainCache {
    fn default() -> Self {
        Self::new()
    }
}

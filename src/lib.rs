// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
pub mod algorithms;
pub mod config;
pub mod gain;
pub mod gen_weights;
pub mod hypergraph;
pub mod imbalance;
pub mod io;
pub mod partitioned;
pub mod pqueue;
pub mod work_queue;

/// Vertex (hypernode) identifier.
pub type HypernodeId = u32;
/// Net (hyperedge) identifier.
pub type HyperedgeId = u32;
/// Block identifier of a k-way partition. `NO_PART` marks unassigned vertices.
pub type PartitionId = i32;
/// Weight of a vertex.
pub type NodeWeight = i64;
/// Weight of a net; also the unit of the cut and km1 objectives.
pub type EdgeWeight = i64;

/// Block id of a vertex that has not been assigned yet.
pub const NO_PART: PartitionId = -1;

// The `Partition` trait allows for partitioning data.
// Partitioning algorithms implement this trait.
// The generic argument `M` defines the input of the algorithms (e.g. an
// adjacency matrix or a 2D set of points).
// The input partition must be of the correct size and its contents may or may
// not be used by the algorithms.
pub trait Partition<M> {
    // Diagnostic data returned for a specific run of the algorithm.
    type Metadata;

    // Error details, should the algorithm fail to run.
    type Error;

    // Partition the given data and output the part ID of each element in
    // `part_ids`.
    //
    // Part IDs must be contiguous and start from zero, meaning the number of
    // parts is one plus the maximum of `part_ids`.  If a lower ID does not
    // appear in the array, the part is assumed to be empty.
    fn partition(&mut self, part_ids: &mut [PartitionId], data: M)
                 -> Result<Self::Metadata, Self::Error>;
}

// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
use std::fmt;

mod coarsener;
mod initial;
mod label_propagation;
mod multilevel_partitioner;
mod multitry_fm;
mod rebalancer;
mod uncoarsener;

pub use coarsener::{Coarsener, MultilevelHierarchy, NLevelHierarchy};
pub use initial::PoolInitialPartitioner;
pub use label_propagation::LabelPropagationRefiner;
pub use multilevel_partitioner::{MultiLevelPartitioner, PartitionMetadata};
pub use multitry_fm::MultiTryFmRefiner;
pub use rebalancer::Rebalancer;
pub use uncoarsener::{MultilevelUncoarsener, NLevelUncoarsener};

/// Common errors thrown by algorithms.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No partition that matches the given criteria could been found.
    NotFound,

    /// Input sets don't have matching lengths.
    InputLenMismatch { expected: usize, actual: usize },

    /// Input contains negative values and such values are not supported.
    NegativeValues,

    /// Fewer than two blocks were requested.
    InvalidNumberOfBlocks { k: i32 },

    /// The imbalance tolerance must be positive.
    InvalidImbalance { epsilon: f64 },

    /// A configuration value does not parse to a known enumerant.
    UnknownEnumerant { option: &'static str, value: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "no partition found"),
            Error::InputLenMismatch { expected, actual } => write!(
                f,
                "input sets don't have the same length (expected {expected} items, got {actual})",
            ),
            Error::NegativeValues => write!(f, "input contains negative values"),
            Error::InvalidNumberOfBlocks { k } => {
                write!(f, "a partition needs at least two blocks, got k = {k}")
            }
            Error::InvalidImbalance { epsilon } => {
                write!(f, "imbalance tolerance must be positive, got {epsilon}")
            }
            Error::UnknownEnumerant { option, value } => {
                write!(f, "unknown value `{value}` for option {option}")
            }
        }
    }
}

impl std::error::Error for Error {}

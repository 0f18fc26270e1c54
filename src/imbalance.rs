// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
use num_traits::FromPrimitive;
use num_traits::ToPrimitive;
use num_traits::Zero;
use std::iter::Sum;
use std::ops::AddAssign;
use std::ops::Div;
use std::ops::Sub;

use crate::{NodeWeight, PartitionId};

// Calculates the total weight for each part of a given partition.
pub fn compute_parts_load<W>(partition: &[PartitionId], num_parts: usize, weights: W) -> Vec<W::Item>
where
    W: IntoIterator,
    W::Item: Zero + Clone + AddAssign,
{
    let mut loads = vec![W::Item::zero(); num_parts];

    for (&part, w) in partition.iter().zip(weights.into_iter()) {
        if part >= 0 && (part as usize) < num_parts {
            loads[part as usize] += w;
        }
    }

    loads
}

/// Compute the imbalance of the given partition.
pub fn imbalance<W>(num_parts: usize, partition: &[PartitionId], weights: W) -> f64
where
    W: IntoIterator,
    W::Item: Clone + PartialOrd + PartialEq,
    W::Item: Zero + FromPrimitive + ToPrimitive,
    W::Item: AddAssign + Div<Output = W::Item> + Sub<Output = W::Item> + Sum,
{
    if num_parts == 0 {
        return 0.0;
    }

    let part_loads = compute_parts_load(partition, num_parts, weights);
    imbalance_of_loads(&part_loads)
}

/// Imbalance given precomputed block loads: the largest relative deviation
/// from the ideal block weight.
pub fn imbalance_of_loads<T>(part_loads: &[T]) -> f64
where
    T: Clone + ToPrimitive,
{
    if part_loads.is_empty() {
        return 0.0;
    }
    let total_weight: f64 = part_loads.iter().map(|w| w.to_f64().unwrap_or(0.0)).sum();
    let ideal_part_weight = total_weight / part_loads.len() as f64;
    if ideal_part_weight == 0.0 {
        return 0.0;
    }

    part_loads
        .iter()
        .map(|part_weight| {
            let part_weight = part_weight.to_f64().unwrap_or(0.0);
            (part_weight - ideal_part_weight) / ideal_part_weight
        })
        .fold(0.0f64, |acc, dev| acc.max(dev))
}

/// The weight ceiling of every block: (1 + ε)·⌈W/k⌉.
pub fn max_part_weights(num_parts: usize, epsilon: f64, total_weight: NodeWeight) -> Vec<NodeWeight> {
    let ceil_avg = (total_weight + num_parts as NodeWeight - 1) / num_parts as NodeWeight;
    let max = ((1.0 + epsilon) * ceil_avg as f64).floor() as NodeWeight;
    vec![max; num_parts]
}

#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;
    use itertools::assert_equal;

    use super::*;

    #[test]
    fn test_compute_parts_load() {
        // Arrange
        let partition = [0, 0, 1, 1];
        let vtx_weights = [4.0, 7.0, 5.0, 2.0];
        let num_parts = 2;

        // Act
        let partition_weights = compute_parts_load(&partition, num_parts, vtx_weights);

        // Assert
        assert_equal(partition_weights, [11.0, 7.0]);
    }

    #[test]
    fn test_imbalance() {
        // Arrange
        let partition = [0, 0, 1, 1];
        let vtx_weights = [3.0, 3.0, 2.0, 2.0];
        let num_parts = 2;

        // Act
        let imb = imbalance(num_parts, &partition, vtx_weights);

        // Assert
        assert_ulps_eq!(imb, 0.2);
    }

    #[test]
    fn test_max_part_weights() {
        // Arrange & Act
        let ceilings = max_part_weights(3, 0.1, 10);

        // Assert: ceil(10/3) = 4, scaled by 1.1
        assert_equal(ceilings, [4, 4, 4]);
    }
}

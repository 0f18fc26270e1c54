use rand::Rng;

use crate::NodeWeight;

/// Generate the weight vector where each vertice has the same weight
pub fn gen_uniform_weights(no_of_vertices: usize) -> Vec<NodeWeight> {
    vec![1; no_of_vertices]
}

/// Generate the weight vector where each vertice has a random weight
pub fn gen_random_weights(
    no_of_vertices: usize,
    min_weight: NodeWeight,
    max_weight: NodeWeight,
) -> Vec<NodeWeight> {
    if max_weight < min_weight {
        panic!("Max weight must be greater than min weight.");
    }

    if min_weight <= 0 {
        panic!("Max/min weight must be non-negative.");
    }
    let mut rng = rand::thread_rng();

    (0..no_of_vertices)
        .map(|_| rng.gen_range(min_weight..=max_weight))
        .collect()
}

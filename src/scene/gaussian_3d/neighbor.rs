//! Nearest neighbor search for scene initialization.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};

/// The mean Euclidean distance from each point to its `k` nearest other points.
///
/// A point without any neighbor gets `1.0`.
/// The distances are no less than [`f32::EPSILON`].
/// Any number of points may share a coordinate.
pub fn mean_distances_to_nearest(
    positions: &[[f64; 3]],
    k: usize,
) -> Vec<f64> {
    if positions.is_empty() {
        return vec![];
    }

    // The items are the indices of positions
    let tree = ImmutableKdTree::<f64, 3>::new_from_slice(positions);

    positions
        .par_iter()
        .enumerate()
        .map(|(index, position)| {
            let distances = tree
                .nearest_n::<SquaredEuclidean>(position, k + 1)
                .into_iter()
                .filter(|neighbor| neighbor.item != index as u64)
                .take(k)
                .map(|neighbor| neighbor.distance.sqrt())
                .collect::<Vec<_>>();

            if distances.is_empty() {
                return 1.0;
            }
            let mean = distances.iter().sum::<f64>() / distances.len() as f64;
            mean.max(f32::EPSILON as f64)
        })
        .collect()
}

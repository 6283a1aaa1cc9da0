//! Pixel classification against user-labeled exemplars.
//!
//! Every pixel of every feature grid is compared to the exemplar
//! vectors; distances become soft similarities, similarities become
//! per-exemplar probabilities, and a k-nearest vote over the binary
//! labels produces the final probability map.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, Array3, Axis};

use crate::error::{Error, Result};
use crate::features::FeatureGrid;

/// Similarity bandwidth of the distance-to-similarity transform.
const SIGMA: f32 = 100.0;

/// Compute one probability map per feature grid, values in [0, 1].
///
/// With zero exemplars this returns an all-zero map per grid, the
/// "no information yet" baseline, not an error. `labels[i]` is the
/// binary class of `exemplars[i]` (true = positive).
pub fn classify(
    grids: &[FeatureGrid],
    exemplars: &[Array1<f32>],
    labels: &[bool],
    k: usize,
) -> Result<Vec<Array2<f32>>> {
    if exemplars.is_empty() {
        return Ok(grids
            .iter()
            .map(|grid| {
                let (height, width, _) = grid.dim();
                Array2::zeros((height, width))
            })
            .collect());
    }
    if grids.is_empty() {
        return Ok(Vec::new());
    }

    check_shapes(grids, exemplars, labels)?;

    // Top-k is over however many exemplars exist.
    let k = k.clamp(1, exemplars.len());

    let _span = tracing::debug_span!("classify", images = grids.len()).entered();
    grids
        .iter()
        .map(|grid| {
            let dist = distances(grid, exemplars);
            let probs = soft_probs(&dist);
            Ok(knn_vote(&probs, labels, k))
        })
        .collect()
}

/// Threshold a probability map into a binary mask.
pub fn mask(probs: &Array2<f32>, threshold: f32) -> Array2<bool> {
    probs.mapv(|p| p > threshold)
}

fn check_shapes(
    grids: &[FeatureGrid],
    exemplars: &[Array1<f32>],
    labels: &[bool],
) -> Result<()> {
    if labels.len() != exemplars.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} labels for {} exemplars",
            labels.len(),
            exemplars.len()
        )));
    }

    let first = grids[0].dim();
    for grid in grids {
        if grid.dim() != first {
            return Err(Error::ShapeMismatch(format!(
                "expected all feature grids to have shape {:?}, got {:?}",
                first,
                grid.dim()
            )));
        }
    }

    let feature_dim = first.2;
    for exemplar in exemplars {
        if exemplar.len() != feature_dim {
            return Err(Error::ShapeMismatch(format!(
                "exemplar vector of length {} against feature dimension {}",
                exemplar.len(),
                feature_dim
            )));
        }
    }
    Ok(())
}

/// Euclidean distance from every pixel's feature vector to every
/// exemplar vector: (height, width, exemplars).
fn distances(grid: &FeatureGrid, exemplars: &[Array1<f32>]) -> Array3<f32> {
    let (height, width, feature_dim) = grid.dim();
    let mut dist = Array3::zeros((height, width, exemplars.len()));

    for (e, exemplar) in exemplars.iter().enumerate() {
        for row in 0..height {
            for col in 0..width {
                let mut acc = 0.0f32;
                for f in 0..feature_dim {
                    let d = grid[[row, col, f]] - exemplar[f];
                    acc += d * d;
                }
                dist[[row, col, e]] = acc.sqrt();
            }
        }
    }
    dist
}

/// Per-exemplar probabilities from distances.
///
/// The similarity is exp(-d^2 / 2*sigma^2), and the probabilities are a
/// softmax of exp(sim) over the exemplars. The similarity is therefore
/// exponentiated twice; downstream numbers depend on this exact chain.
fn soft_probs(dist: &Array3<f32>) -> Array3<f32> {
    let sim = dist.mapv(|d| (-d * d / (2.0 * SIGMA * SIGMA)).exp());
    let expsim = sim.mapv(f32::exp);
    let sums = expsim.sum_axis(Axis(2)).insert_axis(Axis(2));
    &expsim / &sums
}

/// Mean label of the k exemplars with the largest per-exemplar
/// probability. Ties in the top-k selection are broken arbitrarily.
fn knn_vote(probs: &Array3<f32>, labels: &[bool], k: usize) -> Array2<f32> {
    let (height, width, count) = probs.dim();
    let mut vote = Array2::zeros((height, width));
    let mut order: Vec<usize> = Vec::with_capacity(count);

    for row in 0..height {
        for col in 0..width {
            order.clear();
            order.extend(0..count);
            if k < count {
                order.select_nth_unstable_by(k - 1, |&a, &b| {
                    probs[[row, col, b]]
                        .partial_cmp(&probs[[row, col, a]])
                        .unwrap_or(Ordering::Equal)
                });
            }
            let positives = order[..k].iter().filter(|&&e| labels[e]).count();
            vote[[row, col]] = positives as f32 / k as f32;
        }
    }
    vote
}

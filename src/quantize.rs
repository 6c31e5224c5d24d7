//! Intensity quantization by k-means clustering.
//!
//! Not part of the volume pipeline; other tools call it on single images.

use ndarray::{Array2, ArrayView2};
use rand::prelude::*;
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum QuantizeError {
    #[error("Image has no pixels")]
    EmptyImage,

    #[error("Cannot form {clusters} clusters from {samples} samples")]
    InvalidClusterCount { clusters: usize, samples: usize },
}

#[derive(Clone, Debug)]
pub struct QuantizeConfig {
    /// Number of clusters K.
    pub clusters: usize,
    /// Iteration cap for a single attempt.
    pub max_iters: usize,
    /// An attempt converges once no center moves further than this.
    pub epsilon: f32,
    /// Independent random initializations; the most compact result wins.
    pub attempts: usize,
    /// RNG seed for reproducibility.
    pub seed: u64,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            clusters: 2,
            max_iters: 50,
            epsilon: 0.05,
            attempts: 25,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Quantized {
    /// Cluster centers, ascending.
    pub centers: Vec<f32>,
    /// Index into `centers` for every pixel.
    pub labels: Array2<usize>,
    /// Every pixel replaced by its cluster center.
    pub image: Array2<f32>,
}

struct Clustering {
    centers: Vec<f32>,
    labels: Vec<usize>,
    compactness: f64,
}

/// Quantize `image` into `config.clusters` intensity levels.
pub fn quantize(
    image: ArrayView2<'_, f32>,
    config: &QuantizeConfig,
) -> Result<Quantized, QuantizeError> {
    let samples: Vec<f32> = image.iter().copied().collect();
    if samples.is_empty() {
        return Err(QuantizeError::EmptyImage);
    }
    if config.clusters == 0 || config.clusters > samples.len() {
        return Err(QuantizeError::InvalidClusterCount {
            clusters: config.clusters,
            samples: samples.len(),
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best = run_attempt(&samples, config, &mut rng);
    for attempt in 1..config.attempts {
        let clustering = run_attempt(&samples, config, &mut rng);
        debug!(attempt, compactness = clustering.compactness, "k-means attempt");
        if clustering.compactness < best.compactness {
            best = clustering;
        }
    }

    // Relabel so label order follows ascending center order.
    let mut order: Vec<usize> = (0..best.centers.len()).collect();
    order.sort_by(|&a, &b| best.centers[a].total_cmp(&best.centers[b]));
    let mut rank = vec![0; order.len()];
    for (new, &old) in order.iter().enumerate() {
        rank[old] = new;
    }
    let centers: Vec<f32> = order.iter().map(|&old| best.centers[old]).collect();

    let columns = image.ncols();
    let labels = Array2::from_shape_fn(image.dim(), |(row, col)| {
        rank[best.labels[row * columns + col]]
    });
    let image = labels.mapv(|label| centers[label]);
    Ok(Quantized {
        centers,
        labels,
        image,
    })
}

fn run_attempt(samples: &[f32], config: &QuantizeConfig, rng: &mut StdRng) -> Clustering {
    let (lo, hi) = samples
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let mut centers: Vec<f32> = (0..config.clusters)
        .map(|_| rng.gen_range(lo..=hi))
        .collect();

    let mut labels = assign(samples, &centers);
    for _ in 0..config.max_iters {
        let shift = update_centers(samples, &labels, &mut centers);
        labels = assign(samples, &centers);
        if shift <= config.epsilon {
            break;
        }
    }

    let compactness = samples
        .iter()
        .zip(&labels)
        .map(|(&s, &l)| f64::from(s - centers[l]).powi(2))
        .sum();
    Clustering {
        centers,
        labels,
        compactness,
    }
}

fn assign(samples: &[f32], centers: &[f32]) -> Vec<usize> {
    samples
        .par_iter()
        .map(|&s| nearest(s, centers))
        .collect()
}

fn nearest(sample: f32, centers: &[f32]) -> usize {
    let mut best = 0;
    for (k, &c) in centers.iter().enumerate().skip(1) {
        if (sample - c).abs() < (sample - centers[best]).abs() {
            best = k;
        }
    }
    best
}

/// Move every center to the mean of its members and return the largest
/// move. An empty cluster takes over the sample furthest from its center.
fn update_centers(samples: &[f32], labels: &[usize], centers: &mut [f32]) -> f32 {
    let k = centers.len();
    let mut sums = vec![0.0f64; k];
    let mut counts = vec![0usize; k];
    for (&s, &l) in samples.iter().zip(labels) {
        sums[l] += f64::from(s);
        counts[l] += 1;
    }

    let mut shift = 0.0f32;
    for cluster in 0..k {
        let updated = if counts[cluster] > 0 {
            (sums[cluster] / counts[cluster] as f64) as f32
        } else {
            let (far, _) = samples
                .iter()
                .zip(labels)
                .map(|(&s, &l)| (s, (s - centers[l]).abs()))
                .fold((centers[cluster], f32::NEG_INFINITY), |acc, item| {
                    if item.1 > acc.1 { item } else { acc }
                });
            far
        };
        shift = shift.max((updated - centers[cluster]).abs());
        centers[cluster] = updated;
    }
    shift
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn bimodal() -> Array2<f32> {
        let mut rng = StdRng::seed_from_u64(7);
        Array2::from_shape_fn((16, 16), |(y, x)| {
            let noise = rng.gen_range(-2.0..2.0);
            if (x + y) % 3 == 0 { 200.0 + noise } else { 10.0 + noise }
        })
    }

    #[test]
    fn two_clusters_on_bimodal_image() {
        let image = bimodal();
        let result = quantize(image.view(), &QuantizeConfig::default()).unwrap();

        assert_eq!(result.centers.len(), 2);
        assert!(result.centers[0] < result.centers[1]);
        assert_relative_eq!(result.centers[0], 10.0, epsilon = 1.0);
        assert_relative_eq!(result.centers[1], 200.0, epsilon = 1.0);

        assert_eq!(result.image.dim(), image.dim());
        assert!(result.image.iter().all(|v| result.centers.contains(v)));
        for ((&original, &label), &quantized) in
            image.iter().zip(&result.labels).zip(&result.image)
        {
            let expected = if original > 100.0 { 1 } else { 0 };
            assert_eq!(label, expected);
            assert_eq!(quantized, result.centers[label]);
        }
    }

    #[test]
    fn labels_follow_ascending_centers() {
        let image = Array2::from_shape_vec(
            (2, 6),
            vec![90.0, 91.0, 5.0, 6.0, 50.0, 51.0, 89.0, 4.0, 49.0, 52.0, 7.0, 92.0],
        )
        .unwrap();
        let config = QuantizeConfig {
            clusters: 3,
            ..QuantizeConfig::default()
        };
        let result = quantize(image.view(), &config).unwrap();

        assert!(result.centers.windows(2).all(|w| w[0] < w[1]));
        assert_relative_eq!(result.centers[0], 5.5, epsilon = 1e-4);
        assert_relative_eq!(result.centers[1], 50.5, epsilon = 1e-4);
        assert_relative_eq!(result.centers[2], 90.5, epsilon = 1e-4);
        assert_eq!(result.labels.row(0).to_vec(), vec![2, 2, 0, 0, 1, 1]);
        assert!(result.labels.iter().all(|&l| l < 3));
    }

    #[test]
    fn same_seed_same_result() {
        let image = bimodal();
        let a = quantize(image.view(), &QuantizeConfig::default()).unwrap();
        let b = quantize(image.view(), &QuantizeConfig::default()).unwrap();
        assert_eq!(a.centers, b.centers);
        assert_eq!(a.labels, b.labels);
    }

    #[test]
    fn rejects_bad_cluster_counts() {
        let image = Array2::<f32>::zeros((2, 2));
        let config = QuantizeConfig {
            clusters: 5,
            ..QuantizeConfig::default()
        };
        assert!(matches!(
            quantize(image.view(), &config),
            Err(QuantizeError::InvalidClusterCount { clusters: 5, samples: 4 })
        ));

        let empty = Array2::<f32>::zeros((0, 3));
        assert!(matches!(
            quantize(empty.view(), &QuantizeConfig::default()),
            Err(QuantizeError::EmptyImage)
        ));
    }
}

//! Density-based clustering (DBSCAN) on top of `linfa-clustering`.
//!
//! A point is a *core* point when at least `min_samples` points (itself
//! included) lie within `eps` of it. Clusters are the connected components of
//! core points; non-core points within `eps` of a core point join its
//! cluster, everything else is noise.
//!
//! Honeypot populations repeat the same vector many times, so identical rows
//! are collapsed before clustering. A unique row seen `w` times is handed to
//! the clusterer as `min(w, min_samples)` copies: neighbourhood counts above
//! `min_samples` cannot change whether a point is core, so the labels match
//! clustering every row while the work stays bounded by the number of
//! distinct rows.
//!
//! - [`Dbscan::fit_1d`] and [`Dbscan::fit_euclidean`] use Euclidean distance
//!   over a k-d tree.
//! - [`Dbscan::fit_cosine`] uses [`CosineDist`] with a linear scan, for
//!   L2-normalized TF-IDF rows.

use std::collections::{BTreeSet, HashMap};

use linfa::traits::Transformer;
use linfa::ParamGuard;
use linfa_clustering::Dbscan as LinfaDbscan;
use linfa_nn::distance::{Distance, L2Dist};
use linfa_nn::CommonNearestNeighbour;
use ndarray::{Array1, Array2, ArrayView, ArrayView2, Dimension};
use serde::{Deserialize, Serialize};

use crate::error::ClusteringError;

/// Cluster assignment for every input point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clustering {
    /// `Some(cluster_id)` or `None` for noise, in input order.
    pub labels: Vec<Option<usize>>,
    pub cluster_count: usize,
    /// Distinct rows actually clustered.
    pub unique_points: usize,
}

impl Clustering {
    fn empty() -> Self {
        Self {
            labels: Vec::new(),
            cluster_count: 0,
            unique_points: 0,
        }
    }

    pub fn noise_indices(&self) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of points assigned to any cluster.
    pub fn clustered_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }
}

/// Cosine distance, `1 - cos(a, b)`. A zero vector is at distance 1 from
/// everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CosineDist;

impl Distance<f64> for CosineDist {
    fn distance<D: Dimension>(&self, a: ArrayView<f64, D>, b: ArrayView<f64, D>) -> f64 {
        let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
        for (x, y) in a.iter().zip(b.iter()) {
            dot += x * y;
            norm_a += x * x;
            norm_b += y * y;
        }
        if norm_a == 0.0 || norm_b == 0.0 {
            return 1.0;
        }
        (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 2.0)
    }
}

/// DBSCAN parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dbscan {
    eps: f64,
    min_samples: usize,
}

impl Dbscan {
    pub fn new(eps: f64, min_samples: usize) -> Result<Self, ClusteringError> {
        if !eps.is_finite() || eps <= 0.0 {
            return Err(ClusteringError::InvalidParameter(format!(
                "eps must be positive and finite, got {eps}"
            )));
        }
        if min_samples < 2 {
            return Err(ClusteringError::InvalidParameter(format!(
                "min_samples must be at least 2, got {min_samples}"
            )));
        }
        Ok(Self { eps, min_samples })
    }

    /// Clusters scalar values using absolute difference.
    pub fn fit_1d(&self, values: &[f64]) -> Result<Clustering, ClusteringError> {
        let points = Array2::from_shape_vec((values.len(), 1), values.to_vec())
            .map_err(|e| ClusteringError::InvalidParameter(e.to_string()))?;
        self.fit_euclidean(points.view())
    }

    /// Clusters dense rows using Euclidean distance. Identical rows are
    /// collapsed first.
    pub fn fit_euclidean(&self, points: ArrayView2<'_, f64>) -> Result<Clustering, ClusteringError> {
        check_points(points)?;
        if points.nrows() == 0 {
            return Ok(Clustering::empty());
        }

        let (unique, weights, index) = deduplicate(points)?;
        let unique_labels = self.fit_weighted(
            unique.view(),
            &weights,
            L2Dist,
            CommonNearestNeighbour::KdTree,
        )?;

        Ok(Clustering {
            labels: index.iter().map(|&u| unique_labels[u]).collect(),
            cluster_count: count_clusters(&unique_labels),
            unique_points: weights.len(),
        })
    }

    /// Clusters already-distinct rows by cosine distance; `weights[i]` is how
    /// many observations row `i` stands for.
    pub fn fit_cosine(
        &self,
        points: ArrayView2<'_, f64>,
        weights: &[usize],
    ) -> Result<Clustering, ClusteringError> {
        if weights.len() != points.nrows() {
            return Err(ClusteringError::WeightMismatch {
                expected: points.nrows(),
                actual: weights.len(),
            });
        }
        check_points(points)?;
        if points.nrows() == 0 {
            return Ok(Clustering::empty());
        }

        let labels = self.fit_weighted(
            points,
            weights,
            CosineDist,
            CommonNearestNeighbour::LinearSearch,
        )?;
        Ok(Clustering {
            cluster_count: count_clusters(&labels),
            unique_points: labels.len(),
            labels,
        })
    }

    /// Runs linfa's DBSCAN with each row repeated `min(weight, min_samples)`
    /// times and returns one label per input row.
    fn fit_weighted<D: Distance<f64>>(
        &self,
        points: ArrayView2<'_, f64>,
        weights: &[usize],
        dist: D,
        nn: CommonNearestNeighbour,
    ) -> Result<Vec<Option<usize>>, ClusteringError> {
        let dims = points.ncols();
        let mut data = Vec::with_capacity(points.nrows() * dims);
        let mut first_copy = Vec::with_capacity(points.nrows());
        let mut rows = 0usize;
        for (row, &weight) in points.rows().into_iter().zip(weights) {
            first_copy.push(rows);
            for _ in 0..weight.clamp(1, self.min_samples) {
                data.extend(row.iter().copied());
                rows += 1;
            }
        }
        let expanded = Array2::from_shape_vec((rows, dims), data)
            .map_err(|e| ClusteringError::InvalidParameter(e.to_string()))?;

        let params = LinfaDbscan::params_with(self.min_samples, dist, nn)
            .tolerance(self.eps)
            .check()
            .map_err(|e| ClusteringError::InvalidParameter(e.to_string()))?;
        let memberships: Array1<Option<usize>> = params.transform(&expanded);

        Ok(first_copy.iter().map(|&row| memberships[row]).collect())
    }
}

fn check_points(points: ArrayView2<'_, f64>) -> Result<(), ClusteringError> {
    if points.nrows() > 0 && points.ncols() == 0 {
        return Err(ClusteringError::InvalidParameter(
            "points have no dimensions".to_string(),
        ));
    }
    for (index, row) in points.rows().into_iter().enumerate() {
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ClusteringError::NonFiniteValue { index });
        }
    }
    Ok(())
}

/// Collapses identical rows. Returns the distinct rows in first-seen order,
/// their multiplicities, and the distinct row index of every input row.
fn deduplicate(
    points: ArrayView2<'_, f64>,
) -> Result<(Array2<f64>, Vec<usize>, Vec<usize>), ClusteringError> {
    let mut seen: HashMap<Vec<u64>, usize> = HashMap::new();
    let mut data = Vec::new();
    let mut weights: Vec<usize> = Vec::new();
    let mut index = Vec::with_capacity(points.nrows());

    for row in points.rows() {
        // Adding 0.0 folds -0.0 into 0.0.
        let key: Vec<u64> = row.iter().map(|v| (v + 0.0).to_bits()).collect();
        let next = weights.len();
        let slot = *seen.entry(key).or_insert(next);
        if slot == next {
            data.extend(row.iter().copied());
            weights.push(0);
        }
        weights[slot] += 1;
        index.push(slot);
    }

    let unique = Array2::from_shape_vec((weights.len(), points.ncols()), data)
        .map_err(|e| ClusteringError::InvalidParameter(e.to_string()))?;
    Ok((unique, weights, index))
}

fn count_clusters(labels: &[Option<usize>]) -> usize {
    labels.iter().flatten().collect::<BTreeSet<_>>().len()
}

/// Standardizes each column to zero mean and unit (population) variance.
/// Constant columns become all zeros.
pub fn standardize(points: &mut Array2<f64>) {
    if points.nrows() == 0 {
        return;
    }
    for mut column in points.columns_mut() {
        let mu = column.mean().unwrap_or(0.0);
        let sigma = column.std(0.0);
        if sigma > 0.0 && sigma.is_finite() {
            column.mapv_inplace(|v| (v - mu) / sigma);
        } else {
            column.fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_invalid_parameters() {
        assert!(Dbscan::new(0.0, 5).is_err());
        assert!(Dbscan::new(f64::NAN, 5).is_err());
        assert!(Dbscan::new(1.0, 1).is_err());
        assert!(Dbscan::new(1.0, 2).is_ok());
    }

    #[test]
    fn test_fit_1d_two_clusters_and_noise() {
        let db = Dbscan::new(1.0, 3).unwrap();
        let values = vec![0.0, 0.5, 0.9, 10.0, 10.5, 10.9, 50.0];
        let c = db.fit_1d(&values).unwrap();
        assert_eq!(c.cluster_count, 2);
        assert_eq!(c.labels[0], c.labels[2]);
        assert_eq!(c.labels[3], c.labels[5]);
        assert_ne!(c.labels[0], c.labels[3]);
        assert_eq!(c.noise_indices(), vec![6]);
        assert_eq!(c.clustered_count(), 6);
    }

    #[test]
    fn test_fit_1d_border_point() {
        // 1.0 and 1.8 are core; 0.2 and 2.6 are border points; 10 is noise.
        let db = Dbscan::new(1.0, 3).unwrap();
        let c = db.fit_1d(&[2.6, 0.2, 1.0, 1.8, 10.0]).unwrap();
        assert_eq!(c.cluster_count, 1);
        assert!(c.labels[..4].iter().all(|l| l.is_some()));
        assert_eq!(c.noise_indices(), vec![4]);
    }

    #[test]
    fn test_fit_1d_unsorted_input_and_non_finite() {
        let db = Dbscan::new(0.5, 2).unwrap();
        let c = db.fit_1d(&[5.0, 1.0, 5.2, 1.1]).unwrap();
        assert_eq!(c.cluster_count, 2);
        assert_eq!(c.labels[0], c.labels[2]);
        assert_eq!(c.labels[1], c.labels[3]);

        let err = db.fit_1d(&[1.0, f64::INFINITY]).unwrap_err();
        assert_eq!(err, ClusteringError::NonFiniteValue { index: 1 });
    }

    #[test]
    fn test_fit_euclidean() {
        let db = Dbscan::new(0.5, 3).unwrap();
        let points = array![[0.0, 0.0], [0.1, 0.1], [0.2, 0.0], [5.0, 5.0], [0.0, 0.3]];
        let c = db.fit_euclidean(points.view()).unwrap();
        assert_eq!(c.cluster_count, 1);
        assert_eq!(c.noise_indices(), vec![3]);

        let bad = array![[0.0], [f64::NAN]];
        let err = db.fit_euclidean(bad.view()).unwrap_err();
        assert_eq!(err, ClusteringError::NonFiniteValue { index: 1 });
    }

    #[test]
    fn test_duplicates_become_core_points() {
        // Five copies of one point form a cluster on their own; the lone
        // distant point stays noise.
        let db = Dbscan::new(0.1, 5).unwrap();
        let mut values = vec![1.0; 5];
        values.push(9.0);
        let c = db.fit_1d(&values).unwrap();
        assert_eq!(c.unique_points, 2);
        assert_eq!(c.cluster_count, 1);
        assert_eq!(c.noise_indices(), vec![5]);

        // Four copies are not enough.
        let c = db.fit_1d(&[1.0, 1.0, 1.0, 1.0, 9.0]).unwrap();
        assert_eq!(c.cluster_count, 0);
    }

    #[test]
    fn test_large_duplicated_population_collapses() {
        let db = Dbscan::new(0.3, 5).unwrap();
        let n = 60_000;
        let mut points = Array2::<f64>::zeros((n + 1, 2));
        for i in 0..n {
            points[[i, 0]] = (i % 3) as f64 * 0.1;
        }
        points[[n, 0]] = 40.0;
        points[[n, 1]] = 40.0;

        let c = db.fit_euclidean(points.view()).unwrap();
        assert_eq!(c.unique_points, 4);
        assert_eq!(c.labels.len(), n + 1);
        assert_eq!(c.cluster_count, 1);
        assert_eq!(c.clustered_count(), n);
        assert_eq!(c.noise_indices(), vec![n]);
    }

    #[test]
    fn test_fit_cosine_weighted() {
        let db = Dbscan::new(0.3, 5).unwrap();
        let rows = array![[1.0, 0.0, 0.0], [0.9, 0.1, 0.0], [0.0, 0.0, 1.0]];
        let c = db.fit_cosine(rows.view(), &[6, 1, 1]).unwrap();
        assert_eq!(c.cluster_count, 1);
        assert_eq!(c.labels[0], c.labels[1]);
        assert_eq!(c.noise_indices(), vec![2]);

        let err = db.fit_cosine(rows.view(), &[1]).unwrap_err();
        assert_eq!(err, ClusteringError::WeightMismatch { expected: 3, actual: 1 });
    }

    #[test]
    fn test_cosine_distance() {
        let a = array![1.0, 0.0];
        let b = array![0.0, 2.0];
        let zero = array![0.0, 0.0];
        assert!(CosineDist.distance(a.view(), a.view()).abs() < 1e-12);
        assert!((CosineDist.distance(a.view(), b.view()) - 1.0).abs() < 1e-12);
        assert_eq!(CosineDist.distance(zero.view(), zero.view()), 1.0);
    }

    #[test]
    fn test_empty_input() {
        let db = Dbscan::new(1.0, 2).unwrap();
        assert_eq!(db.fit_1d(&[]).unwrap().cluster_count, 0);
        let none = Array2::<f64>::zeros((0, 3));
        assert_eq!(db.fit_euclidean(none.view()).unwrap().labels.len(), 0);
        assert_eq!(db.fit_cosine(none.view(), &[]).unwrap().cluster_count, 0);
    }

    #[test]
    fn test_standardize() {
        let mut points = array![[1.0, 7.0], [3.0, 7.0]];
        standardize(&mut points);
        assert_eq!(points, array![[-1.0, 0.0], [1.0, 0.0]]);
    }
}

//! Geometry and statistics primitives.
//!
//! # Great-circle distance
//! Haversine formula on a sphere of radius 6371 km:
//!
//! a = sin²(Δφ/2) + cos φ₁ · cos φ₂ · sin²(Δλ/2)
//! d = 2R · atan2(√a, √(1−a))
//!
//! # Normalized Shannon entropy
//! H = −Σ pᵢ log₂ pᵢ over the observed multiset, divided by log₂(k) where k is
//! the number of distinct values, giving a diversity score in [0, 1].

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::error::AnalysisError;

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A validated latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, AnalysisError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(AnalysisError::invalid(format!("latitude out of range: {latitude}")));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(AnalysisError::invalid(format!(
                "longitude out of range: {longitude}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Great-circle distance to another coordinate in kilometres.
    pub fn distance_km(&self, other: &Coordinate) -> f64 {
        if self == other {
            return 0.0;
        }

        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        // Absolute deltas keep d(a,b) and d(b,a) bit-identical.
        let d_phi = (other.latitude - self.latitude).abs().to_radians();
        let d_lambda = (other.longitude - self.longitude).abs().to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());

        EARTH_RADIUS_KM * c
    }

    /// Hashable key for deduplicating coordinates before pairwise scans.
    pub(crate) fn bits(&self) -> (u64, u64) {
        (self.latitude.to_bits(), self.longitude.to_bits())
    }
}

/// Great-circle distance in kilometres between two optional coordinate pairs.
///
/// Every coordinate must be present; a missing component is an
/// [`AnalysisError::InvalidInput`]. Identical pairs return exactly `0.0`.
pub fn great_circle_km(
    lat1: Option<f64>,
    lon1: Option<f64>,
    lat2: Option<f64>,
    lon2: Option<f64>,
) -> Result<f64, AnalysisError> {
    match (lat1, lon1, lat2, lon2) {
        (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) => {
            let a = Coordinate::new(lat1, lon1)?;
            let b = Coordinate::new(lat2, lon2)?;
            Ok(a.distance_km(&b))
        }
        _ => Err(AnalysisError::invalid("coordinate component is missing")),
    }
}

/// Maximum pairwise great-circle distance among the given points.
///
/// Points are deduplicated first so the quadratic scan only runs over
/// distinct locations. Returns 0 when fewer than two distinct points exist.
pub fn max_pairwise_distance_km(points: &[Coordinate]) -> f64 {
    let mut seen = std::collections::HashSet::new();
    let unique: Vec<Coordinate> = points
        .iter()
        .filter(|p| seen.insert(p.bits()))
        .copied()
        .collect();

    if unique.len() < 2 {
        return 0.0;
    }

    let mut max_distance = 0.0_f64;
    for (i, a) in unique.iter().enumerate() {
        for b in &unique[i + 1..] {
            max_distance = max_distance.max(a.distance_km(b));
        }
    }
    max_distance
}

/// Normalized Shannon entropy of a population of optional values.
///
/// `None` entries are dropped before counting. Returns 0 for an empty
/// population or a single distinct value, and exactly 1 when every value is
/// distinct.
pub fn normalized_entropy<T, I>(values: I) -> f64
where
    T: Hash + Eq,
    I: IntoIterator<Item = Option<T>>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut total = 0usize;
    for value in values.into_iter().flatten() {
        *counts.entry(value).or_insert(0) += 1;
        total += 1;
    }

    let unique = counts.len();
    if unique <= 1 {
        return 0.0;
    }
    if unique == total {
        return 1.0;
    }

    let n = total as f64;
    let entropy: f64 = counts
        .values()
        .map(|&count| {
            let p = count as f64 / n;
            -p * p.log2()
        })
        .sum();

    (entropy / (unique as f64).log2()).clamp(0.0, 1.0)
}

/// Population variance; 0 for fewer than two samples.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().population_variance();
    if variance.is_finite() {
        variance.max(0.0)
    } else {
        0.0
    }
}

/// Arithmetic mean; 0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Rounds to six decimal places for reproducible scores.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_york_to_london() {
        let d = great_circle_km(Some(40.7128), Some(-74.0060), Some(51.5074), Some(-0.1278))
            .unwrap();
        assert!((5520.0..=5620.0).contains(&d), "distance was {d}");
    }

    #[test]
    fn test_distance_symmetric_and_zero() {
        let pairs = [
            ((40.7128, -74.0060), (51.5074, -0.1278)),
            ((-33.8688, 151.2093), (35.6762, 139.6503)),
            ((0.0, 179.9), (0.0, -179.9)),
            ((89.9, 10.0), (-89.9, -170.0)),
        ];
        for ((lat1, lon1), (lat2, lon2)) in pairs {
            let ab = great_circle_km(Some(lat1), Some(lon1), Some(lat2), Some(lon2)).unwrap();
            let ba = great_circle_km(Some(lat2), Some(lon2), Some(lat1), Some(lon1)).unwrap();
            assert_eq!(ab, ba);
            let aa = great_circle_km(Some(lat1), Some(lon1), Some(lat1), Some(lon1)).unwrap();
            assert_eq!(aa, 0.0);
        }
    }

    #[test]
    fn test_distance_missing_coordinate() {
        let err = great_circle_km(Some(1.0), None, Some(2.0), Some(3.0)).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput { .. }));
    }

    #[test]
    fn test_distance_out_of_range() {
        assert!(great_circle_km(Some(91.0), Some(0.0), Some(0.0), Some(0.0)).is_err());
        assert!(great_circle_km(Some(0.0), Some(f64::NAN), Some(0.0), Some(0.0)).is_err());
    }

    #[test]
    fn test_max_pairwise_distance() {
        let ny = Coordinate::new(40.7128, -74.0060).unwrap();
        let london = Coordinate::new(51.5074, -0.1278).unwrap();
        let paris = Coordinate::new(48.8566, 2.3522).unwrap();

        assert_eq!(max_pairwise_distance_km(&[]), 0.0);
        assert_eq!(max_pairwise_distance_km(&[ny]), 0.0);
        assert_eq!(max_pairwise_distance_km(&[ny, ny, ny]), 0.0);

        let max = max_pairwise_distance_km(&[ny, london, paris, ny]);
        assert_eq!(max, ny.distance_km(&paris));
    }

    #[test]
    fn test_entropy_identical_values() {
        let values = vec![Some("root"); 100];
        assert_eq!(normalized_entropy(values), 0.0);
    }

    #[test]
    fn test_entropy_distinct_values() {
        let values: Vec<Option<String>> = (0..100).map(|i| Some(format!("v{i}"))).collect();
        assert!((normalized_entropy(values) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_entropy_empty_and_nulls() {
        assert_eq!(normalized_entropy(Vec::<Option<u32>>::new()), 0.0);
        assert_eq!(normalized_entropy(vec![None::<u32>, None]), 0.0);
        // Nulls are dropped, leaving two distinct values.
        assert_eq!(normalized_entropy(vec![Some(1), None, Some(2)]), 1.0);
    }

    #[test]
    fn test_entropy_skewed_distribution() {
        let mut values = vec![Some("a"); 9];
        values.push(Some("b"));
        let e = normalized_entropy(values);
        assert!(e > 0.0 && e < 1.0);
        // H(0.9, 0.1) ≈ 0.469 bits over log2(2) = 1
        assert!((e - 0.468_995_6).abs() < 1e-6);
    }

    #[test]
    fn test_population_variance() {
        assert_eq!(population_variance(&[]), 0.0);
        assert_eq!(population_variance(&[5.0]), 0.0);
        assert_eq!(population_variance(&[3.0, 3.0, 3.0]), 0.0);
        assert!((population_variance(&[1.0, 2.0, 3.0, 4.0]) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_round6() {
        assert_eq!(round6(0.123_456_789), 0.123_457);
        assert_eq!(round6(1.0), 1.0);
    }
}

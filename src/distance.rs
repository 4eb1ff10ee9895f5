//! Distance functions. Both agree with pgvector's operators (`<=>` for
//! cosine distance, `<->` for Euclidean) so the in-process and Postgres
//! backends rank identically.

use crate::errors::{Result, SearchError};
use crate::model::Metric;

/// Distance between two equal-length vectors, accumulated in `f64`.
///
/// Returns `None` when the lengths differ or, for cosine, when either
/// vector has zero norm.
pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    match metric {
        Metric::Cosine => cosine_distance(a, b),
        Metric::L2 => Some(l2_distance(a, b)),
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x = f64::from(x);
        let y = f64::from(y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    // Rounding can push the cosine marginally outside [-1, 1].
    let cos = (dot / denom).clamp(-1.0, 1.0);
    Some(1.0 - cos)
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

pub fn norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Checks that a vector can be stored in or queried against a collection
/// with the given dimension and metric.
pub fn validate_vector(vector: &[f32], dimension: usize, metric: Metric) -> Result<()> {
    if vector.len() != dimension {
        return Err(SearchError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
        return Err(SearchError::validation(format!(
            "vector component {pos} is not a finite number"
        )));
    }
    if metric == Metric::Cosine && norm(vector) <= f64::EPSILON {
        return Err(SearchError::validation(
            "zero vector has no cosine distance",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn cosine_distance_range() {
        assert!(close(cosine_distance(&[1.0, 0.0], &[2.0, 0.0]).unwrap(), 0.0));
        assert!(close(cosine_distance(&[1.0, 0.0], &[0.0, 3.0]).unwrap(), 1.0));
        assert!(close(cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]).unwrap(), 2.0));
        assert!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn l2_distance_is_euclidean() {
        assert!(close(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0));
        assert!(close(
            distance(Metric::L2, &[1.0, 1.0], &[1.0, 1.0]).unwrap(),
            0.0
        ));
    }

    #[test]
    fn mismatched_lengths_have_no_distance() {
        assert!(distance(Metric::L2, &[1.0], &[1.0, 2.0]).is_none());
        assert!(distance(Metric::Cosine, &[1.0], &[1.0, 2.0]).is_none());
    }

    #[test]
    fn validate_vector_rejects_bad_input() {
        let err = validate_vector(&[1.0, 2.0], 3, Metric::L2).unwrap_err();
        assert!(matches!(
            err,
            SearchError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(validate_vector(&[1.0, f32::NAN], 2, Metric::L2)
            .unwrap_err()
            .is_validation());
        assert!(validate_vector(&[0.0, 0.0], 2, Metric::Cosine)
            .unwrap_err()
            .is_validation());
        assert!(validate_vector(&[0.0, 0.0], 2, Metric::L2).is_ok());
    }
}

use crate::error::{CoreError, CoreResult};

/// Validate an embedding against the configured dimension and normalize it to
/// unit length for cosine semantics. Providers usually return unit vectors
/// already; normalization here is defensive.
pub fn validate_and_normalize(mut v: Vec<f32>, dimension: usize) -> CoreResult<Vec<f32>> {
    if v.len() != dimension {
        return Err(CoreError::InvariantViolation(format!(
            "embedding dimension mismatch: expected {}, got {}",
            dimension,
            v.len()
        )));
    }

    if v.iter().any(|x| !x.is_finite()) {
        return Err(CoreError::InvariantViolation(
            "embedding contains non-finite components".to_string(),
        ));
    }

    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return Err(CoreError::InvariantViolation(
            "embedding is the zero vector".to_string(),
        ));
    }

    // Skip the rescale when already unit length
    if (norm - 1.0).abs() > 1e-6 {
        for x in v.iter_mut() {
            *x = ((*x as f64) / norm) as f32;
        }
    }

    Ok(v)
}

/// Cosine similarity of two unit vectors (their inner product), clamped to [0, 1].
pub fn cosine_similarity_from_distance(distance: f64) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_mismatch_is_rejected() {
        let result = validate_and_normalize(vec![1.0, 0.0], 3);
        assert!(matches!(result, Err(CoreError::InvariantViolation(_))));
    }

    #[test]
    fn non_finite_components_are_rejected() {
        let result = validate_and_normalize(vec![1.0, f32::NAN, 0.0], 3);
        assert!(matches!(result, Err(CoreError::InvariantViolation(_))));

        let result = validate_and_normalize(vec![1.0, f32::INFINITY, 0.0], 3);
        assert!(matches!(result, Err(CoreError::InvariantViolation(_))));
    }

    #[test]
    fn zero_vector_is_rejected() {
        let result = validate_and_normalize(vec![0.0; 4], 4);
        assert!(matches!(result, Err(CoreError::InvariantViolation(_))));
    }

    #[test]
    fn vectors_are_normalized_to_unit_length() {
        let v = validate_and_normalize(vec![3.0, 4.0], 2).unwrap();
        let norm: f64 = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn unit_vectors_pass_through() {
        let v = validate_and_normalize(vec![1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn similarity_is_clamped() {
        assert_eq!(cosine_similarity_from_distance(0.0), 1.0);
        assert_eq!(cosine_similarity_from_distance(1.0), 0.0);
        assert_eq!(cosine_similarity_from_distance(2.0), 0.0);
        assert_eq!(cosine_similarity_from_distance(-0.5), 1.0);
        assert!((cosine_similarity_from_distance(0.25) - 0.75).abs() < 1e-6);
    }
}

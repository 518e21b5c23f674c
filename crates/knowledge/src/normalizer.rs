//! L2 normalization and similarity scoring.

/// Rescales embeddings to unit length so a dot product is a cosine.
#[derive(Debug, Clone, Copy)]
pub struct VectorNormalizer {
    /// Norm deviation from 1.0 under which a vector is already unit length
    tolerance: f32,
}

impl Default for VectorNormalizer {
    fn default() -> Self {
        Self { tolerance: 1e-6 }
    }
}

impl VectorNormalizer {
    /// Create a normalizer with the default tolerance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Divide every component by the Euclidean norm.
    ///
    /// Degenerate vectors (zero or non-finite norm) come back unchanged;
    /// check [`is_degenerate`](Self::is_degenerate) before using the result.
    /// Vectors that are already unit length are returned as-is.
    pub fn normalize(&self, raw: &[f32]) -> Vec<f32> {
        let norm = l2_norm(raw);
        if Self::degenerate_norm(norm) || (norm - 1.0).abs() <= self.tolerance {
            return raw.to_vec();
        }
        raw.iter().map(|v| v / norm).collect()
    }

    /// Whether the vector cannot be normalized.
    pub fn is_degenerate(&self, raw: &[f32]) -> bool {
        Self::degenerate_norm(l2_norm(raw))
    }

    /// Dot product of two equal-length vectors.
    pub fn dot(&self, a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    /// Map a cosine in [-1, 1] to a score in [0, 1].
    pub fn to_score(&self, dot: f32) -> f32 {
        ((dot + 1.0) / 2.0).clamp(0.0, 1.0)
    }

    fn degenerate_norm(norm: f32) -> bool {
        norm == 0.0 || !norm.is_finite()
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_produces_unit_vectors() {
        let n = VectorNormalizer::new();
        for raw in [vec![3.0, 4.0], vec![-2.0, 0.5, 9.0, 1.0], vec![1e-3, 2e-3], vec![250.0; 16]] {
            let unit = n.normalize(&raw);
            assert!((l2_norm(&unit) - 1.0).abs() < 1e-5, "{:?}", raw);
        }
    }

    #[test]
    fn test_zero_vector_unchanged() {
        let n = VectorNormalizer::new();
        let zero = vec![0.0; 4];
        assert_eq!(n.normalize(&zero), zero);
        assert!(n.is_degenerate(&zero));
        assert!(n.is_degenerate(&[f32::NAN, 1.0]));
        assert!(!n.is_degenerate(&[0.0, 1.0]));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let n = VectorNormalizer::new();
        let once = n.normalize(&[1.0, 2.0, 2.0]);
        assert_eq!(n.normalize(&once), once);
    }

    #[test]
    fn test_dot_of_normalized_equals_cosine() {
        let n = VectorNormalizer::new();
        let a = n.normalize(&[1.0, 0.0]);
        let b = n.normalize(&[1.0, 1.0]);
        assert!((n.dot(&a, &b) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_to_score_range() {
        let n = VectorNormalizer::new();
        assert_eq!(n.to_score(1.0), 1.0);
        assert_eq!(n.to_score(-1.0), 0.0);
        assert_eq!(n.to_score(0.0), 0.5);
        assert_eq!(n.to_score(1.0000002), 1.0);
    }
}

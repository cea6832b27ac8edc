//! Embedding helpers: validation and parsing over `&[f32]`

use crate::error::{Result, SimilarityError};

/// Owned embedding as produced upstream by a model.
pub type Embedding = Vec<f32>;

/// Check that `embedding` has exactly `dim` finite components.
pub fn check_embedding(embedding: &[f32], dim: usize) -> Result<()> {
    if embedding.len() != dim {
        return Err(SimilarityError::DimensionMismatch {
            expected: dim,
            actual: embedding.len(),
        });
    }
    if let Some(pos) = embedding.iter().position(|x| !x.is_finite()) {
        return Err(SimilarityError::InvalidEmbedding {
            reason: format!("component {} is {}", pos, embedding[pos]),
        });
    }
    Ok(())
}

/// Validate a whole batch before anything is inserted.
pub fn check_batch(embeddings: &[Embedding], idxs: &[u64], dim: usize) -> Result<()> {
    if embeddings.len() != idxs.len() {
        return Err(SimilarityError::BatchLengthMismatch {
            embeddings: embeddings.len(),
            idxs: idxs.len(),
        });
    }
    embeddings.iter().try_for_each(|e| check_embedding(e, dim))
}

/// Parse an embedding from a comma-separated string
pub fn parse_embedding(s: &str) -> Result<Embedding> {
    s.split(',')
        .map(|x| {
            x.trim()
                .parse::<f32>()
                .map_err(|_| SimilarityError::InvalidEmbedding {
                    reason: format!("Invalid float: {:?}", x),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding() {
        let e = parse_embedding("1.0, 2.0, 3.0").unwrap();
        assert_eq!(e, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_parse_embedding_rejects_garbage() {
        assert!(matches!(
            parse_embedding("1.0, abc"),
            Err(SimilarityError::InvalidEmbedding { .. })
        ));
    }

    #[test]
    fn test_check_embedding_dimension() {
        assert!(check_embedding(&[1.0, 2.0, 3.0], 3).is_ok());
        assert!(matches!(
            check_embedding(&[1.0, 2.0], 3),
            Err(SimilarityError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_check_embedding_non_finite() {
        assert!(matches!(
            check_embedding(&[1.0, f32::NAN], 2),
            Err(SimilarityError::InvalidEmbedding { .. })
        ));
        assert!(check_embedding(&[f32::INFINITY, 0.0], 2).is_err());
    }

    #[test]
    fn test_check_batch_length_mismatch() {
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(matches!(
            check_batch(&embeddings, &[0], 2),
            Err(SimilarityError::BatchLengthMismatch {
                embeddings: 2,
                idxs: 1
            })
        ));
        assert!(check_batch(&embeddings, &[0, 1], 2).is_ok());
    }
}

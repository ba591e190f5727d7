//! In-process feature-hashing embedder
//!
//! Deterministic across runs and platforms: every stemmed unigram and bigram
//! is hashed with SHA-256 into one signed bucket, then the vector is
//! L2-normalized. Texts sharing vocabulary land close together; no model
//! files or network access are needed.

use sha2::{Digest, Sha256};

use super::Embedder;
use crate::errors::{EngineError, Result};
use crate::vector_db::lexical::tokenize;

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;

pub struct LocalEmbedder {
    dimension: usize,
}

impl LocalEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EngineError::rejected(
                "local_dimension",
                "embedding dimension must be positive",
            ));
        }
        Ok(Self { dimension })
    }

    fn accumulate(&self, embedding: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let index = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        embedding[index] += sign * weight;
    }
}

impl Embedder for LocalEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut embedding = vec![0.0f32; self.dimension];
        let terms = tokenize(text);

        for term in &terms {
            self.accumulate(&mut embedding, term, UNIGRAM_WEIGHT);
        }
        for pair in terms.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut embedding, &bigram, BIGRAM_WEIGHT);
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

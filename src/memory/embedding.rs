//! Sentence embeddings for semantic memory retrieval.
//!
//! The default [`HashingEmbedder`] is a feature-hashing bag of words:
//!
//! ```text
//! text → tokenize → blake3(token) → signed bucket → L2-normalize → dim f32
//! ```
//!
//! It needs no model download and is fully deterministic, so an entry
//! re-embedded after a reload gets exactly the vector it had before.

use crate::error::{Result, SageError};

/// Turns text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    /// Embed `text`. Implementations should return unit-length vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot produce an embedding.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Output dimension.
    fn dim(&self) -> usize;
}

/// Deterministic feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    /// # Errors
    ///
    /// Returns [`SageError::Config`] if `dim` is zero.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(SageError::Config("embedding dimension must be non-zero".to_owned()));
        }
        Ok(Self { dim })
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let hash = blake3::hash(token.as_bytes());
        let bytes = hash.as_bytes();
        let mut index = [0u8; 8];
        index.copy_from_slice(&bytes[..8]);
        let slot = (u64::from_le_bytes(index) % self.dim as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        (slot, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dim: 256 }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dim];
        let tokens = tokenize(text);
        for token in &tokens {
            let (slot, sign) = self.bucket(token);
            vector[slot] += sign;
        }
        // Adjacent pairs give some sensitivity to word order.
        for pair in tokens.windows(2) {
            let (slot, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[slot] += 0.5 * sign;
        }
        Ok(l2_normalize(&vector))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Lowercased alphanumeric tokens, dropping single characters.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '\'' || ch == '-' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            if current.chars().count() > 1 {
                tokens.push(current.clone());
            }
            current.clear();
        }
    }
    if current.chars().count() > 1 {
        tokens.push(current);
    }

    tokens
}

/// L2-normalize a vector. Zero vectors are returned unchanged.
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-12 {
        return vec.to_vec();
    }
    vec.iter().map(|x| x / norm).collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom < 1e-12 {
        return 0.0;
    }
    dot / denom
}

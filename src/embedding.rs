//! Embedding provider trait and the helpers that call it.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

/// A provider that turns text into fixed-dimension vectors.
///
/// Documents and queries go through separate methods because some models
/// embed them asymmetrically. The default [`embed_query`] delegates to
/// [`embed_documents`] with a single input.
///
/// [`embed_query`]: EmbeddingProvider::embed_query
/// [`embed_documents`]: EmbeddingProvider::embed_documents
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of documents, one vector per input, in input order.
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_documents(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::provider(self.name(), "empty embedding response"))
    }

    /// Dimensionality of every vector this provider returns.
    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Embed `texts` under a timeout, checking the provider kept its contract.
pub(crate) async fn embed_documents(
    provider: &dyn EmbeddingProvider,
    texts: &[&str],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    debug!(provider = provider.name(), batch_size = texts.len(), "embedding documents");
    let vectors = tokio::time::timeout(timeout, provider.embed_documents(texts))
        .await
        .map_err(|_| Error::Timeout {
            operation: "embedding",
            after: timeout,
        })??;

    if vectors.len() != texts.len() {
        return Err(Error::provider(
            provider.name(),
            format!("returned {} vectors for {} inputs", vectors.len(), texts.len()),
        ));
    }
    for vector in &vectors {
        check_dimension(provider, vector)?;
    }
    Ok(vectors)
}

/// Embed a single query under a timeout.
pub(crate) async fn embed_query(
    provider: &dyn EmbeddingProvider,
    text: &str,
    timeout: Duration,
) -> Result<Vec<f32>> {
    debug!(provider = provider.name(), query_len = text.len(), "embedding query");
    let vector = tokio::time::timeout(timeout, provider.embed_query(text))
        .await
        .map_err(|_| Error::Timeout {
            operation: "embedding",
            after: timeout,
        })??;
    check_dimension(provider, &vector)?;
    Ok(vector)
}

fn check_dimension(provider: &dyn EmbeddingProvider, vector: &[f32]) -> Result<()> {
    if vector.len() != provider.dimension() {
        return Err(Error::provider(
            provider.name(),
            format!(
                "returned a {}-dimensional vector, expected {}",
                vector.len(),
                provider.dimension()
            ),
        ));
    }
    Ok(())
}

/// Default dimension of [`HashEmbeddings`].
pub const DEFAULT_HASH_DIMENSION: usize = 256;

/// Offline embedder based on feature hashing of lowercase word tokens.
///
/// Each token is hashed into one signed bucket; the resulting vector is
/// L2-normalized. Texts sharing vocabulary score higher than texts that do
/// not, which is enough for local use and tests without a network.
///
/// # Examples
///
/// ```
/// use ragdigest::embedding::{EmbeddingProvider, HashEmbeddings};
///
/// let embedder = HashEmbeddings::new(64)?;
/// assert_eq!(embedder.dimension(), 64);
/// # Ok::<(), ragdigest::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbeddings {
    dimension: usize,
}

impl Default for HashEmbeddings {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASH_DIMENSION,
        }
    }
}

impl HashEmbeddings {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidConfiguration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = blake3::hash(token.as_bytes());
            let bytes = hash.as_bytes();
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(word) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

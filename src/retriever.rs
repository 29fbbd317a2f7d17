use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    embedding::{self, EmbeddingProvider},
    error::{Error, Result},
    vector_db::{ScoredChunk, VectorDb},
};

/// Query-time half of the pipeline: embed the question, then search.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<VectorDb>,
    embedder: Arc<dyn EmbeddingProvider>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        store: Arc<VectorDb>,
        embedder: Arc<dyn EmbeddingProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            timeout,
        }
    }

    /// Return the `k` chunks of `collection` most similar to `query`.
    ///
    /// # Errors
    ///
    /// - [`Error::CollectionNotFound`] if the collection was never created.
    /// - [`Error::EmptyCollection`] if it holds no chunks. Checked before the
    ///   embedding provider is called.
    /// - [`Error::InvalidConfiguration`] for a blank query.
    pub async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "query must not be empty".to_string(),
            ));
        }

        let stats = self.store.stats(collection)?;
        if stats.count == 0 {
            return Err(Error::EmptyCollection(collection.to_string()));
        }

        let vector =
            embedding::embed_query(self.embedder.as_ref(), query, self.timeout).await?;
        let results = self.store.query(collection, &vector, k)?;

        debug!(
            collection,
            k,
            returned = results.len(),
            top_score = results.first().map(|r| r.score),
            "retrieved chunks"
        );
        Ok(results)
    }
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

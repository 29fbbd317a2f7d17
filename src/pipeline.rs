//! RAG orchestrator.
//!
//! [`RagPipeline`] ties the pieces together. Ingest runs
//! load → chunk → embed → index for one source at a time and commits a
//! document's chunks only after all of them are embedded. Queries run
//! retrieve → map-reduce, short-circuiting before any generation call when
//! there is nothing to answer from.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> ragdigest::Result<()> {
//! use std::sync::Arc;
//!
//! use ragdigest::{
//!     DataDir, HashEmbeddings, RagPipeline, SourceDescriptor, SourceType, VectorDb,
//!     openai::{OpenAiChat, Vendor},
//! };
//!
//! let data_dir = DataDir::resolve(None)?;
//! let pipeline = RagPipeline::builder()
//!     .store(Arc::new(VectorDb::open(&data_dir.index_db())?))
//!     .embedder(Arc::new(HashEmbeddings::default()))
//!     .llm(Arc::new(OpenAiChat::from_env(Vendor::OpenAi)?))
//!     .build()?;
//!
//! pipeline
//!     .ingest(&SourceDescriptor::new("notes/rates.md", SourceType::News))
//!     .await?;
//! let outcome = pipeline.ask("What did the bank decide?", SourceType::News, None).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Serialize;
use tracing::{error, info};

use crate::{
    chunking::{Chunk, Chunker},
    config::RagConfig,
    conversation::Conversation,
    document::{Document, SourceId, SourceType},
    embedding::{self, EmbeddingProvider},
    error::{Error, Result},
    llm::{GenerationParams, LlmProvider},
    loader::{ContentLoader, FileLoader, SourceDescriptor},
    map_reduce::{MapReduce, Response, SummaryStyle, Task},
    retriever::Retriever,
    vector_db::VectorDb,
};

/// Ingest stage at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Loading,
    Chunking,
    Embedding,
    Indexing,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexing => "indexing",
        })
    }
}

/// Default collection for each source type.
pub fn default_collection(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::News => "news_articles",
        SourceType::Video => "youtube_videos",
        SourceType::Pdf => "pdf_documents",
        SourceType::Generic => "knowledge_base",
    }
}

/// How the pipeline picks the collection for a source or a question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CollectionTarget {
    /// One collection per source type, see [`default_collection`].
    #[default]
    BySourceType,
    /// Everything goes to one named collection.
    Named(String),
}

impl CollectionTarget {
    pub fn resolve(&self, source_type: SourceType) -> String {
        match self {
            Self::BySourceType => default_collection(source_type).to_string(),
            Self::Named(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub source_id: SourceId,
    pub collection: String,
    pub chunks_added: usize,
    pub skipped_duplicates: usize,
    /// Chunks of an earlier, different version of the source that were
    /// removed.
    pub chunks_replaced: usize,
    pub title: Option<String>,
}

/// A source cited by an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub source_id: SourceId,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub response: Response,
    /// Unique sources of the retrieved chunks, in rank order.
    pub references: Vec<Reference>,
    pub chunks_retrieved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// The collection is missing or empty; no generation call was made.
    NoContentIndexed,
    /// Nothing scored above the similarity threshold; no generation call
    /// was made.
    NoRelevantMatch,
    Answered(Answer),
}

/// Result of single-shot summarization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub source_id: SourceId,
    pub title: Option<String>,
    pub chunks: usize,
    pub response: Response,
}

pub struct RagPipeline {
    config: RagConfig,
    chunker: Chunker,
    store: Arc<VectorDb>,
    loader: Arc<dyn ContentLoader>,
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Retriever,
    responder: Option<MapReduce>,
    target: CollectionTarget,
}

impl RagPipeline {
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<VectorDb> {
        &self.store
    }

    /// The map-reduce responder, if an LLM was configured.
    pub fn responder(&self) -> Option<&MapReduce> {
        self.responder.as_ref()
    }

    fn require_responder(&self) -> Result<&MapReduce> {
        self.responder.as_ref().ok_or_else(|| {
            Error::InvalidConfiguration("no LLM provider configured".to_string())
        })
    }

    /// Collection used for sources and questions of `source_type`.
    pub fn collection_for(&self, source_type: SourceType) -> String {
        self.target.resolve(source_type)
    }

    // -- Ingest --

    /// Load, chunk, embed and index one source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Ingest`] naming the stage that failed. Nothing is
    /// written unless every chunk was embedded.
    ///
    /// Ingesting a source again with the same text is a no-op. If the text
    /// changed, its old chunks are replaced by the new ones.
    pub async fn ingest(&self, source: &SourceDescriptor) -> Result<IngestReport> {
        let loaded = self
            .loader
            .load(source)
            .await
            .map_err(|e| stage_failed(IngestStage::Loading, &source.locator, e))?;
        let document = loaded.into_document(source);
        self.ingest_document(&document).await
    }

    /// Chunk, embed and index a document that is already in memory.
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestReport> {
        let locator = document
            .metadata
            .source
            .as_deref()
            .unwrap_or(document.source_id.as_str());
        let collection = self.collection_for(document.metadata.source_type);

        if document.text.trim().is_empty() {
            return Err(stage_failed(
                IngestStage::Chunking,
                locator,
                Error::InvalidConfiguration("document has no text".to_string()),
            ));
        }
        let chunks = self.chunker.split(document);

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = embedding::embed_documents(
            self.embedder.as_ref(),
            &texts,
            self.config.embedding_timeout(),
        )
        .await
        .map_err(|e| stage_failed(IngestStage::Embedding, locator, e))?;

        let report = self
            .store
            .replace_source(&collection, &document.source_id, &chunks, &vectors)
            .map_err(|e| stage_failed(IngestStage::Indexing, locator, e))?;

        info!(
            source_id = %document.source_id,
            collection = %collection,
            chunks = chunks.len(),
            added = report.added,
            skipped = report.skipped_duplicates,
            replaced = report.replaced,
            "ingested source"
        );

        Ok(IngestReport {
            source_id: document.source_id.clone(),
            collection,
            chunks_added: report.added,
            skipped_duplicates: report.skipped_duplicates,
            chunks_replaced: report.replaced,
            title: document.metadata.title.clone(),
        })
    }

    /// Ingest several sources one after another. A failure is reported in
    /// its slot and does not stop the rest.
    pub async fn ingest_batch(
        &self,
        sources: &[SourceDescriptor],
    ) -> Vec<Result<IngestReport>> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            results.push(self.ingest(source).await);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total = sources.len(), failed, "batch ingest complete");
        results
    }

    // -- Query --

    /// Answer `question` from the collection for `source_type`, optionally
    /// conditioned on recent conversation turns.
    pub async fn ask(
        &self,
        question: &str,
        source_type: SourceType,
        conversation: Option<&Conversation>,
    ) -> Result<QueryOutcome> {
        let collection = self.collection_for(source_type);
        self.ask_collection(&collection, question, source_type, conversation)
            .await
    }

    /// Like [`ask`](Self::ask), against an explicit collection.
    pub async fn ask_collection(
        &self,
        collection: &str,
        question: &str,
        source_type: SourceType,
        conversation: Option<&Conversation>,
    ) -> Result<QueryOutcome> {
        let retrieved = match self
            .retriever
            .retrieve(collection, question, self.config.top_k)
            .await
        {
            Ok(retrieved) => retrieved,
            Err(Error::EmptyCollection(_) | Error::CollectionNotFound(_)) => {
                info!(collection, "no content indexed");
                return Ok(QueryOutcome::NoContentIndexed);
            }
            Err(e) => return Err(e),
        };

        let chunks: Vec<Chunk> = retrieved
            .into_iter()
            .filter(|r| {
                self.config
                    .similarity_threshold
                    .is_none_or(|threshold| r.score >= threshold)
            })
            .map(|r| r.chunk)
            .collect();
        if chunks.is_empty() {
            info!(collection, "no chunk passed the similarity threshold");
            return Ok(QueryOutcome::NoRelevantMatch);
        }

        let responder = self.require_responder()?;
        let task = Task::Answer {
            question: question.to_string(),
            source_type,
        };
        let response = responder
            .respond(&chunks, &task, conversation)
            .await
            .inspect_err(|e| error!(collection, error = %e, "answering failed"))?;

        info!(
            collection,
            chunks = chunks.len(),
            map_failed = response.map_failed,
            "answered question"
        );
        Ok(QueryOutcome::Answered(Answer {
            references: references(&chunks),
            chunks_retrieved: chunks.len(),
            response,
        }))
    }

    /// Summarize one source without indexing it.
    pub async fn summarize(
        &self,
        source: &SourceDescriptor,
        style: SummaryStyle,
    ) -> Result<Summary> {
        let document = self.loader.load(source).await?.into_document(source);
        self.summarize_document(&document, style).await
    }

    pub async fn summarize_document(
        &self,
        document: &Document,
        style: SummaryStyle,
    ) -> Result<Summary> {
        let responder = self.require_responder()?;
        let chunks = self.chunker.split(document);
        let task = Task::Summarize {
            style,
            source_type: document.metadata.source_type,
        };
        let response = responder.respond(&chunks, &task, None).await?;

        info!(
            source_id = %document.source_id,
            chunks = chunks.len(),
            map_failed = response.map_failed,
            "summarized source"
        );
        Ok(Summary {
            source_id: document.source_id.clone(),
            title: document.metadata.title.clone(),
            chunks: chunks.len(),
            response,
        })
    }
}

impl fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("target", &self.target)
            .field("embedder", &self.embedder.name())
            .finish_non_exhaustive()
    }
}

fn stage_failed(stage: IngestStage, locator: &str, source: Error) -> Error {
    error!(%stage, source = locator, error = %source, "ingest failed");
    Error::Ingest {
        stage,
        source: Box::new(source),
    }
}

/// Unique sources of `chunks`, first occurrence wins.
fn references(chunks: &[Chunk]) -> Vec<Reference> {
    let mut seen = HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(&c.source_id))
        .map(|c| Reference {
            source_id: c.source_id.clone(),
            title: c.metadata.title.clone(),
            authors: c.metadata.authors.clone(),
            published: c.metadata.published.clone(),
            source: c.metadata.source.clone(),
        })
        .collect()
}

/// Builder for [`RagPipeline`].
///
/// The store and the embedder are required. Without an LLM the pipeline can
/// ingest but not answer or summarize. The config defaults to
/// [`RagConfig::default`], the loader to [`FileLoader`], and collections are
/// chosen per source type.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    store: Option<Arc<VectorDb>>,
    loader: Option<Arc<dyn ContentLoader>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn LlmProvider>>,
    target: CollectionTarget,
}

impl RagPipelineBuilder {
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn store(mut self, store: Arc<VectorDb>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ContentLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn collection(mut self, target: CollectionTarget) -> Self {
        self.target = target;
        self
    }

    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = self.store.ok_or_else(|| {
            Error::InvalidConfiguration("store is required".to_string())
        })?;
        let embedder = self.embedder.ok_or_else(|| {
            Error::InvalidConfiguration("embedder is required".to_string())
        })?;
        if let CollectionTarget::Named(name) = &self.target
            && name.trim().is_empty()
        {
            return Err(Error::InvalidConfiguration(
                "collection name must not be empty".to_string(),
            ));
        }

        let params = GenerationParams {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.generation_timeout(),
        };
        let responder = self
            .llm
            .map(|llm| {
                MapReduce::new(llm, params, config.map_concurrency, config.history_turns)
            })
            .transpose()?;
        let retriever =
            Retriever::new(store.clone(), embedder.clone(), config.embedding_timeout());

        Ok(RagPipeline {
            chunker: config.chunker()?,
            config,
            store,
            loader: self.loader.unwrap_or_else(|| Arc::new(FileLoader)),
            embedder,
            retriever,
            responder,
            target: self.target,
        })
    }
}

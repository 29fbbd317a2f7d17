//! ragdigest - build a knowledge base from long-form content and query it.
//!
//! Sources (articles, transcripts, documents) are split into overlapping
//! chunks, embedded, and stored in named collections inside a single
//! [redb](https://github.com/cberner/redb) database. Questions retrieve the
//! most similar chunks by cosine similarity and are answered with a
//! map-reduce protocol: one generation call per chunk, then one call that
//! combines the partial results.
//!
//! The same map-reduce responder summarizes a single source without
//! indexing it.
//!
//! # Quick start
//!
//! ```no_run
//! # async fn demo() -> ragdigest::Result<()> {
//! use std::sync::Arc;
//!
//! use ragdigest::{
//!     DataDir, HashEmbeddings, QueryOutcome, RagPipeline, SourceDescriptor, SourceType,
//!     VectorDb,
//!     openai::{OpenAiChat, Vendor},
//! };
//!
//! let data_dir = DataDir::resolve(None)?;
//! let pipeline = RagPipeline::builder()
//!     .store(Arc::new(VectorDb::open(&data_dir.index_db())?))
//!     .embedder(Arc::new(HashEmbeddings::default()))
//!     .llm(Arc::new(OpenAiChat::from_env(Vendor::Groq)?))
//!     .build()?;
//!
//! pipeline
//!     .ingest(&SourceDescriptor::new("articles/fed.md", SourceType::News))
//!     .await?;
//!
//! match pipeline.ask("Why did rates change?", SourceType::News, None).await? {
//!     QueryOutcome::Answered(answer) => println!("{}", answer.response.text),
//!     QueryOutcome::NoContentIndexed => println!("nothing indexed yet"),
//!     QueryOutcome::NoRelevantMatch => println!("nothing relevant"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod conversation;
pub mod data_dir;
pub mod document;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod loader;
pub mod map_reduce;
pub mod openai;
pub mod pipeline;
pub mod prompts;
pub mod retriever;
pub mod vector_db;

pub use chunking::{Chunk, Chunker};
pub use config::RagConfig;
pub use conversation::Conversation;
pub use data_dir::DataDir;
pub use document::{Document, Metadata, SourceId, SourceType};
pub use embedding::{EmbeddingProvider, HashEmbeddings};
pub use error::{Error, Result};
pub use llm::{LlmProvider, Message, Role};
pub use loader::{ContentLoader, FileLoader, LoadedContent, SourceDescriptor};
pub use map_reduce::{MapReduce, Response, SummaryStyle, Task};
pub use pipeline::{
    Answer, CollectionTarget, IngestReport, QueryOutcome, RagPipeline, Reference, Summary,
};
pub use retriever::Retriever;
pub use vector_db::{CollectionStats, ScoredChunk, VectorDb};

//! Two-phase summarization over an ordered list of chunks.
//!
//! The map phase asks the model about each chunk on its own, concurrently
//! and bounded by a semaphore. The reduce phase makes exactly one call over
//! the successful map outputs in chunk order. A failed map call degrades the
//! result; a failed reduce call fails it.

use std::{fmt, sync::Arc};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::{
    chunking::Chunk,
    conversation::Conversation,
    document::SourceType,
    error::{Error, Result},
    llm::{self, GenerationParams, LlmProvider},
    prompts,
};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStyle {
    #[default]
    Concise,
    Detailed,
}

impl fmt::Display for SummaryStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Concise => "concise",
            Self::Detailed => "detailed",
        })
    }
}

impl std::str::FromStr for SummaryStyle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "concise" => Ok(Self::Concise),
            "detailed" => Ok(Self::Detailed),
            other => Err(format!("unknown summary style: {other}")),
        }
    }
}

/// What the responder is asked to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    Summarize {
        style: SummaryStyle,
        source_type: SourceType,
    },
    Answer {
        question: String,
        source_type: SourceType,
    },
}

impl Task {
    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Summarize { source_type, .. } | Self::Answer { source_type, .. } => {
                *source_type
            }
        }
    }
}

/// Generation calls issued by one [`MapReduce::respond`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallUsage {
    pub map_calls: usize,
    pub reduce_calls: usize,
}

impl CallUsage {
    pub fn total(&self) -> usize {
        self.map_calls + self.reduce_calls
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    pub text: String,
    pub usage: CallUsage,
    pub map_succeeded: usize,
    pub map_failed: usize,
}

impl Response {
    /// Whether some chunks were left out because their map call failed.
    pub fn is_degraded(&self) -> bool {
        self.map_failed > 0
    }
}

/// The map-reduce responder.
///
/// With a single chunk both phases still run, so every response costs
/// `chunks + 1` generation calls.
#[derive(Clone)]
pub struct MapReduce {
    llm: Arc<dyn LlmProvider>,
    params: GenerationParams,
    concurrency: usize,
    history_turns: usize,
}

impl MapReduce {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if `concurrency` is zero.
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        params: GenerationParams,
        concurrency: usize,
        history_turns: usize,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(Error::InvalidConfiguration(
                "map concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            llm,
            params,
            concurrency,
            history_turns,
        })
    }

    /// One generation call over a single chunk.
    pub async fn map_chunk(&self, chunk: &Chunk, task: &Task) -> Result<String> {
        let messages = prompts::map_messages(task, &chunk.text);
        llm::generate(self.llm.as_ref(), &messages, self.params).await
    }

    /// One generation call combining the map outputs, in the given order.
    pub async fn reduce_outputs(
        &self,
        outputs: &[String],
        task: &Task,
        conversation: Option<&Conversation>,
    ) -> Result<String> {
        let outputs: Vec<&str> = outputs.iter().map(String::as_str).collect();
        let messages =
            prompts::reduce_messages(task, &outputs, conversation, self.history_turns);
        llm::generate(self.llm.as_ref(), &messages, self.params).await
    }

    /// Run the map phase over `chunks`, then reduce.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfiguration`] if `chunks` is empty.
    /// - [`Error::AllMapCallsFailed`] if no map call succeeded; reduce is
    ///   skipped.
    /// - Any error of the reduce call.
    pub async fn respond(
        &self,
        chunks: &[Chunk],
        task: &Task,
        conversation: Option<&Conversation>,
    ) -> Result<Response> {
        if chunks.is_empty() {
            return Err(Error::InvalidConfiguration(
                "cannot respond over an empty chunk list".to_string(),
            ));
        }

        let semaphore = Semaphore::new(self.concurrency);
        let semaphore = &semaphore;

        // join_all yields results in input order regardless of completion order.
        let outcomes: Vec<Option<String>> =
            join_all(chunks.iter().map(|chunk| async move {
                let _permit = semaphore.acquire().await;
                match self.map_chunk(chunk, task).await {
                    Ok(output) => Some(output),
                    Err(e) => {
                        warn!(
                            provider = self.llm.name(),
                            chunk_id = %chunk.chunk_id,
                            error = %e,
                            "map call failed"
                        );
                        None
                    }
                }
            }))
            .await;

        let outputs: Vec<String> = outcomes.into_iter().flatten().collect();
        let map_succeeded = outputs.len();
        let map_failed = chunks.len() - map_succeeded;
        let mut usage = CallUsage {
            map_calls: chunks.len(),
            reduce_calls: 0,
        };

        if outputs.is_empty() {
            return Err(Error::AllMapCallsFailed {
                attempted: chunks.len(),
            });
        }

        debug!(map_succeeded, map_failed, "map phase complete");
        usage.reduce_calls = 1;
        let text = self.reduce_outputs(&outputs, task, conversation).await?;

        Ok(Response {
            text,
            usage,
            map_succeeded,
            map_failed,
        })
    }
}

impl fmt::Debug for MapReduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapReduce")
            .field("llm", &self.llm.name())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

//! Chat-completion provider trait.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A text-generation backend.
///
/// Implementations must be safe to call concurrently: the map phase issues
/// several requests at once.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String>;

    fn name(&self) -> &str;
}

/// Sampling and deadline settings applied to every generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// Call `provider` under the configured timeout.
pub(crate) async fn generate(
    provider: &dyn LlmProvider,
    messages: &[Message],
    params: GenerationParams,
) -> Result<String> {
    debug!(provider = provider.name(), messages = messages.len(), "generating");
    tokio::time::timeout(
        params.timeout,
        provider.generate(messages, params.temperature, params.max_tokens),
    )
    .await
    .map_err(|_| Error::Timeout {
        operation: "generation",
        after: params.timeout,
    })?
}

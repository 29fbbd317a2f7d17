//! Providers for OpenAI-compatible HTTP APIs.
//!
//! Both OpenAI and Groq expose the same `/chat/completions` and
//! `/embeddings` endpoints, so one client covers both; only the base URL,
//! the API key variable and the default model differ.

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error};

use crate::{
    embedding::EmbeddingProvider,
    error::{Error, Result},
    llm::{LlmProvider, Message},
};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

/// Which hosted API a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Vendor {
    #[default]
    OpenAi,
    Groq,
}

impl Vendor {
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_BASE_URL,
            Self::Groq => GROQ_BASE_URL,
        }
    }

    /// Environment variable holding the API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }

    pub fn default_chat_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-5-mini",
            Self::Groq => "llama-3.3-70b-versatile",
        }
    }

    fn api_key_from_env(self) -> Result<String> {
        std::env::var(self.api_key_var()).map_err(|_| {
            Error::provider(
                self.name(),
                format!("{} environment variable not set", self.api_key_var()),
            )
        })
    }
}

impl std::str::FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Connection details shared by the chat and embedding clients.
#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    vendor: Vendor,
    base_url: String,
    api_key: String,
}

impl Endpoint {
    fn new(vendor: Vendor, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::provider(vendor.name(), "API key must not be empty"));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            vendor,
            base_url: vendor.base_url().to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let provider = self.vendor.name();
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider, error = %e, "request failed");
                Error::provider(provider, format!("request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);

            error!(provider, %status, "API error");
            return Err(Error::provider(
                provider,
                format!("API returned {status}: {detail}"),
            ));
        }

        response.json().await.map_err(|e| {
            error!(provider, error = %e, "failed to parse response");
            Error::provider(provider, format!("failed to parse response: {e}"))
        })
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("vendor", &self.vendor)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

// -- Wire types --

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_completion_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// -- Chat --

/// An [`LlmProvider`] backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    endpoint: Endpoint,
    model: String,
}

impl OpenAiChat {
    pub fn new(vendor: Vendor, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(vendor, api_key.into())?,
            model: vendor.default_chat_model().to_string(),
        })
    }

    /// Read the API key from `OPENAI_API_KEY` or `GROQ_API_KEY`.
    pub fn from_env(vendor: Vendor) -> Result<Self> {
        Self::new(vendor, vendor.api_key_from_env()?)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LlmProvider for OpenAiChat {
    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        debug!(
            provider = self.name(),
            model = %self.model,
            messages = messages.len(),
            "chat completion"
        );

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature,
            max_completion_tokens: max_tokens,
        };
        let response: ChatResponse =
            self.endpoint.post("chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::provider(self.name(), "response contained no message"))
    }

    fn name(&self) -> &str {
        self.endpoint.vendor.name()
    }
}

// -- Embeddings --

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    endpoint: Endpoint,
    model: String,
    dimension: usize,
    /// If set, sent to the API to truncate embeddings to this size.
    request_dimensions: Option<usize>,
}

impl OpenAiEmbeddings {
    /// Uses `text-embedding-3-small` (1536 dimensions) by default.
    pub fn new(vendor: Vendor, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(vendor, api_key.into())?,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            request_dimensions: None,
        })
    }

    pub fn from_env(vendor: Vendor) -> Result<Self> {
        Self::new(vendor, vendor.api_key_from_env()?)
    }

    /// Set the model and the dimension it natively produces.
    pub fn with_model(mut self, model: impl Into<String>, dimension: usize) -> Self {
        self.model = model.into();
        self.dimension = dimension;
        self
    }

    /// Ask the API to shorten embeddings to `dimension`.
    pub fn with_dimensions(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self.request_dimensions = Some(dimension);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            provider = self.name(),
            model = %self.model,
            batch_size = texts.len(),
            "embedding batch"
        );

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.request_dimensions,
        };
        let response: EmbeddingResponse =
            self.endpoint.post("embeddings", &request).await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        self.endpoint.vendor.name()
    }
}

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use ragdigest::{
    ContentLoader, Conversation, Document, EmbeddingProvider, Error, LlmProvider,
    LoadedContent, Message, Metadata, QueryOutcome, RagConfig, RagPipeline, Result,
    SourceDescriptor, SourceType, SummaryStyle, VectorDb, pipeline::IngestStage,
};

// -- Stub providers --

/// Four keywords, one dimension each; the vector counts their occurrences.
const KEYWORDS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

#[derive(Default)]
struct KeywordEmbeddings {
    calls: AtomicUsize,
    fail: bool,
}

impl KeywordEmbeddings {
    fn vector(text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        KEYWORDS
            .iter()
            .map(|k| lowered.matches(k).count() as f32)
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Provider {
                provider: "keywords".into(),
                message: "quota exceeded".into(),
            });
        }
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        KEYWORDS.len()
    }

    fn name(&self) -> &str {
        "keywords"
    }
}

/// One-hot on the first character: 'a', 'b', 'c', anything else.
struct FirstCharEmbeddings;

#[async_trait]
impl EmbeddingProvider for FirstCharEmbeddings {
    async fn embed_documents(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let slot = match t.chars().next() {
                    Some('a') => 0,
                    Some('b') => 1,
                    Some('c') => 2,
                    _ => 3,
                };
                let mut v = vec![0.0; 4];
                v[slot] = 1.0;
                v
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        4
    }

    fn name(&self) -> &str {
        "first-char"
    }
}

/// Records every call. Map calls answer with the `DOCn` tag found in the
/// chunk; prompts containing `POISON` fail.
#[derive(Default)]
struct StubLlm {
    prompts: Mutex<Vec<String>>,
}

impl StubLlm {
    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

fn is_reduce(prompt: &str) -> bool {
    prompt.contains("Current Question:") || prompt.contains("combines the previous summaries")
}

#[async_trait]
impl LlmProvider for StubLlm {
    async fn generate(
        &self,
        messages: &[Message],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.clone());

        if is_reduce(&prompt) {
            return Ok("final answer".to_string());
        }
        if prompt.contains("POISON") {
            return Err(Error::Provider {
                provider: "stub".into(),
                message: "content filter".into(),
            });
        }
        let tag = prompt
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .find(|w| w.starts_with("DOC") && w[3..].chars().all(|c| c.is_ascii_digit()))
            .unwrap_or("untagged");
        Ok(format!("facts from {tag}"))
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Serves texts keyed by locator; `set` edits a source between ingests.
#[derive(Default)]
struct MemoryLoader {
    texts: Mutex<HashMap<String, String>>,
}

impl MemoryLoader {
    fn with(self, locator: &str, text: &str) -> Self {
        self.set(locator, text);
        self
    }

    fn set(&self, locator: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(locator.to_string(), text.to_string());
    }
}

#[async_trait]
impl ContentLoader for MemoryLoader {
    async fn load(&self, source: &SourceDescriptor) -> Result<LoadedContent> {
        let text = self
            .texts
            .lock()
            .unwrap()
            .get(&source.locator)
            .cloned()
            .ok_or_else(|| Error::Load {
                source_name: source.locator.clone(),
                reason: "not found".into(),
            })?;
        Ok(LoadedContent {
            text,
            metadata: Metadata {
                title: Some(format!("Title of {}", source.locator)),
                authors: vec!["Reporter".into()],
                ..Metadata::default()
            },
        })
    }
}

struct Harness {
    store: Arc<VectorDb>,
    embedder: Arc<KeywordEmbeddings>,
    llm: Arc<StubLlm>,
    pipeline: RagPipeline,
}

fn harness(loader: MemoryLoader, config: RagConfig) -> Harness {
    harness_with(loader, config, KeywordEmbeddings::default())
}

fn harness_with(
    loader: MemoryLoader,
    config: RagConfig,
    embedder: KeywordEmbeddings,
) -> Harness {
    let store = Arc::new(VectorDb::open_in_memory().unwrap());
    let embedder = Arc::new(embedder);
    let llm = Arc::new(StubLlm::default());
    let pipeline = RagPipeline::builder()
        .config(config)
        .store(store.clone())
        .loader(Arc::new(loader))
        .embedder(embedder.clone())
        .llm(llm.clone())
        .build()
        .unwrap();
    Harness {
        store,
        embedder,
        llm,
        pipeline,
    }
}

fn news(locator: &str) -> SourceDescriptor {
    SourceDescriptor::new(locator, SourceType::News)
}

// -- Scenarios --

#[tokio::test]
async fn long_document_is_split_and_retrieved_by_vector() {
    let store = Arc::new(VectorDb::open_in_memory().unwrap());
    let pipeline = RagPipeline::builder()
        .store(store.clone())
        .embedder(Arc::new(FirstCharEmbeddings))
        .build()
        .unwrap();

    // Windows start at 0, 800 and 1600, so each chunk opens with a new letter.
    let text = format!("{}{}{}", "a".repeat(800), "b".repeat(800), "c".repeat(900));
    let doc = Document::from_content(
        text,
        Metadata {
            source_type: SourceType::Generic,
            ..Metadata::default()
        },
    );

    let report = pipeline.ingest_document(&doc).await.unwrap();
    assert_eq!(report.chunks_added, 3);
    assert_eq!(report.collection, "knowledge_base");

    let results = store
        .query("knowledge_base", &[0.0, 1.0, 0.0, 0.0], 2)
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.sequence, 1);
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert!(results[1].score.abs() < 1e-6);
    // Tie at zero goes to the chunk indexed first.
    assert_eq!(results[1].chunk.sequence, 0);
}

#[tokio::test]
async fn empty_collection_answers_without_generation() {
    let h = harness(MemoryLoader::default(), RagConfig::default());
    h.store.create_collection("news_articles").unwrap();

    let outcome = h
        .pipeline
        .ask("what happened?", SourceType::News, None)
        .await
        .unwrap();

    assert_eq!(outcome, QueryOutcome::NoContentIndexed);
    assert_eq!(h.llm.calls(), 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn never_created_collection_is_no_content() {
    let h = harness(MemoryLoader::default(), RagConfig::default());
    let outcome = h
        .pipeline
        .ask("anything?", SourceType::Video, None)
        .await
        .unwrap();
    assert_eq!(outcome, QueryOutcome::NoContentIndexed);
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn failed_map_call_is_skipped_and_order_kept() {
    let loader = MemoryLoader::default()
        .with("one", "DOC1 alpha alpha alpha")
        .with("two", "DOC2 alpha beta POISON")
        .with("three", "DOC3 beta gamma");
    let config = RagConfig::builder().top_k(3).build().unwrap();
    let h = harness(loader, config);

    for locator in ["one", "two", "three"] {
        h.pipeline.ingest(&news(locator)).await.unwrap();
    }

    let outcome = h
        .pipeline
        .ask("alpha", SourceType::News, None)
        .await
        .unwrap();
    let QueryOutcome::Answered(answer) = outcome else {
        panic!("expected an answer, got {outcome:?}");
    };

    assert_eq!(answer.chunks_retrieved, 3);
    assert_eq!(answer.response.text, "final answer");
    assert_eq!(answer.response.usage.map_calls, 3);
    assert_eq!(answer.response.usage.reduce_calls, 1);
    assert_eq!(answer.response.map_failed, 1);
    assert!(answer.response.is_degraded());

    // Three map calls plus one reduce.
    assert_eq!(h.llm.calls(), 4);
    let reduce = h.llm.last_prompt();
    let first = reduce.find("facts from DOC1").unwrap();
    let third = reduce.find("facts from DOC3").unwrap();
    assert!(first < third);
    assert!(!reduce.contains("DOC2"));

    // References follow rank order and are unique per source.
    let titles: Vec<_> = answer
        .references
        .iter()
        .map(|r| r.title.clone().unwrap())
        .collect();
    assert_eq!(titles, vec!["Title of one", "Title of two", "Title of three"]);
    assert_eq!(answer.references[0].authors, vec!["Reporter".to_string()]);
}

#[tokio::test]
async fn all_map_calls_failing_is_an_error() {
    let loader = MemoryLoader::default().with("bad", "DOC1 alpha POISON");
    let h = harness(loader, RagConfig::default());
    h.pipeline.ingest(&news("bad")).await.unwrap();

    let err = h
        .pipeline
        .ask("alpha", SourceType::News, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllMapCallsFailed { attempted: 1 }));
    assert_eq!(h.llm.calls(), 1);
}

#[tokio::test]
async fn conversation_reaches_the_reduce_prompt() {
    let loader = MemoryLoader::default().with("one", "DOC1 alpha beta");
    let config = RagConfig::builder().history_turns(2).build().unwrap();
    let h = harness(loader, config);
    h.pipeline.ingest(&news("one")).await.unwrap();

    let mut conversation = Conversation::new();
    conversation.push_user("first question");
    conversation.push_assistant("first answer");
    conversation.push_user("second question");
    conversation.push_assistant("second answer");

    h.pipeline
        .ask("and alpha?", SourceType::News, Some(&conversation))
        .await
        .unwrap();

    let reduce = h.llm.last_prompt();
    assert!(reduce.contains("User: second question\n\nAssistant: second answer"));
    assert!(!reduce.contains("first question"));
    assert!(reduce.contains("Current Question: and alpha?"));
    assert!(reduce.contains("[Document 1]\nfacts from DOC1"));
}

#[tokio::test]
async fn threshold_filters_to_no_relevant_match() {
    let loader = MemoryLoader::default().with("one", "DOC1 gamma gamma");
    let config = RagConfig::builder()
        .similarity_threshold(0.5)
        .build()
        .unwrap();
    let h = harness(loader, config);
    h.pipeline.ingest(&news("one")).await.unwrap();

    let outcome = h
        .pipeline
        .ask("alpha", SourceType::News, None)
        .await
        .unwrap();
    assert_eq!(outcome, QueryOutcome::NoRelevantMatch);
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn reingesting_is_idempotent() {
    let loader = MemoryLoader::default().with("one", "DOC1 alpha");
    let h = harness(loader, RagConfig::default());

    let first = h.pipeline.ingest(&news("one")).await.unwrap();
    let second = h.pipeline.ingest(&news("one")).await.unwrap();

    assert_eq!(first.chunks_added, 1);
    assert_eq!(second.chunks_added, 0);
    assert_eq!(second.skipped_duplicates, 1);
    assert_eq!(first.source_id, second.source_id);
    assert_eq!(h.store.stats("news_articles").unwrap().count, 1);
}

#[tokio::test]
async fn edited_source_replaces_its_old_chunks() {
    let loader = Arc::new(MemoryLoader::default().with("page", &"x".repeat(2500)));
    let store = Arc::new(VectorDb::open_in_memory().unwrap());
    let pipeline = RagPipeline::builder()
        .store(store.clone())
        .embedder(Arc::new(KeywordEmbeddings::default()))
        .loader(loader.clone())
        .build()
        .unwrap();

    let first = pipeline.ingest(&news("page")).await.unwrap();
    assert_eq!(first.chunks_added, 3);

    loader.set("page", &"y".repeat(3500));
    let second = pipeline.ingest(&news("page")).await.unwrap();
    assert_eq!(second.source_id, first.source_id);
    assert_eq!(second.chunks_added, 5);
    assert_eq!(second.skipped_duplicates, 0);
    assert_eq!(second.chunks_replaced, 3);

    let stored = store
        .query("news_articles", &[1.0, 0.0, 0.0, 0.0], 100)
        .unwrap();
    assert_eq!(stored.len(), 5);
    assert!(stored.iter().all(|r| !r.chunk.text.contains('x')));
    let sources = store.list_sources("news_articles").unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].chunks, 5);

    let third = pipeline.ingest(&news("page")).await.unwrap();
    assert_eq!(third.chunks_added, 0);
    assert_eq!(third.skipped_duplicates, 5);
    assert_eq!(third.chunks_replaced, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingest_of_same_source_stores_each_chunk_once() {
    let text = "alpha ".repeat(600);
    let loader = MemoryLoader::default().with("dup", &text);
    let h = harness(loader, RagConfig::default());
    let pipeline = Arc::new(h.pipeline);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.ingest(&news("dup")).await })
        })
        .collect();

    let mut added = 0;
    for handle in handles {
        added += handle.await.unwrap().unwrap().chunks_added;
    }

    // 3600 characters at 1000/200 windows.
    assert_eq!(added, 5);
    assert_eq!(h.store.stats("news_articles").unwrap().count, 5);
}

#[tokio::test]
async fn embedding_failure_leaves_store_untouched() {
    let loader = MemoryLoader::default().with("one", "DOC1 alpha");
    let h = harness_with(
        loader,
        RagConfig::default(),
        KeywordEmbeddings {
            fail: true,
            ..KeywordEmbeddings::default()
        },
    );

    let err = h.pipeline.ingest(&news("one")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Ingest {
            stage: IngestStage::Embedding,
            ..
        }
    ));
    assert!(err.is_retryable());
    assert!(h.store.list_collections().unwrap().is_empty());
}

#[tokio::test]
async fn load_failure_reports_stage() {
    let h = harness(MemoryLoader::default(), RagConfig::default());
    let err = h.pipeline.ingest(&news("missing")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Ingest {
            stage: IngestStage::Loading,
            ..
        }
    ));
}

#[tokio::test]
async fn batch_ingest_reports_each_source() {
    let loader = MemoryLoader::default()
        .with("one", "DOC1 alpha")
        .with("three", "DOC3 beta");
    let h = harness(loader, RagConfig::default());

    let results = h
        .pipeline
        .ingest_batch(&[news("one"), news("two"), news("three")])
        .await;

    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(results[2].is_ok());
    assert_eq!(h.store.list_sources("news_articles").unwrap().len(), 2);
}

#[tokio::test]
async fn summarize_does_not_touch_the_index() {
    let text = format!("DOC1 {}", "delta ".repeat(400));
    let loader = MemoryLoader::default().with("talk", &text);
    let h = harness(loader, RagConfig::default());

    let summary = h
        .pipeline
        .summarize(
            &SourceDescriptor::new("talk", SourceType::Video),
            SummaryStyle::Detailed,
        )
        .await
        .unwrap();

    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.response.usage.map_calls, 3);
    assert_eq!(summary.response.usage.reduce_calls, 1);
    assert_eq!(summary.title.as_deref(), Some("Title of talk"));
    assert!(h.llm.last_prompt().contains("from a YouTube video"));
    assert!(h.store.list_collections().unwrap().is_empty());
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn pipeline_without_llm_can_ingest_but_not_answer() {
    let store = Arc::new(VectorDb::open_in_memory().unwrap());
    let pipeline = RagPipeline::builder()
        .store(store)
        .embedder(Arc::new(KeywordEmbeddings::default()))
        .loader(Arc::new(MemoryLoader::default().with("one", "alpha")))
        .build()
        .unwrap();

    // Nothing indexed is reported as such, LLM or not.
    let outcome = pipeline
        .ask("alpha", SourceType::News, None)
        .await
        .unwrap();
    assert_eq!(outcome, QueryOutcome::NoContentIndexed);

    pipeline.ingest(&news("one")).await.unwrap();
    let err = pipeline
        .ask("alpha", SourceType::News, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
}

#[tokio::test]
async fn knowledge_base_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("index.redb");
    let loader = || MemoryLoader::default().with("one", "DOC1 alpha beta");

    {
        let store = Arc::new(VectorDb::open(&path).unwrap());
        let pipeline = RagPipeline::builder()
            .store(store)
            .embedder(Arc::new(KeywordEmbeddings::default()))
            .loader(Arc::new(loader()))
            .build()
            .unwrap();
        pipeline.ingest(&news("one")).await.unwrap();
    }

    let store = Arc::new(VectorDb::open(&path).unwrap());
    let llm = Arc::new(StubLlm::default());
    let pipeline = RagPipeline::builder()
        .store(store)
        .embedder(Arc::new(KeywordEmbeddings::default()))
        .llm(llm.clone())
        .loader(Arc::new(loader()))
        .build()
        .unwrap();

    let outcome = pipeline
        .ask("beta", SourceType::News, None)
        .await
        .unwrap();
    assert!(matches!(outcome, QueryOutcome::Answered(_)));
    assert_eq!(llm.calls(), 2);
}

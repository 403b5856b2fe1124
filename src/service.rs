//! Ingestion and answering orchestration.
//!
//! [`AnswerService`] owns the database pool, the embedding provider, the
//! language model and the in-memory vector index. All mutable state sits
//! behind one `tokio::sync::Mutex`, and both [`AnswerService::ingest_bytes`]
//! and [`AnswerService::answer`] hold it for their whole duration. Ingestion
//! is therefore serialized against answering, and answers against each other:
//! one retrieval never mixes chunks from two documents, and a history reset
//! never interleaves with an in-flight append.
//!
//! # Ingestion
//!
//! ```text
//! bytes ─▶ extract pages ─▶ split ─▶ embed all ─▶ BEGIN
//!                                                  replace chunk set
//!                                                  save index
//!                                                  reset conversation
//!                                                COMMIT ─▶ swap in-memory index
//! ```
//!
//! Everything before `BEGIN` is side-effect free, so a failed ingestion
//! leaves the previous document, index and history untouched.
//!
//! # Answering
//!
//! Each step is committed before the next runs and is not rolled back if a
//! later step fails:
//!
//! 1. append the user turn
//! 2. retrieve chunks for the question plus any extra context
//! 3. build the context from extra context, then retrieved chunks
//! 4. render history, assemble the prompt, call the model
//! 5. append the assistant turn
//!
//! A model failure therefore leaves the user turn in history with no answer
//! after it.

use askdoc_core::chunk::{split_pages, ChunkParams};
use askdoc_core::index::VectorIndex;
use askdoc_core::models::Turn;
use askdoc_core::prompt::PromptAssembler;
use askdoc_core::retrieve::{RetrievedChunk, Retriever};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::chunk_store::{self, DocumentRecord};
use crate::config::Config;
use crate::conversation;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{PipelineError, PipelineResult};
use crate::extract;
use crate::index_store;
use crate::llm::{create_model, LanguageModel};

/// Tunables the service reads from configuration.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub chunk_params: ChunkParams,
    pub retriever: Retriever,
    pub prompt: PromptAssembler,
    pub embed_batch_size: usize,
    pub embed_timeout: Duration,
    pub generate_timeout: Duration,
    /// Reply budget passed to the model for quiz generation.
    pub quiz_max_tokens: u32,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            chunk_params: ChunkParams::default(),
            retriever: Retriever::default(),
            prompt: PromptAssembler::default(),
            embed_batch_size: 64,
            embed_timeout: Duration::from_secs(30),
            generate_timeout: Duration::from_secs(60),
            quiz_max_tokens: 1024,
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_params: config.chunking.params(),
            retriever: config.retrieval.retriever(),
            prompt: PromptAssembler::new(config.prompt.max_answer_words),
            embed_batch_size: config.embedding.batch_size,
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            generate_timeout: Duration::from_secs(config.llm.timeout_secs),
            quiz_max_tokens: config.llm.quiz_max_tokens,
        }
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub source_name: String,
    pub page_count: usize,
    pub chunk_count: usize,
    /// True when the bytes matched the active document and its persisted
    /// chunks and index were kept as they were.
    pub reused: bool,
}

/// An answer together with the chunks it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub response: String,
    pub sources: Vec<RetrievedChunk>,
}

/// Snapshot of what the service has loaded.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub ready: bool,
    pub document: Option<DocumentRecord>,
    pub chunk_count: usize,
    pub index_model: Option<String>,
    pub index_dims: Option<usize>,
    pub turn_count: i64,
    pub embedding_model: String,
    pub language_model: String,
}

struct State {
    document: Option<DocumentRecord>,
    index: Option<VectorIndex>,
}

pub struct AnswerService {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn LanguageModel>,
    options: ServiceOptions,
    state: Mutex<State>,
}

impl AnswerService {
    /// Connect to the configured database, build providers, and load state.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(config).await?;
        let embedder = create_provider(&config.embedding)?;
        let model = create_model(&config.llm)?;
        let service =
            Self::with_parts(pool, embedder, model, ServiceOptions::from_config(config)).await?;
        Ok(service)
    }

    /// Assemble a service from explicit parts and load persisted state.
    ///
    /// Migrations are applied first. The active document's chunk set and
    /// index are loaded independently; an index that is missing or was
    /// built by another embedding model is rebuilt from the stored chunks.
    /// If that rebuild fails the service starts without an index.
    pub async fn with_parts(
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn LanguageModel>,
        options: ServiceOptions,
    ) -> PipelineResult<Self> {
        crate::migrate::migrate(&pool)
            .await
            .map_err(|e| PipelineError::PersistenceFailure(format!("{:#}", e)))?;

        let service = Self {
            pool,
            embedder,
            model,
            options,
            state: Mutex::new(State {
                document: None,
                index: None,
            }),
        };

        let state = service.load_state().await?;
        *service.state.lock().await = state;
        Ok(service)
    }

    async fn load_state(&self) -> PipelineResult<State> {
        let mut conn = self.pool.acquire().await?;

        let Some(document) = chunk_store::active_document(&mut conn).await? else {
            tracing::info!("no document ingested yet");
            return Ok(State {
                document: None,
                index: None,
            });
        };

        let chunks = chunk_store::load_chunks(&mut conn, &document.id).await?;
        let stored = match index_store::load(&mut conn, &document.id, chunks.clone()).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable persisted index");
                None
            }
        };
        drop(conn);

        let index = match stored {
            Some(index) if self.matches_embedder(&index) => {
                tracing::info!(
                    document = %document.source_name,
                    chunks = index.len(),
                    model = index.model(),
                    "loaded persisted index"
                );
                Some(index)
            }
            stored => {
                let reason = if stored.is_some() {
                    "embedding model changed"
                } else {
                    "no persisted index"
                };
                tracing::info!(document = %document.source_name, reason, "rebuilding index");
                match self.build_index(chunks).await {
                    Ok(index) => {
                        let mut tx = self.pool.begin().await?;
                        index_store::save(&mut *tx, &document.id, &index, now()).await?;
                        tx.commit().await?;
                        Some(index)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "index rebuild failed; answers unavailable until re-ingest");
                        None
                    }
                }
            }
        };

        Ok(State {
            document: Some(document),
            index,
        })
    }

    fn matches_embedder(&self, index: &VectorIndex) -> bool {
        index.model() == self.embedder.model_name() && index.dims() == self.embedder.dims()
    }

    async fn build_index(
        &self,
        chunks: Vec<askdoc_core::models::Chunk>,
    ) -> PipelineResult<VectorIndex> {
        index_store::build(
            self.embedder.as_ref(),
            chunks,
            self.options.embed_batch_size,
            self.options.embed_timeout,
        )
        .await
        .map_err(PipelineError::embedding)
    }

    /// Ingest a file from disk, choosing the extractor by extension.
    pub async fn ingest_file(
        &self,
        path: &Path,
        name: Option<&str>,
    ) -> PipelineResult<IngestReport> {
        let content_type = extract::content_type_for_path(path).ok_or_else(|| {
            PipelineError::InvalidRequest(format!(
                "unsupported file type: {} (expected .pdf, .txt or .md)",
                path.display()
            ))
        })?;
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PipelineError::InvalidRequest(format!("cannot read {}: {}", path.display(), e))
        })?;
        let default_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let name = name.map(str::to_string).unwrap_or(default_name);

        self.ingest_bytes(bytes, content_type, &name).await
    }

    /// Ingest uploaded PDF bytes.
    pub async fn ingest_pdf(&self, bytes: Vec<u8>, name: &str) -> PipelineResult<IngestReport> {
        self.ingest_bytes(bytes, extract::MIME_PDF, name).await
    }

    /// Ingest raw document bytes of the given content type.
    ///
    /// Fails with `InvalidRequest` on empty, unparseable or text-free input,
    /// and with `EmbeddingFailure` if any chunk cannot be embedded. Neither
    /// mutates persisted state.
    pub async fn ingest_bytes(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        name: &str,
    ) -> PipelineResult<IngestReport> {
        if bytes.is_empty() {
            return Err(PipelineError::InvalidRequest(
                "uploaded document is empty".to_string(),
            ));
        }

        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        let content_type = content_type.to_string();
        // pdf-extract is CPU bound and may panic on hostile input.
        let pages = tokio::task::spawn_blocking(move || extract::extract_pages(&bytes, &content_type))
            .await
            .map_err(|e| PipelineError::InvalidRequest(format!("document parser crashed: {}", e)))?
            .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;

        self.ingest_pages(name, &sha256, pages).await
    }

    /// Ingest already-extracted page texts. `sha256` identifies the source
    /// bytes for same-document detection.
    pub async fn ingest_pages(
        &self,
        name: &str,
        sha256: &str,
        pages: Vec<String>,
    ) -> PipelineResult<IngestReport> {
        let started = Instant::now();
        let params = self.options.chunk_params;
        params
            .validate()
            .map_err(|e| PipelineError::InvalidRequest(e.to_string()))?;

        let mut state = self.state.lock().await;

        if let (Some(doc), Some(index)) = (&state.document, &state.index) {
            if doc.sha256 == sha256
                && doc.chunk_size == params.chunk_size as i64
                && doc.chunk_overlap == params.chunk_overlap as i64
                && self.matches_embedder(index)
            {
                tracing::info!(document = %doc.source_name, "document unchanged; reusing chunks and index");
                return Ok(IngestReport {
                    document_id: doc.id.clone(),
                    source_name: doc.source_name.clone(),
                    page_count: doc.page_count as usize,
                    chunk_count: index.len(),
                    reused: true,
                });
            }
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let chunks = split_pages(&document_id, &pages, &params);
        if chunks.is_empty() {
            return Err(PipelineError::InvalidRequest(format!(
                "{} contains no extractable text",
                name
            )));
        }

        let index = self.build_index(chunks.clone()).await?;

        let record = DocumentRecord {
            id: document_id.clone(),
            source_name: name.to_string(),
            sha256: sha256.to_string(),
            page_count: pages.len() as i64,
            chunk_size: params.chunk_size as i64,
            chunk_overlap: params.chunk_overlap as i64,
            ingested_at: now(),
        };

        let mut tx = self.pool.begin().await?;
        chunk_store::replace(&mut *tx, &record, &chunks).await?;
        index_store::save(&mut *tx, &document_id, &index, record.ingested_at).await?;
        conversation::reset(&mut *tx).await?;
        tx.commit().await?;

        let report = IngestReport {
            document_id,
            source_name: record.source_name.clone(),
            page_count: pages.len(),
            chunk_count: chunks.len(),
            reused: false,
        };

        state.document = Some(record);
        state.index = Some(index);

        tracing::info!(
            document = %report.source_name,
            pages = report.page_count,
            chunks = report.chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingested document"
        );
        Ok(report)
    }

    /// Answer one question. See the module docs for the step order.
    pub async fn answer(
        &self,
        question: &str,
        extra_context: Option<&str>,
    ) -> PipelineResult<String> {
        Ok(self.answer_with_sources(question, extra_context).await?.response)
    }

    /// Like [`answer`](Self::answer), also returning the retrieved chunks.
    pub async fn answer_with_sources(
        &self,
        question: &str,
        extra_context: Option<&str>,
    ) -> PipelineResult<Answer> {
        self.exchange(question, extra_context, None).await
    }

    /// Like [`answer`](Self::answer), with `max_tokens` as the model's reply
    /// budget instead of the configured one.
    pub async fn answer_with_limit(
        &self,
        question: &str,
        extra_context: Option<&str>,
        max_tokens: u32,
    ) -> PipelineResult<String> {
        Ok(self
            .exchange(question, extra_context, Some(max_tokens))
            .await?
            .response)
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// One question and answer. The question is stored and prompted
    /// verbatim; trimming only decides whether it is empty.
    async fn exchange(
        &self,
        question: &str,
        extra_context: Option<&str>,
        max_tokens: Option<u32>,
    ) -> PipelineResult<Answer> {
        if question.trim().is_empty() {
            return Err(PipelineError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        let extra_context = extra_context.map(str::trim).filter(|c| !c.is_empty());

        let started = Instant::now();
        let state = self.state.lock().await;
        let Some(index) = state.index.as_ref() else {
            return Err(PipelineError::IndexNotReady(
                "no document has been ingested".to_string(),
            ));
        };

        let query = match extra_context {
            Some(extra) => format!("{}\n{}", question, extra),
            None => question.to_string(),
        };

        let mut conn = self.pool.acquire().await?;

        // 1. The user turn is committed before anything can fail downstream.
        conversation::append(&mut conn, &Turn::user(query.as_str())).await?;

        // 2. Retrieve. Only the query embedding is time-bounded.
        self.embedder
            .warm_up()
            .await
            .map_err(PipelineError::embedding)?;
        let sources = tokio::time::timeout(
            self.options.embed_timeout,
            self.options
                .retriever
                .search(index, self.embedder.as_ref(), &query),
        )
        .await
        .map_err(|_| {
            PipelineError::EmbeddingFailure(format!(
                "query embedding timed out after {:?}",
                self.options.embed_timeout
            ))
        })?
        .map_err(PipelineError::embedding)?;

        tracing::debug!(
            chunks = ?sources.iter().map(|s| s.chunk.id.as_str()).collect::<Vec<_>>(),
            "retrieved context"
        );

        // 3. Extra context first, then retrieved chunks in retrieval order.
        let mut blocks: Vec<&str> = Vec::with_capacity(sources.len() + 1);
        if let Some(extra) = extra_context {
            blocks.push(extra);
        }
        blocks.extend(sources.iter().map(|s| s.chunk.text.as_str()));

        // 4. History already includes the user turn from step 1.
        let history = conversation::load(&mut conn).await?;
        let prompt =
            self.options
                .prompt
                .assemble(&blocks, &conversation::render(&history), question);

        let call = match max_tokens {
            Some(limit) => self.model.generate_with_limit(&prompt, limit),
            None => self.model.generate(&prompt),
        };
        let response = tokio::time::timeout(self.options.generate_timeout, call)
            .await
            .map_err(|_| {
                PipelineError::GenerationFailure(format!(
                    "model call timed out after {:?}",
                    self.options.generate_timeout
                ))
            })?
            .map_err(|e| {
                tracing::warn!(error = %e, "generation failed; user turn kept in history");
                PipelineError::generation(e)
            })?;

        // 5. Persist the answer.
        conversation::append(&mut conn, &Turn::assistant(response.as_str())).await?;

        tracing::info!(
            model = self.model.name(),
            sources = sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "answered question"
        );

        Ok(Answer { response, sources })
    }

    /// The persisted conversation, oldest first.
    pub async fn history(&self) -> PipelineResult<Vec<Turn>> {
        let _state = self.state.lock().await;
        let mut conn = self.pool.acquire().await?;
        conversation::load(&mut conn).await
    }

    pub async fn status(&self) -> PipelineResult<Status> {
        let state = self.state.lock().await;
        let mut conn = self.pool.acquire().await?;
        let turn_count = conversation::count(&mut conn).await?;

        Ok(Status {
            ready: state.index.is_some(),
            document: state.document.clone(),
            chunk_count: state.index.as_ref().map_or(0, |i| i.len()),
            index_model: state.index.as_ref().map(|i| i.model().to_string()),
            index_dims: state.index.as_ref().map(|i| i.dims()),
            turn_count,
            embedding_model: self.embedder.model_name().to_string(),
            language_model: self.model.name().to_string(),
        })
    }

    /// Close the database pool.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

//! # askdoc
//!
//! Grounded question answering over a single uploaded document.
//!
//! A document is split into overlapping chunks, every chunk is embedded into
//! an in-memory vector index, and each question is answered by a language
//! model from the chunks a maximal-marginal-relevance search picks, plus the
//! running conversation. The model is told to answer "I don't know." when
//! the context does not cover the question.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │  upload  │──▶│ extract +  │──▶│  SQLite  │  chunks, vectors, turns
//! │ PDF/text │   │ chunk+embed│   │  (WAL)   │
//! └──────────┘   └────────────┘   └────┬─────┘
//!                                      │
//!                          ┌───────────┴───────────┐
//!                          ▼                       ▼
//!                   ┌─────────────┐         ┌─────────────┐
//!                   │ AnswerService│────────▶│ LanguageModel│
//!                   │ MMR + prompt │         │ chat API     │
//!                   └──────┬──────┘         └─────────────┘
//!                     ┌────┴────┐
//!                     ▼         ▼
//!                 ┌──────┐  ┌──────┐
//!                 │ CLI  │  │ HTTP │
//!                 └──────┘  └──────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! askdoc init
//! askdoc ingest handbook.pdf
//! askdoc ask "How many vacation days do I get?"
//! askdoc serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Pipeline error kinds and their codes |
//! | [`db`], [`migrate`] | Database connection and schema |
//! | [`extract`] | PDF and plain-text page extraction |
//! | [`chunk_store`] | Persisted chunk set and active document |
//! | [`index_store`] | Building, persisting and reloading the vector index |
//! | [`conversation`] | Append-only conversation log |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat-completions language models |
//! | [`service`] | Ingestion and answering under one lock |
//! | [`quiz`] | Multiple-choice quiz generation |
//! | [`server`] | HTTP transport |
//!
//! Pure logic (chunking, vector search, MMR, prompt layout) lives in the
//! `askdoc-core` crate.

pub mod chunk_store;
pub mod config;
pub mod conversation;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index_store;
pub mod llm;
pub mod migrate;
pub mod quiz;
pub mod server;
pub mod service;

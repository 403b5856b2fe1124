//! # askdoc core
//!
//! Pure retrieval-augmented generation logic shared by the `askdoc` app:
//! data models, overlapping chunking, the embedding trait, the in-memory
//! vector index, maximal-marginal-relevance retrieval, and prompt assembly.
//!
//! This crate performs no filesystem, database, or network I/O. Persistence
//! and provider implementations live in the `askdoc` app crate.
//!
//! ```text
//!  pages ──▶ chunk ──▶ EmbeddingProvider ──▶ VectorIndex
//!                                               │
//!  question ──▶ EmbeddingProvider ──▶ Retriever (MMR)
//!                                               │
//!                 history ──▶ PromptAssembler ◀─┘
//! ```

pub mod chunk;
pub mod embedding;
pub mod index;
pub mod models;
pub mod prompt;
pub mod retrieve;

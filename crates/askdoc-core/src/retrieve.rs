//! Maximal-marginal-relevance retrieval.
//!
//! The [`Retriever`] over-fetches a candidate pool of the `fetch_k` chunks
//! most similar to the query, then greedily picks `k` of them. The first
//! pick is the most similar candidate; every later pick maximizes
//!
//! ```text
//! lambda_mult * sim(query, c) - (1 - lambda_mult) * max sim(c, selected)
//! ```
//!
//! so the result is relevant and mutually non-redundant. `lambda_mult = 1`
//! degenerates to plain top-k similarity, `lambda_mult = 0` to maximum
//! diversity.
//!
//! Selection works on index positions, never on chunk text, so two chunks
//! with identical text at different positions are distinct candidates and
//! no position is ever returned twice.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::embedding::{dot, embed_normalized, EmbeddingProvider};
use crate::index::VectorIndex;
use crate::models::Chunk;

/// A chunk selected for a query, with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// MMR search parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Retriever {
    /// Number of chunks returned.
    pub k: usize,
    /// Size of the candidate pool fetched by plain similarity.
    pub fetch_k: usize,
    /// Relevance/diversity trade-off in `[0, 1]`.
    pub lambda_mult: f32,
}

impl Default for Retriever {
    fn default() -> Self {
        Self {
            k: 3,
            fetch_k: 20,
            lambda_mult: 0.5,
        }
    }
}

impl Retriever {
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            bail!("retrieval k must be >= 1");
        }
        if self.fetch_k < self.k {
            bail!(
                "retrieval fetch_k ({}) must be >= k ({})",
                self.fetch_k,
                self.k
            );
        }
        if !(0.0..=1.0).contains(&self.lambda_mult) {
            bail!(
                "retrieval lambda_mult must be in [0, 1], got {}",
                self.lambda_mult
            );
        }
        Ok(())
    }

    /// Embed `query` with `provider` and run MMR selection over `index`.
    ///
    /// An empty index yields an empty result without calling the provider.
    pub async fn search(
        &self,
        index: &VectorIndex,
        provider: &dyn EmbeddingProvider,
        query: &str,
    ) -> Result<Vec<RetrievedChunk>> {
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let mut vectors = embed_normalized(provider, &[query.to_string()]).await?;
        let Some(query_vec) = vectors.pop() else {
            bail!("embedding provider returned no vector for the query");
        };
        Ok(self.search_vector(index, &query_vec))
    }

    /// Run MMR selection for an already-embedded, unit-norm query.
    pub fn search_vector(&self, index: &VectorIndex, query: &[f32]) -> Vec<RetrievedChunk> {
        let pool = index.similarity_search(query, self.fetch_k.max(self.k));
        let picked = max_marginal_relevance(index, &pool, self.k, self.lambda_mult);

        let picks: Vec<RetrievedChunk> = picked
            .into_iter()
            .map(|(pos, score)| RetrievedChunk {
                chunk: index.entries()[pos].chunk.clone(),
                score,
            })
            .collect();

        tracing::debug!(
            candidates = pool.len(),
            selected = picks.len(),
            "mmr selection complete"
        );
        picks
    }
}

/// Greedy MMR over a candidate pool of `(entry position, query similarity)`.
///
/// Returns up to `k` distinct positions with their query similarity, in
/// selection order.
pub fn max_marginal_relevance(
    index: &VectorIndex,
    pool: &[(usize, f32)],
    k: usize,
    lambda_mult: f32,
) -> Vec<(usize, f32)> {
    let k = k.min(pool.len());
    let mut selected: Vec<(usize, f32)> = Vec::with_capacity(k);
    let mut remaining: Vec<(usize, f32)> = pool.to_vec();
    let entries = index.entries();

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;

        for (slot, &(pos, query_sim)) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&(sel, _)| dot(&entries[pos].vector, &entries[sel].vector))
                .fold(f32::NEG_INFINITY, f32::max);
            let score = if selected.is_empty() {
                query_sim
            } else {
                lambda_mult * query_sim - (1.0 - lambda_mult) * redundancy
            };
            // Strict comparison keeps the earlier (more similar) candidate on ties.
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((slot, score));
            }
        }

        let Some((slot, _)) = best else { break };
        selected.push(remaining.remove(slot));
    }

    selected
}

//! In-memory vector index over the chunks of one document.
//!
//! A [`VectorIndex`] pairs every [`Chunk`] with a unit-norm embedding
//! vector produced by a single model. It is built wholesale from a chunk
//! set and never updated in place: ingesting another document builds a new
//! index that replaces this one.
//!
//! Search is brute-force inner product, which is exact and fast enough for
//! the few thousand chunks a single document produces.

use anyhow::{bail, Result};

use crate::embedding::{dot, is_unit_norm, normalize_l2};
use crate::models::Chunk;

/// One indexed chunk with its unit-norm vector.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Searchable collection of (chunk, vector) pairs for one document.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Build an index from chunks and their vectors, paired by position.
    ///
    /// Vectors that are not already unit norm are normalized, so stored
    /// vectors reload bit-for-bit. Fails on a count mismatch, a vector of
    /// the wrong dimension, a zero vector, or duplicate chunk ids.
    pub fn from_parts(
        model: impl Into<String>,
        dims: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if dims == 0 {
            bail!("index dimension must be > 0");
        }
        if chunks.len() != vectors.len() {
            bail!(
                "index needs one vector per chunk ({} chunks, {} vectors)",
                chunks.len(),
                vectors.len()
            );
        }

        let mut seen = std::collections::HashSet::with_capacity(chunks.len());
        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            if !seen.insert(chunk.id.clone()) {
                bail!("duplicate chunk id in index: {}", chunk.id);
            }
            if vector.len() != dims {
                bail!(
                    "vector for chunk {} has dimension {}, expected {}",
                    chunk.id,
                    vector.len(),
                    dims
                );
            }
            let vector = if is_unit_norm(&vector) {
                vector
            } else {
                let Some(v) = normalize_l2(vector) else {
                    bail!("vector for chunk {} is a zero vector", chunk.id);
                };
                v
            };
            entries.push(IndexEntry { chunk, vector });
        }

        Ok(Self {
            model: model.into(),
            dims,
            entries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.entries.iter().map(|e| &e.chunk)
    }

    /// Document id the indexed chunks belong to, if any.
    pub fn document_id(&self) -> Option<&str> {
        self.entries.first().map(|e| e.chunk.document_id.as_str())
    }

    /// Return up to `n` `(entry position, similarity)` pairs, best first.
    ///
    /// `query` must be unit norm. Ties keep index order so results are
    /// deterministic. A query of the wrong dimension matches nothing.
    pub fn similarity_search(&self, query: &[f32], n: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dims || n == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, dot(query, &e.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(n);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: "doc".to_string(),
            chunk_index: 0,
            page: 1,
            start_char: 0,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn sample() -> VectorIndex {
        VectorIndex::from_parts(
            "test",
            2,
            vec![chunk("a", "x axis"), chunk("b", "y axis"), chunk("c", "diag")],
            vec![vec![2.0, 0.0], vec![0.0, 5.0], vec![1.0, 1.0]],
        )
        .unwrap()
    }

    #[test]
    fn vectors_are_normalized_on_build() {
        let index = sample();
        assert_eq!(index.len(), 3);
        assert!(index.entries().iter().all(|e| is_unit_norm(&e.vector)));
        assert_eq!(index.document_id(), Some("doc"));
    }

    #[test]
    fn search_orders_by_similarity() {
        let index = sample();
        let hits = index.similarity_search(&[1.0, 0.0], 3);
        let order: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(order, vec![0, 2, 1]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_truncates_and_handles_bad_queries() {
        let index = sample();
        assert_eq!(index.similarity_search(&[1.0, 0.0], 1).len(), 1);
        assert!(index.similarity_search(&[1.0, 0.0, 0.0], 3).is_empty());
        assert!(index.similarity_search(&[1.0, 0.0], 0).is_empty());
    }

    #[test]
    fn build_rejects_inconsistent_input() {
        assert!(VectorIndex::from_parts("m", 2, vec![chunk("a", "t")], vec![]).is_err());
        assert!(
            VectorIndex::from_parts("m", 2, vec![chunk("a", "t")], vec![vec![1.0]]).is_err()
        );
        assert!(
            VectorIndex::from_parts("m", 2, vec![chunk("a", "t")], vec![vec![0.0, 0.0]]).is_err()
        );
        assert!(VectorIndex::from_parts(
            "m",
            2,
            vec![chunk("a", "t"), chunk("a", "u")],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]]
        )
        .is_err());
    }

    #[test]
    fn empty_index_is_valid() {
        let index = VectorIndex::from_parts("m", 4, vec![], vec![]).unwrap();
        assert!(index.is_empty());
        assert!(index.similarity_search(&[1.0, 0.0, 0.0, 0.0], 5).is_empty());
        assert_eq!(index.document_id(), None);
    }
}

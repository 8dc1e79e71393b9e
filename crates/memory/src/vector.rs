//! Vector similarity and ranking.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::db::Memory;

/// A memory ranked against a query.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHit {
    pub name: String,
    pub text: String,
    pub score: f32,
}

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length, empty, or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank memories by cosine similarity to a query embedding.
///
/// Descending score; equal scores keep insertion order (`Memory::seq`).
/// Entries scoring below `min_score` are dropped.
pub fn rank_memories(
    memories: &HashMap<String, Memory>,
    query_embedding: &[f32],
    limit: usize,
    min_score: f32,
) -> Vec<MemoryHit> {
    let mut scored: Vec<(f32, u64, &String, &Memory)> = memories
        .iter()
        .filter_map(|(name, memory)| {
            let sim = cosine_similarity(&memory.embedding, query_embedding);
            (sim >= min_score).then_some((sim, memory.seq, name, memory))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    scored.truncate(limit);
    scored
        .into_iter()
        .map(|(score, _, name, memory)| MemoryHit {
            name: name.clone(),
            text: memory.text.clone(),
            score,
        })
        .collect()
}

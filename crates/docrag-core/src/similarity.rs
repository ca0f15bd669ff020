//! Vector math shared by the index implementations.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::RankedChunk;

/// Returns an L2-normalised copy; the zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm <= f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine similarity of two arbitrary vectors, clamped to [-1, 1].
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    (dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
}

struct Worst(RankedChunk);

impl PartialEq for Worst {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Worst {}
impl PartialOrd for Worst {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Worst {
    // Max-heap on ranking order puts the lowest-ranked candidate on top.
    fn cmp(&self, other: &Self) -> Ordering {
        RankedChunk::ranking_cmp(&self.0, &other.0)
    }
}

/// Bounded collector keeping the `k` best results in ranking order.
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Worst>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self { k, heap: BinaryHeap::with_capacity(k + 1) }
    }

    pub fn push(&mut self, candidate: RankedChunk) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(Worst(candidate));
            return;
        }
        let replace = self
            .heap
            .peek()
            .is_some_and(|worst| RankedChunk::ranking_cmp(&candidate, &worst.0) == Ordering::Less);
        if replace {
            self.heap.pop();
            self.heap.push(Worst(candidate));
        }
    }

    pub fn into_sorted(self) -> Vec<RankedChunk> {
        let mut out: Vec<RankedChunk> = self.heap.into_iter().map(|w| w.0).collect();
        out.sort_by(RankedChunk::ranking_cmp);
        out
    }
}

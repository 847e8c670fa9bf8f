// ============================================================
// Layer 4 - Feature Appender
// ============================================================
// Decorates a ChunkSource so every chunk carries a fixed-size
// side-channel feature vector (a document or speaker
// embedding, an "ivector").
//
// Strategies:
//   Zero     → all-zero vector; same tensor shapes, no signal
//   Hash     → deterministic function of the document's token
//              ids. Sees the whole document, so it is an oracle
//              ("cheating") feature, useful for reproducible
//              tests and upper-bound experiments
//   External → a pretrained FeatureExtractor
//
// Inputs and targets are never modified. A failing strategy
// (including one returning the wrong length) surfaces as an
// error from `chunk()`; the scheduler decides whether that
// aborts the run or retires the lane.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

use anyhow::{ensure, Context, Result};

use crate::domain::chunk::Chunk;
use crate::domain::traits::{ChunkSource, FeatureExtractor};

/// How feature vectors are produced.
pub enum FeatureStrategy {
    Zero { dim: usize },
    Hash { dim: usize },
    External(Box<dyn FeatureExtractor>),
}

impl FeatureStrategy {
    pub fn dim(&self) -> usize {
        match self {
            FeatureStrategy::Zero { dim } | FeatureStrategy::Hash { dim } => *dim,
            FeatureStrategy::External(extractor) => extractor.dim(),
        }
    }

    /// True when the vector depends only on the document, not the chunk
    fn is_per_document(&self) -> bool {
        !matches!(self, FeatureStrategy::External(_))
    }

    fn compute(&self, document: &[u32], chunk: &Chunk) -> Result<Vec<f32>> {
        match self {
            FeatureStrategy::Zero { dim } => Ok(vec![0.0; *dim]),
            FeatureStrategy::Hash { dim } => Ok(hash_features(document, *dim)),
            FeatureStrategy::External(extractor) => extractor.extract(document, chunk),
        }
    }
}

impl fmt::Debug for FeatureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureStrategy::Zero { dim } => write!(f, "Zero {{ dim: {dim} }}"),
            FeatureStrategy::Hash { dim } => write!(f, "Hash {{ dim: {dim} }}"),
            FeatureStrategy::External(e)  => write!(f, "External {{ dim: {} }}", e.dim()),
        }
    }
}

/// A ChunkSource whose chunks come back with features attached.
#[derive(Debug)]
pub struct FeatureAppender<S> {
    inner:    S,
    strategy: Rc<FeatureStrategy>,
    // Per-document strategies are computed once per document
    cached:   OnceCell<Vec<f32>>,
}

impl<S: ChunkSource> FeatureAppender<S> {
    pub fn new(inner: S, strategy: Rc<FeatureStrategy>) -> Self {
        Self { inner, strategy, cached: OnceCell::new() }
    }

    fn features_for(&self, chunk: &Chunk) -> Result<Vec<f32>> {
        let dim = self.strategy.dim();

        if self.strategy.is_per_document() {
            if let Some(v) = self.cached.get() {
                return Ok(v.clone());
            }
        }

        let v = self
            .strategy
            .compute(self.inner.tokens(), chunk)
            .with_context(|| format!("feature extraction failed for '{}'", self.inner.id()))?;
        ensure!(
            v.len() == dim,
            "feature extractor returned {} values for '{}', expected {}",
            v.len(),
            self.inner.id(),
            dim
        );

        if self.strategy.is_per_document() {
            let _ = self.cached.set(v.clone());
        }
        Ok(v)
    }
}

impl<S: ChunkSource> ChunkSource for FeatureAppender<S> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn tokens(&self) -> &[u32] {
        self.inner.tokens()
    }

    fn num_chunks(&self) -> usize {
        self.inner.num_chunks()
    }

    fn chunk(&self, index: usize) -> Result<Chunk> {
        let chunk    = self.inner.chunk(index)?;
        let features = self.features_for(&chunk)?;
        Ok(chunk.with_features(features))
    }
}

/// Map a token sequence to `dim` values in [0, 1).
///
/// Component d is FNV-1a over the token ids, seeded with d, so
/// the result is stable across runs, platforms and toolchains.
pub fn hash_features(tokens: &[u32], dim: usize) -> Vec<f32> {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME:  u64 = 0x0000_0100_0000_01b3;

    (0..dim)
        .map(|d| {
            let mut h = FNV_OFFSET ^ (d as u64).wrapping_mul(FNV_PRIME);
            for &t in tokens {
                for byte in t.to_le_bytes() {
                    h ^= byte as u64;
                    h = h.wrapping_mul(FNV_PRIME);
                }
            }
            // Top 24 bits → exactly representable in f32
            (h >> 40) as f32 / (1u64 << 24) as f32
        })
        .collect()
}

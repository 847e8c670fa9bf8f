// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The seams between the batching core and its collaborators:
//
//   DocumentSource   → where tokenised documents come from
//   ChunkSource      → a document seen as an indexed sequence
//                      of BPTT chunks (TokenizedDocument, and
//                      FeatureAppender wrapping one)
//   FeatureExtractor → a pretrained side-feature model
//
// The scheduler only ever talks to ChunkSource, so plain and
// feature-decorated documents are interchangeable.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;

use crate::domain::chunk::Chunk;
use crate::domain::document::Document;

// ─── DocumentSource ───────────────────────────────────────────────────────────
/// Any component that can load documents from a source.
///
/// Implementations:
///   - FileListLoader → one document per file named in a list file
pub trait DocumentSource {
    /// Load all usable documents. Malformed ones are skipped
    /// by the implementation, not reported as errors.
    fn load_all(&self) -> Result<Vec<Document>>;
}

// ─── ChunkSource ──────────────────────────────────────────────────────────────
/// A finite, restartable, randomly addressable chunk sequence.
///
/// `chunk(i)` must succeed for every `i < num_chunks()` unless a
/// decorator (e.g. feature extraction) fails.
pub trait ChunkSource {
    /// Identifier used in logs and error messages
    fn id(&self) -> &str;

    /// The document's full token sequence
    fn tokens(&self) -> &[u32];

    /// Number of full chunks this document yields
    fn num_chunks(&self) -> usize;

    /// Build chunk `index`
    fn chunk(&self, index: usize) -> Result<Chunk>;
}

impl<S: ChunkSource + ?Sized> ChunkSource for Box<S> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn tokens(&self) -> &[u32] {
        (**self).tokens()
    }

    fn num_chunks(&self) -> usize {
        (**self).num_chunks()
    }

    fn chunk(&self, index: usize) -> Result<Chunk> {
        (**self).chunk(index)
    }
}

// ─── FeatureExtractor ─────────────────────────────────────────────────────────
/// A pretrained per-chunk feature model (e.g. an ivector extractor).
///
/// It sees the whole document and the chunk being decorated, so
/// both document-level (oracle) and history-based extractors fit.
pub trait FeatureExtractor {
    /// Length of every vector this extractor produces
    fn dim(&self) -> usize;

    fn extract(&self, document: &[u32], chunk: &Chunk) -> Result<Vec<f32>>;
}

// ============================================================
// Layer 4 - Tokenized Document
// ============================================================
// Binds one Document to a TemporalSplitter so the scheduler can
// address it as "chunk 0, chunk 1, ..." through ChunkSource.
//
// Chunks are cut on demand from the owned token vector; nothing
// is precomputed, so a pass over the corpus can be restarted at
// any time by simply asking for chunk 0 again.

use anyhow::{anyhow, Result};

use crate::data::splitter::{TemporalSplits, TemporalSplitter};
use crate::domain::chunk::Chunk;
use crate::domain::document::Document;
use crate::domain::traits::ChunkSource;

#[derive(Debug, Clone)]
pub struct TokenizedDocument {
    document: Document,
    splitter: TemporalSplitter,
}

impl TokenizedDocument {
    pub fn new(document: Document, splitter: TemporalSplitter) -> Self {
        Self { document, splitter }
    }

    /// All chunks in order
    pub fn chunks(&self) -> TemporalSplits<'_> {
        self.splitter.split(&self.document.tokens)
    }
}

impl ChunkSource for TokenizedDocument {
    fn id(&self) -> &str {
        &self.document.source
    }

    fn tokens(&self) -> &[u32] {
        &self.document.tokens
    }

    fn num_chunks(&self) -> usize {
        self.splitter.num_chunks(self.document.len())
    }

    fn chunk(&self, index: usize) -> Result<Chunk> {
        self.splitter
            .chunk(&self.document.tokens, index)
            .ok_or_else(|| {
                anyhow!(
                    "chunk {} requested from '{}', which has only {} chunks",
                    index,
                    self.document.source,
                    self.num_chunks()
                )
            })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_source_matches_iterator() {
        let doc = TokenizedDocument::new(
            Document::new("a.txt", (0..11).collect()),
            TemporalSplitter::new(0, 5),
        );
        assert_eq!(doc.num_chunks(), 2);
        let via_iter: Vec<Chunk> = doc.chunks().collect();
        assert_eq!(doc.chunk(0).unwrap(), via_iter[0]);
        assert_eq!(doc.chunk(1).unwrap(), via_iter[1]);
    }

    #[test]
    fn test_out_of_range_chunk_names_the_document() {
        let doc = TokenizedDocument::new(Document::new("short.txt", vec![1, 2]), TemporalSplitter::new(0, 5));
        let err = doc.chunk(0).unwrap_err().to_string();
        assert!(err.contains("short.txt"));
    }
}

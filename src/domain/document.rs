// ============================================================
// Layer 3 - Document Domain Type
// ============================================================
// One corpus document after tokenisation: the path it came
// from and its token ids in reading order.
//
// Documents are immutable once loaded. The scheduler never
// holds a reference to one across steps; lanes refer to
// documents by their index in the corpus arena.
//
// Reference: Rust Book §5 (Structs and Methods)

use serde::{Deserialize, Serialize};

/// A tokenised document loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The filename or path, kept so errors and logs can
    /// name the document that triggered them
    pub source: String,

    /// Token ids in reading order, end-of-line markers included
    pub tokens: Vec<u32>,
}

impl Document {
    /// Create a new Document with a source path and its token ids.
    ///
    /// Example:
    ///   let doc = Document::new("news/0001.txt", vec![4, 17, 1]);
    pub fn new(source: impl Into<String>, tokens: Vec<u32>) -> Self {
        Self {
            source: source.into(),
            tokens,
        }
    }

    /// Number of tokens in the document
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

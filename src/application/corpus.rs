// ============================================================
// Layer 2 - Corpus Assembly
// ============================================================
// Turns a file list into the chunk sources the scheduler runs
// over, shared by the train and eval workflows:
//
//   file list → Documents → TokenizedDocument (+ FeatureAppender)
//
// Sources are boxed so plain and feature-carrying documents go
// through the same BatchBuilder type.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

use crate::data::{
    features::{FeatureAppender, FeatureStrategy},
    loader::FileListLoader,
    splitter::TemporalSplitter,
    tokenized::TokenizedDocument,
};
use crate::domain::traits::{ChunkSource, DocumentSource};
use crate::infra::vocab_store::Vocabulary;

/// Which per-lane feature vector the model is trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureMode {
    #[default]
    None,
    /// All-zero vectors of the configured dimension
    Zero,
    /// Deterministic oracle vectors hashed from each document
    Hash,
}

impl FeatureMode {
    pub fn strategy(self, dim: usize) -> Option<Rc<FeatureStrategy>> {
        match self {
            FeatureMode::None => None,
            FeatureMode::Zero => Some(Rc::new(FeatureStrategy::Zero { dim })),
            FeatureMode::Hash => Some(Rc::new(FeatureStrategy::Hash { dim })),
        }
    }
}

pub type Sources = Vec<Box<dyn ChunkSource>>;

/// Wrap loaded documents as chunk sources.
pub fn build_sources<D: DocumentSource>(
    loader:   &D,
    splitter: TemporalSplitter,
    features: Option<&Rc<FeatureStrategy>>,
) -> Result<Sources> {
    let sources: Sources = loader
        .load_all()?
        .into_iter()
        .map(|doc| {
            let doc = TokenizedDocument::new(doc, splitter);
            match features {
                Some(strategy) => Box::new(FeatureAppender::new(doc, Rc::clone(strategy))) as Box<dyn ChunkSource>,
                None           => Box::new(doc),
            }
        })
        .collect();

    let chunks: usize = sources.iter().map(|s| s.num_chunks()).sum();
    let empty = sources.iter().filter(|s| s.num_chunks() == 0).count();
    tracing::info!(
        "{} documents, {} chunks of {} tokens ({} documents too short for one chunk)",
        sources.len(),
        chunks,
        splitter.bptt(),
        empty
    );
    Ok(sources)
}

/// Load one file list through the vocabulary.
pub fn load_corpus(
    list:     &str,
    vocab:    &Vocabulary,
    splitter: TemporalSplitter,
    features: Option<&Rc<FeatureStrategy>>,
) -> Result<Sources> {
    tracing::info!("Loading corpus '{}'", list);
    build_sources(&FileListLoader::new(list, vocab), splitter, features)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::document::Document;

    struct InMemory(Vec<Document>);

    impl DocumentSource for InMemory {
        fn load_all(&self) -> Result<Vec<Document>> {
            Ok(self.0.clone())
        }
    }

    fn loader() -> InMemory {
        InMemory(vec![
            Document::new("a", (0..9).collect()),
            Document::new("b", vec![1, 2]),
        ])
    }

    #[test]
    fn test_plain_sources() {
        let sources = build_sources(&loader(), TemporalSplitter::new(0, 4), None).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].num_chunks(), 2);
        assert_eq!(sources[1].num_chunks(), 0);
        assert!(sources[0].chunk(0).unwrap().features.is_none());
    }

    #[test]
    fn test_feature_sources() {
        let strategy = FeatureMode::Hash.strategy(3);
        let sources  = build_sources(&loader(), TemporalSplitter::new(0, 4), strategy.as_ref()).unwrap();
        assert_eq!(sources[0].chunk(1).unwrap().features.map(|f| f.len()), Some(3));
    }

    #[test]
    fn test_no_strategy_for_none() {
        assert!(FeatureMode::None.strategy(8).is_none());
    }
}

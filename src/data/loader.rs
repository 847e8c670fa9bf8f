// ============================================================
// Layer 4 - Document Loader
// ============================================================
// Loads one document per file from a "file list": a text file
// holding whitespace-separated paths to plain-text documents.
//
//   corpus/train.list
//     data/news/0001.txt
//     data/news/0002.txt
//     ...
//
// Each file is tokenised line by line through the Vocabulary
// (unknown words → <unk>, every line closed with </s>).
//
// A document that cannot be read or that tokenises to nothing
// is skipped with a warning; the run continues with the rest.
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (Reading a File)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::document::Document;
use crate::domain::traits::DocumentSource;
use crate::infra::vocab_store::Vocabulary;

/// Read a file list and return the paths it names, in order.
pub fn read_file_list(list: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let list = list.as_ref();
    let text = fs::read_to_string(list)
        .with_context(|| format!("Cannot read file list '{}'", list.display()))?;
    Ok(text.split_whitespace().map(PathBuf::from).collect())
}

/// Read the raw text of every readable file in a list.
/// Used to build the vocabulary before any document is tokenised.
pub fn read_texts(list: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut texts = Vec::new();
    for path in read_file_list(list)? {
        match fs::read_to_string(&path) {
            Ok(text) => texts.push(text),
            Err(e)   => tracing::warn!("Skipping '{}': {}", path.display(), e),
        }
    }
    Ok(texts)
}

/// Loads every document named in a file list.
/// Implements the DocumentSource trait from Layer 3.
pub struct FileListLoader<'v> {
    list:  PathBuf,
    vocab: &'v Vocabulary,
}

impl<'v> FileListLoader<'v> {
    pub fn new(list: impl Into<PathBuf>, vocab: &'v Vocabulary) -> Self {
        Self { list: list.into(), vocab }
    }
}

impl DocumentSource for FileListLoader<'_> {
    fn load_all(&self) -> Result<Vec<Document>> {
        let paths = read_file_list(&self.list)?;
        let mut docs = Vec::with_capacity(paths.len());

        for path in &paths {
            match load_single_document(path, self.vocab) {
                Ok(doc) if doc.is_empty() => {
                    tracing::warn!("Skipping '{}': no tokens", path.display());
                }
                Ok(doc) => {
                    tracing::debug!("Loaded: {} ({} tokens)", doc.source, doc.len());
                    docs.push(doc);
                }
                // Log a warning but continue, one bad file must not end the run
                Err(e) => {
                    tracing::warn!("Skipping '{}': {:#}", path.display(), e);
                }
            }
        }

        tracing::info!(
            "Loaded {} of {} documents listed in '{}'",
            docs.len(),
            paths.len(),
            self.list.display()
        );
        Ok(docs)
    }
}

fn load_single_document(path: &Path, vocab: &Vocabulary) -> Result<Document> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    let tokens = vocab
        .encode_document(&text)
        .with_context(|| format!("Cannot tokenise '{}'", path.display()))?;
    Ok(Document::new(path.display().to_string(), tokens))
}

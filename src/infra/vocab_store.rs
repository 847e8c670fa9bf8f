// ============================================================
// Layer 6 - Vocabulary Store
// ============================================================
// Builds, saves and loads the word-level vocabulary.
//
// The vocabulary is written straight to a HuggingFace tokenizer
// JSON (WordLevel model, WhitespaceSplit pre-tokenizer) and then
// loaded back with Tokenizer::from_file, so training and eval
// read exactly the same file.
//
// Fixed ids:
//   <unk> = 0   (every out-of-vocabulary word)
//   </s>  = 1   (appended after every line)
//
// Words are kept case-sensitive and unstripped; the corpus is
// assumed to be tokenised already.

use anyhow::{anyhow, ensure, Context, Result};
use std::{collections::HashMap, fs, path::PathBuf};
use tokenizers::Tokenizer;

pub const UNK_TOKEN: &str = "<unk>";
pub const EOS_TOKEN: &str = "</s>";

const FILE_NAME: &str = "vocab.json";

/// A loaded vocabulary with its special ids resolved.
pub struct Vocabulary {
    tokenizer: Tokenizer,
    unk_id:    u32,
    eos_id:    u32,
}

impl Vocabulary {
    pub fn from_tokenizer(tokenizer: Tokenizer) -> Result<Self> {
        let unk_id = tokenizer
            .token_to_id(UNK_TOKEN)
            .ok_or_else(|| anyhow!("vocabulary has no {UNK_TOKEN} token"))?;
        let eos_id = tokenizer
            .token_to_id(EOS_TOKEN)
            .ok_or_else(|| anyhow!("vocabulary has no {EOS_TOKEN} token"))?;
        Ok(Self { tokenizer, unk_id, eos_id })
    }

    pub fn len(&self) -> usize {
        self.tokenizer.get_vocab_size(false)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unk_id(&self) -> u32 {
        self.unk_id
    }

    pub fn eos_id(&self) -> u32 {
        self.eos_id
    }

    /// Encode a whole document: each non-blank line becomes its
    /// word ids followed by </s>.
    pub fn encode_document(&self, text: &str) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let encoding = self
                .tokenizer
                .encode(line, false)
                .map_err(|e| anyhow!("Cannot encode line: {e}"))?;
            ids.extend_from_slice(encoding.get_ids());
            ids.push(self.eos_id);
        }
        Ok(ids)
    }
}

pub struct VocabStore {
    dir: PathBuf,
}

impl VocabStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(FILE_NAME)
    }

    /// Load an existing vocabulary or build a new one from texts
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<Vocabulary> {
        if self.path().exists() {
            tracing::info!("Loading existing vocabulary from disk");
            self.load()
        } else {
            tracing::info!("Building new vocabulary (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    /// Load a previously saved vocabulary
    pub fn load(&self) -> Result<Vocabulary> {
        let path = self.path();
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow!("Cannot load vocabulary from '{}': {}", path.display(), e))?;
        Vocabulary::from_tokenizer(tokenizer)
    }

    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<Vocabulary> {
        ensure!(vocab_size > 2, "vocab_size must leave room for {UNK_TOKEN} and {EOS_TOKEN}");
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: word frequencies ──────────────────────────────────────────
        let mut freq: HashMap<&str, usize> = HashMap::new();
        for text in texts {
            for word in text.split_whitespace() {
                *freq.entry(word).or_insert(0) += 1;
            }
        }

        // Most frequent first; ties broken alphabetically so ids are stable
        let mut words: Vec<(&str, usize)> = freq
            .into_iter()
            .filter(|(w, _)| *w != UNK_TOKEN && *w != EOS_TOKEN)
            .collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        words.truncate(vocab_size - 2);

        // ── Step 2: vocab map ─────────────────────────────────────────────────
        let mut vocab = serde_json::Map::new();
        vocab.insert(UNK_TOKEN.to_string(), serde_json::json!(0));
        vocab.insert(EOS_TOKEN.to_string(), serde_json::json!(1));
        for (id, (word, _)) in words.iter().enumerate() {
            vocab.insert(word.to_string(), serde_json::json!(id + 2));
        }

        // ── Step 3: tokenizer JSON in HuggingFace format ──────────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0, "content": UNK_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1, "content": EOS_TOKEN, "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": null,
            "pre_tokenizer": { "type": "WhitespaceSplit" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN
            }
        });

        let path = self.path();
        fs::write(&path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write vocabulary to '{}'", path.display()))?;

        tracing::info!("Vocabulary built with {} entries, saved to '{}'", words.len() + 2, path.display());
        self.load()
    }
}

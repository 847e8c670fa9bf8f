// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `eval`, and all
// their configurable flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for missing args
//   - type conversion (string → usize, f64, enums, etc.)
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};

use crate::application::{
    corpus::FeatureMode,
    eval_use_case::EvalConfig,
    train_use_case::TrainConfig,
};
use crate::data::scheduler::FeatureFailurePolicy;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train an LSTM language model over a list of documents
    Train(TrainArgs),

    /// Score a list of documents with a trained checkpoint
    Eval(EvalArgs),
}

/// Per-lane feature vectors appended to every input step
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FeatureArg {
    None,
    Zero,
    /// Oracle vectors hashed from each whole document
    Hash,
}

impl From<FeatureArg> for FeatureMode {
    fn from(a: FeatureArg) -> Self {
        match a {
            FeatureArg::None => FeatureMode::None,
            FeatureArg::Zero => FeatureMode::Zero,
            FeatureArg::Hash => FeatureMode::Hash,
        }
    }
}

/// What to do when a feature vector cannot be computed
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum FeatureErrorArg {
    /// Stop with an error
    Abort,
    /// Drop the lane for the rest of the epoch
    RetireLane,
}

impl From<FeatureErrorArg> for FeatureFailurePolicy {
    fn from(a: FeatureErrorArg) -> Self {
        match a {
            FeatureErrorArg::Abort      => FeatureFailurePolicy::Abort,
            FeatureErrorArg::RetireLane => FeatureFailurePolicy::RetireLane,
        }
    }
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    /// File listing the training documents (whitespace separated paths)
    #[arg(long)]
    pub train: String,

    /// File listing the validation documents
    #[arg(long)]
    pub valid: String,

    /// File listing the test documents, scored with the best model
    #[arg(long)]
    pub test: Option<String>,

    /// Directory to save checkpoints, vocabulary and metrics
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Maximum vocabulary size including <unk> and </s>
    #[arg(long, default_value_t = 10_000)]
    pub vocab_size: usize,

    /// Size of word embeddings
    #[arg(long, default_value_t = 200)]
    pub emb_dim: usize,

    /// Number of hidden units per layer
    #[arg(long, default_value_t = 200)]
    pub hidden_dim: usize,

    /// Number of LSTM layers
    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,

    /// Dropout applied to layers (0 = no dropout)
    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    /// Initial learning rate
    #[arg(long, default_value_t = 20.0)]
    pub lr: f64,

    /// L2 regularization penalty
    #[arg(long, default_value_t = 0.0)]
    pub beta: f64,

    /// Gradient clipping
    #[arg(long, default_value_t = 0.25)]
    pub clip: f64,

    /// Upper epoch limit
    #[arg(long, default_value_t = 40)]
    pub epochs: usize,

    /// Number of parallel lanes
    #[arg(long, default_value_t = 20)]
    pub batch_size: usize,

    /// Sequence length of one truncated-BPTT chunk
    #[arg(long, default_value_t = 35)]
    pub bptt: usize,

    /// Random seed for the document shuffle
    #[arg(long, default_value_t = 1111)]
    pub seed: u64,

    /// Pass hidden state over document boundaries
    #[arg(long)]
    pub concat_articles: bool,

    /// Shuffle the document order before every epoch
    #[arg(long)]
    pub shuffle_articles: bool,

    /// Stop an epoch once fewer lanes than this are still running
    #[arg(long, default_value_t = 1)]
    pub min_batch_size: usize,

    /// Steps between progress reports
    #[arg(long, default_value_t = 200)]
    pub log_interval: usize,

    #[arg(long, value_enum, default_value_t = FeatureArg::None)]
    pub features: FeatureArg,

    /// Length of the feature vector
    #[arg(long, default_value_t = 50)]
    pub feature_dim: usize,

    #[arg(long, value_enum, default_value_t = FeatureErrorArg::Abort)]
    pub on_feature_error: FeatureErrorArg,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            train_list:       a.train,
            valid_list:       a.valid,
            test_list:        a.test,
            checkpoint_dir:   a.checkpoint_dir,
            vocab_size:       a.vocab_size,
            emb_dim:          a.emb_dim,
            hidden_dim:       a.hidden_dim,
            num_layers:       a.num_layers,
            dropout:          a.dropout,
            lr:               a.lr,
            beta:             a.beta,
            clip:             a.clip,
            epochs:           a.epochs,
            batch_size:       a.batch_size,
            bptt:             a.bptt,
            seed:             a.seed,
            concat_articles:  a.concat_articles,
            shuffle_articles: a.shuffle_articles,
            min_batch_size:   a.min_batch_size,
            log_interval:     a.log_interval,
            features:         a.features.into(),
            feature_dim:      a.feature_dim,
            on_feature_error: a.on_feature_error.into(),
        }
    }
}

/// All arguments for the `eval` command
#[derive(Args, Debug)]
pub struct EvalArgs {
    /// File listing the documents to score
    #[arg(long)]
    pub file_list: String,

    /// Directory where checkpoints were saved during training
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Number of parallel lanes (defaults to the training batch size)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pass hidden state over document boundaries
    #[arg(long, conflicts_with = "discard_h")]
    pub concat_articles: bool,

    /// Start every document from the initial state
    #[arg(long)]
    pub discard_h: bool,
}

impl EvalArgs {
    /// None keeps the policy the model was trained with
    fn concat_override(&self) -> Option<bool> {
        match (self.concat_articles, self.discard_h) {
            (true, _)      => Some(true),
            (_, true)      => Some(false),
            (false, false) => None,
        }
    }
}

impl From<EvalArgs> for EvalConfig {
    fn from(a: EvalArgs) -> Self {
        let concat_articles = a.concat_override();
        EvalConfig {
            eval_list:      a.file_list,
            checkpoint_dir: a.checkpoint_dir,
            batch_size:     a.batch_size,
            concat_articles,
        }
    }
}

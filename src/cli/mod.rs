// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train` - trains the LSTM language model on file lists
//   2. `eval`  - loads a checkpoint and scores a file list
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvalArgs, TrainArgs};

#[derive(Parser, Debug)]
#[command(
    name = "multistream-lm",
    version = "0.1.0",
    about = "Train and evaluate recurrent language models over many documents in parallel lanes."
)]
pub struct Cli {
    /// The subcommand to run (train or eval)
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Eval(args)  => run_eval(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on documents listed in: {}", args.train);

    let use_case = TrainUseCase::new(args.into());
    use_case.execute()?;

    println!("Training complete. Best checkpoint saved.");
    Ok(())
}

fn run_eval(args: EvalArgs) -> Result<()> {
    use crate::application::eval_use_case::EvalUseCase;

    let use_case = EvalUseCase::new(args.into());
    let stats    = use_case.execute()?;

    println!(
        "| eval | tokens {:8} | loss {:5.2} | ppl {:8.2}",
        stats.tokens,
        stats.loss,
        stats.perplexity()
    );
    Ok(())
}

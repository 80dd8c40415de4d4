mod cli;
mod cmd;
mod dispatch;
mod format;
mod passphrase;
mod prompt;
mod table;

use clap::Parser;
use cloudchain_core::ChainError;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// How a command finished, beyond plain success or error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done,
    /// Some items of a batch failed; the rest went through.
    Partial,
    /// The operator declined a confirmation.
    Declined,
}

impl Outcome {
    fn exit_code(self) -> i32 {
        match self {
            Outcome::Done => 0,
            Outcome::Partial => 2,
            Outcome::Declined => 3,
        }
    }
}

fn error_exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ChainError>() {
        Some(e) if !e.is_safe_to_retry() => 2,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: cannot start runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(dispatch::run(&cli)) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {e:#}");
            error_exit_code(&e)
        }
    };
    std::process::exit(code);
}

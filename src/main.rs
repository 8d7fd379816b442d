use std::process::ExitCode;

use clap::Parser;
use mnist_trainer::{app, Cli, TrainingConfig};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mnist_trainer=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match TrainingConfig::try_from(cli).and_then(app::execute) {
        Ok(summary) => {
            match summary.last {
                Some(m) => println!(
                    "Final Test: val_loss {:.4} - val_accuracy {:.4} after {} epochs in {:.1}s",
                    m.val_loss,
                    m.val_accuracy,
                    m.epoch,
                    summary.elapsed.as_secs_f64()
                ),
                None => println!("No epochs were run"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {} failed: {}", e.stage(), e);
            ExitCode::FAILURE
        }
    }
}

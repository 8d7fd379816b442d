use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;

use crate::error::TrainError;
use crate::network::{ClassifierConfig, DEFAULT_HIDDEN_UNITS};
use crate::optimizer::OptimizerKind;
use crate::trainer::DEFAULT_BATCH_SIZE;

/// Train a feed-forward classifier on MNIST.
#[derive(Parser, Debug, Clone)]
#[command(name = "mnist_trainer", version)]
pub struct Cli {
    /// Number of passes over the training partition
    #[arg(long)]
    pub epochs: usize,

    /// Fraction of hidden units dropped during training, in [0, 1)
    #[arg(long, allow_negative_numbers = true)]
    pub dropout: f64,

    /// Width of the output layer, one unit per class
    #[arg(long = "layers_dense")]
    pub layers_dense: usize,

    /// sgd, adam, rmsprop or adagrad
    #[arg(long)]
    pub optimizer: String,

    /// Run identifier, used to name the metrics log directory
    #[arg(long)]
    pub filename: String,

    /// Directory holding the MNIST IDX files
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Root directory for per-run metrics logs
    #[arg(long, default_value = "logs/fit")]
    pub log_dir: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Overrides the optimizer's default learning rate
    #[arg(long)]
    pub learning_rate: Option<f64>,

    #[arg(long, default_value_t = DEFAULT_HIDDEN_UNITS)]
    pub hidden_units: usize,

    /// Seed for initialisation, shuffling and dropout; random when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Webhook notified when the run starts and finishes
    #[arg(long, env = "TRAINING_WEBHOOK_URL", hide_env_values = true)]
    pub webhook_url: Option<String>,
}

/// Validated, immutable settings for one training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingConfig {
    pub run_id: String,
    pub epochs: usize,
    pub dropout: f64,
    pub output_width: usize,
    pub optimizer: OptimizerKind,
    pub learning_rate: Option<f64>,
    pub batch_size: usize,
    pub hidden_units: usize,
    pub seed: u64,
    pub data_dir: PathBuf,
    pub log_root: PathBuf,
    #[serde(skip)]
    pub webhook_url: Option<String>,
}

impl TryFrom<Cli> for TrainingConfig {
    type Error = TrainError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        if cli.epochs == 0 {
            return Err(TrainError::invalid("--epochs must be at least 1"));
        }
        if !(0.0..1.0).contains(&cli.dropout) {
            return Err(TrainError::invalid(format!(
                "--dropout must be in [0, 1), got {}",
                cli.dropout
            )));
        }
        if cli.layers_dense == 0 {
            return Err(TrainError::invalid("--layers_dense must be at least 1"));
        }
        let optimizer: OptimizerKind = cli.optimizer.parse()?;
        let run_id = cli.filename.trim().to_string();
        if run_id.is_empty() || run_id.contains(['/', '\\']) {
            return Err(TrainError::invalid(format!(
                "--filename must be a non-empty name without path separators, got '{}'",
                cli.filename
            )));
        }
        if cli.batch_size == 0 {
            return Err(TrainError::invalid("--batch-size must be at least 1"));
        }
        if cli.hidden_units == 0 {
            return Err(TrainError::invalid("--hidden-units must be at least 1"));
        }
        if let Some(lr) = cli.learning_rate {
            if !lr.is_finite() || lr <= 0.0 {
                return Err(TrainError::invalid(format!(
                    "--learning-rate must be positive, got {}",
                    lr
                )));
            }
        }
        let webhook_url = cli
            .webhook_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        Ok(TrainingConfig {
            run_id,
            epochs: cli.epochs,
            dropout: cli.dropout,
            output_width: cli.layers_dense,
            optimizer,
            learning_rate: cli.learning_rate,
            batch_size: cli.batch_size,
            hidden_units: cli.hidden_units,
            seed: cli.seed.unwrap_or_else(rand::random),
            data_dir: cli.data_dir,
            log_root: cli.log_dir,
            webhook_url,
        })
    }
}

impl TrainingConfig {
    pub fn classifier(&self, input_size: usize) -> ClassifierConfig {
        ClassifierConfig {
            input_size,
            hidden_units: self.hidden_units,
            output_width: self.output_width,
            dropout: self.dropout,
            seed: self.seed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 11] = [
        "mnist_trainer",
        "--epochs",
        "1",
        "--dropout",
        "0.2",
        "--layers_dense",
        "10",
        "--optimizer",
        "adam",
        "--filename",
        "test1",
    ];

    fn parse(extra: &[&str]) -> Result<TrainingConfig, TrainError> {
        let cli = Cli::try_parse_from(REQUIRED.iter().chain(extra).copied()).unwrap();
        TrainingConfig::try_from(cli)
    }

    fn with(flag: &str, value: &str) -> Result<TrainingConfig, TrainError> {
        let mut args: Vec<&str> = REQUIRED.to_vec();
        let at = args.iter().position(|a| *a == flag).unwrap();
        args[at + 1] = value;
        TrainingConfig::try_from(Cli::try_parse_from(args).unwrap())
    }

    #[test]
    fn parses_required_flags() {
        let config = parse(&["--seed", "9"]).unwrap();
        assert_eq!(config.epochs, 1);
        assert_eq!(config.output_width, 10);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert_eq!(config.run_id, "test1");
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.hidden_units, DEFAULT_HIDDEN_UNITS);
        assert_eq!(config.log_root, PathBuf::from("logs/fit"));
        assert_eq!(config.seed, 9);
        assert_eq!(config.classifier(784).input_size, 784);
    }

    #[test]
    fn missing_flag_fails_to_parse() {
        assert!(Cli::try_parse_from(&REQUIRED[..9]).is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        for (flag, value) in [
            ("--dropout", "1.5"),
            ("--dropout", "1"),
            ("--dropout", "-0.1"),
            ("--epochs", "0"),
            ("--layers_dense", "0"),
            ("--optimizer", "momentum"),
            ("--filename", "../escape"),
            ("--filename", " "),
        ] {
            assert!(
                matches!(with(flag, value), Err(TrainError::InvalidConfiguration(_))),
                "{} {} should be rejected",
                flag,
                value
            );
        }
        assert!(parse(&["--learning-rate", "0"]).is_err());
        assert!(parse(&["--batch-size", "0"]).is_err());
    }

    #[test]
    fn webhook_url_is_never_serialized() {
        let config = parse(&["--webhook-url", "https://hooks.example/secret"]).unwrap();
        assert_eq!(
            config.webhook_url.as_deref(),
            Some("https://hooks.example/secret")
        );
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"optimizer\":\"adam\""));
    }
}

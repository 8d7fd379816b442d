use chrono::{DateTime, Local};

use crate::config::TrainingConfig;
use crate::dataset::Dataset;
use crate::error::TrainError;
use crate::metrics::CsvMetricsLogger;
use crate::mnist_loader;
use crate::network::Classifier;
use crate::notifier::{Notifier, RunInfo};
use crate::optimizer::Optimizer;
use crate::trainer::{Trainer, TrainingSummary};

/// Runs a whole training job: notify, load MNIST, train, notify again.
///
/// Notification problems are logged by the notifier and never change the
/// returned outcome.
pub fn execute(config: TrainingConfig) -> Result<TrainingSummary, TrainError> {
    let started = Local::now();
    let run = RunInfo::new(&config.run_id, started);
    let notifier = Notifier::from_url(config.webhook_url.clone());

    tracing::info!(
        run_id = %config.run_id,
        optimizer = %config.optimizer,
        epochs = config.epochs,
        seed = config.seed,
        "starting training"
    );
    notifier.started(&run);

    let outcome = mnist_loader::load_data(&config.data_dir)
        .and_then(|dataset| train_on(&dataset, &config, &started));

    notifier.finished(&run, &outcome);
    outcome
}

/// Trains on an already loaded dataset, logging metrics under the configured log root.
pub fn train_on(
    dataset: &Dataset,
    config: &TrainingConfig,
    started: &DateTime<Local>,
) -> Result<TrainingSummary, TrainError> {
    let model = Classifier::new(&config.classifier(dataset.train.sample_size()))?;
    let optimizer = Optimizer::new(config.optimizer, config.learning_rate)?;
    let mut trainer = Trainer::new(
        model,
        optimizer,
        &dataset.train,
        &dataset.test,
        config.batch_size,
        config.seed,
    )?;

    let mut logger = CsvMetricsLogger::create(&config.log_root, &config.run_id, started)?;
    logger.write_config(config)?;
    tracing::info!(dir = %logger.dir().display(), "logging metrics");

    trainer.fit(config.epochs, &mut logger)
}

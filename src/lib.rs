pub mod app;
pub mod config;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod mnist_loader;
pub mod network;
pub mod notifier;
pub mod optimizer;
pub mod trainer;

pub use config::{Cli, TrainingConfig};
pub use dataset::{Dataset, Partition};
pub use error::TrainError;
pub use metrics::{CsvMetricsLogger, EpochMetrics, MetricsSink, ParameterHistogram};
pub use network::{Classifier, ClassifierConfig};
pub use notifier::Notifier;
pub use optimizer::{Optimizer, OptimizerKind};
pub use trainer::{Trainer, TrainerState, TrainingSummary};

use std::path::PathBuf;

use thiserror::Error;

use crate::metrics::EpochMetrics;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("dataset unavailable at {}: {reason}", path.display())]
    DataUnavailable { path: PathBuf, reason: String },

    #[error("loss became non-finite during epoch {epoch}{}", describe_last(last_valid))]
    TrainingDivergence {
        epoch: usize,
        last_valid: Option<EpochMetrics>,
    },

    #[error("notification could not be delivered: {0}")]
    NotificationFailure(String),

    #[error("could not write metrics: {0}")]
    MetricsLog(#[from] std::io::Error),
}

impl TrainError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        TrainError::InvalidConfiguration(message.into())
    }

    pub(crate) fn data(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        TrainError::DataUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// The stage of a run that produced this error, as shown to the user.
    pub fn stage(&self) -> &'static str {
        match self {
            TrainError::InvalidConfiguration(_) => "configuration",
            TrainError::DataUnavailable { .. } => "data load",
            TrainError::TrainingDivergence { .. } => "training",
            TrainError::NotificationFailure(_) => "notification",
            TrainError::MetricsLog(_) => "metrics",
        }
    }
}

fn describe_last(last_valid: &Option<EpochMetrics>) -> String {
    match last_valid {
        Some(m) => format!(
            " (last valid epoch {}: val_loss={:.4}, val_accuracy={:.4})",
            m.epoch, m.val_loss, m.val_accuracy
        ),
        None => " (no epoch completed)".to_string(),
    }
}

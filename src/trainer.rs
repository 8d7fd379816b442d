use std::time::{Duration, Instant};

use arrayfire::{imax, mul, sum_all, Array, RandomEngine, RandomEngineType};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::dataset::Partition;
use crate::error::TrainError;
use crate::metrics::{EpochMetrics, MetricsSink};
use crate::network::{one_hot, Classifier};
use crate::optimizer::Optimizer;

pub const DEFAULT_BATCH_SIZE: usize = 32;
const HISTOGRAM_BINS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Training { epoch: usize },
    Done,
    Failed { epoch: usize },
}

/// Outcome of a successful [`Trainer::fit`] call.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs_completed: usize,
    pub last: Option<EpochMetrics>,
    pub elapsed: Duration,
}

/// Owns a model for the duration of a run and trains it on borrowed partitions.
pub struct Trainer<'a> {
    model: Classifier,
    optimizer: Optimizer,
    train: &'a Partition,
    eval: &'a Partition,
    batch_size: usize,
    shuffle_rng: StdRng,
    dropout_engine: RandomEngine,
    epochs_run: usize,
    last: Option<EpochMetrics>,
    state: TrainerState,
}

impl<'a> Trainer<'a> {
    pub fn new(
        model: Classifier,
        optimizer: Optimizer,
        train: &'a Partition,
        eval: &'a Partition,
        batch_size: usize,
        seed: u64,
    ) -> Result<Self, TrainError> {
        if batch_size == 0 {
            return Err(TrainError::invalid("batch size must be at least 1"));
        }
        let config = model.config();
        for (name, partition) in [("training", train), ("evaluation", eval)] {
            if partition.sample_size() != config.input_size {
                return Err(TrainError::invalid(format!(
                    "{} samples have {} values but the model expects {}",
                    name,
                    partition.sample_size(),
                    config.input_size
                )));
            }
            if let Some(&label) = partition
                .labels()
                .iter()
                .find(|&&l| l as usize >= config.output_width)
            {
                return Err(TrainError::invalid(format!(
                    "{} label {} does not fit an output layer of width {}",
                    name, label, config.output_width
                )));
            }
        }

        Ok(Trainer {
            model,
            optimizer,
            train,
            eval,
            batch_size,
            shuffle_rng: StdRng::seed_from_u64(seed),
            dropout_engine: RandomEngine::new(
                RandomEngineType::PHILOX_4X32_10,
                Some(seed.wrapping_add(1)),
            ),
            epochs_run: 0,
            last: None,
            state: TrainerState::Idle,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn model(&self) -> &Classifier {
        &self.model
    }

    /// Runs `epochs` more epochs, handing each epoch's metrics to `sink`.
    ///
    /// Epoch numbering, shuffling and optimizer state carry over between calls,
    /// so two calls of `n` epochs train exactly like one call of `2n`.
    pub fn fit(
        &mut self,
        epochs: usize,
        sink: &mut dyn MetricsSink,
    ) -> Result<TrainingSummary, TrainError> {
        if let TrainerState::Failed { epoch } = self.state {
            return Err(self.divergence(epoch));
        }

        let start = Instant::now();
        for _ in 0..epochs {
            let epoch = self.epochs_run + 1;
            self.state = TrainerState::Training { epoch };

            let metrics = match self.run_epoch(epoch) {
                Ok(metrics) => metrics,
                Err(e) => {
                    self.state = TrainerState::Failed { epoch };
                    return Err(e);
                }
            };
            tracing::info!(
                "Epoch {}: loss {:.4} - accuracy {:.4} - val_loss {:.4} - val_accuracy {:.4} ({} ms)",
                metrics.epoch,
                metrics.train_loss,
                metrics.train_accuracy,
                metrics.val_loss,
                metrics.val_accuracy,
                metrics.elapsed_ms
            );

            self.epochs_run = epoch;
            self.last = Some(metrics.clone());
            let recorded = sink.record(&metrics).and_then(|_| {
                sink.record_histograms(epoch, &self.model.histograms(HISTOGRAM_BINS))
            });
            if let Err(e) = recorded {
                self.state = TrainerState::Done;
                return Err(e);
            }
        }
        self.state = TrainerState::Done;

        Ok(TrainingSummary {
            epochs_completed: epochs,
            last: self.last.clone(),
            elapsed: start.elapsed(),
        })
    }

    fn run_epoch(&mut self, epoch: usize) -> Result<EpochMetrics, TrainError> {
        let epoch_start = Instant::now();
        let classes = self.model.config().output_width;

        let mut order: Vec<u32> = (0..self.train.len() as u32).collect();
        order.shuffle(&mut self.shuffle_rng);

        let mut loss_sum = 0.0;
        let mut correct = 0;
        for (batch, indices) in order.chunks(self.batch_size).enumerate() {
            let (inputs, labels) = self.train.batch(indices);
            let targets = one_hot(&labels, classes);

            let pass = self.model.forward_train(inputs, &self.dropout_engine);
            let (batch_loss, batch_correct) = score(&pass.log_probs, &targets, &labels);
            if !batch_loss.is_finite() {
                tracing::warn!(epoch, batch, loss = batch_loss, "training loss is not finite");
                return Err(self.divergence(epoch));
            }
            loss_sum += batch_loss * labels.len() as f64;
            correct += batch_correct;

            let nabla = self.model.backpropagate(&pass, &targets);
            self.optimizer.step(self.model.parameters_mut(), nabla.into_array());
            tracing::trace!(epoch, batch, loss = batch_loss, "batch done");
        }

        let (val_loss, val_accuracy) = self.evaluate();
        if !val_loss.is_finite() {
            tracing::warn!(epoch, "held-out loss is not finite");
            return Err(self.divergence(epoch));
        }

        let samples = self.train.len() as f64;
        Ok(EpochMetrics {
            epoch,
            train_loss: loss_sum / samples,
            train_accuracy: correct as f64 / samples,
            val_loss,
            val_accuracy,
            elapsed_ms: epoch_start.elapsed().as_millis() as u64,
        })
    }

    /// Mean loss and accuracy on the evaluation partition, without dropout.
    pub fn evaluate(&self) -> (f64, f64) {
        let classes = self.model.config().output_width;
        let order: Vec<u32> = (0..self.eval.len() as u32).collect();

        let mut loss_sum = 0.0;
        let mut correct = 0;
        for indices in order.chunks(self.batch_size) {
            let (inputs, labels) = self.eval.batch(indices);
            let log_probs = self.model.log_probabilities(&inputs);
            let (loss, batch_correct) = score(&log_probs, &one_hot(&labels, classes), &labels);
            loss_sum += loss * labels.len() as f64;
            correct += batch_correct;
        }

        let samples = self.eval.len() as f64;
        (loss_sum / samples, correct as f64 / samples)
    }

    fn divergence(&self, epoch: usize) -> TrainError {
        TrainError::TrainingDivergence {
            epoch,
            last_valid: self.last.clone(),
        }
    }
}

// mean cross-entropy and number of correct argmax predictions
fn score(log_probs: &Array<f64>, targets: &Array<f64>, labels: &[u8]) -> (f64, usize) {
    let m = labels.len() as f64;
    let loss = -sum_all(&mul(log_probs, targets, false)).0 / m;

    let (_, predicted) = imax(log_probs, 0);
    let mut predicted_host = vec![0u32; predicted.elements()];
    predicted.host(&mut predicted_host);
    let correct = predicted_host
        .iter()
        .zip(labels)
        .filter(|(p, l)| **p == **l as u32)
        .count();

    (loss, correct)
}

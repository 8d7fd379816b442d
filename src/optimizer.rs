use std::{fmt, str::FromStr};

use arrayfire::{add, constant, div, mul, sqrt, sub, Array};
use serde::Serialize;

use crate::error::TrainError;

const EPSILON: f64 = 1e-7;
const ADAM_BETA_1: f64 = 0.9;
const ADAM_BETA_2: f64 = 0.999;
const RMSPROP_RHO: f64 = 0.9;
const ADAGRAD_INITIAL_ACCUMULATOR: f64 = 0.1;

/// The supported update rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
    RmsProp,
    Adagrad,
}

impl OptimizerKind {
    pub fn default_learning_rate(self) -> f64 {
        match self {
            OptimizerKind::Sgd => 0.01,
            OptimizerKind::Adam | OptimizerKind::RmsProp | OptimizerKind::Adagrad => 0.001,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adam => "adam",
            OptimizerKind::RmsProp => "rmsprop",
            OptimizerKind::Adagrad => "adagrad",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            "rmsprop" => Ok(OptimizerKind::RmsProp),
            "adagrad" => Ok(OptimizerKind::Adagrad),
            other => Err(TrainError::invalid(format!(
                "unknown optimizer '{}', expected one of sgd, adam, rmsprop, adagrad",
                other
            ))),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Per-parameter running statistics; which fields are used depends on the kind
struct Moments {
    first: Array<f64>,  // Adam mean
    second: Array<f64>, // Adam/RMSprop variance, Adagrad accumulator
}

/// An update rule together with its state for one model.
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f64,
    iterations: u64,
    moments: Vec<Moments>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: Option<f64>) -> Result<Self, TrainError> {
        let learning_rate = learning_rate.unwrap_or_else(|| kind.default_learning_rate());
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(TrainError::invalid(format!(
                "learning rate must be positive, got {}",
                learning_rate
            )));
        }
        Ok(Optimizer {
            kind,
            learning_rate,
            iterations: 0,
            moments: Vec::new(),
        })
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Number of updates applied so far.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Applies one update to every parameter from its gradient.
    pub fn step<const N: usize>(&mut self, params: [&mut Array<f64>; N], grads: [Array<f64>; N]) {
        if self.moments.is_empty() {
            let initial = match self.kind {
                OptimizerKind::Adagrad => ADAGRAD_INITIAL_ACCUMULATOR,
                _ => 0.0,
            };
            self.moments = grads
                .iter()
                .map(|g| Moments {
                    first: constant(0.0, g.dims()),
                    second: constant(initial, g.dims()),
                })
                .collect();
        }
        self.iterations += 1;

        for ((param, grad), moments) in params.into_iter().zip(grads).zip(self.moments.iter_mut()) {
            let delta = match self.kind {
                OptimizerKind::Sgd => scale(&grad, self.learning_rate),
                OptimizerKind::Adam => {
                    moments.first = add(
                        &scale(&moments.first, ADAM_BETA_1),
                        &scale(&grad, 1.0 - ADAM_BETA_1),
                        false,
                    );
                    moments.second = add(
                        &scale(&moments.second, ADAM_BETA_2),
                        &scale(&mul(&grad, &grad, false), 1.0 - ADAM_BETA_2),
                        false,
                    );
                    let t = self.iterations as i32;
                    let step_size = self.learning_rate * (1.0 - ADAM_BETA_2.powi(t)).sqrt()
                        / (1.0 - ADAM_BETA_1.powi(t));
                    scale(&div(&moments.first, &denominator(&moments.second), false), step_size)
                }
                OptimizerKind::RmsProp => {
                    moments.second = add(
                        &scale(&moments.second, RMSPROP_RHO),
                        &scale(&mul(&grad, &grad, false), 1.0 - RMSPROP_RHO),
                        false,
                    );
                    scale(&div(&grad, &denominator(&moments.second), false), self.learning_rate)
                }
                OptimizerKind::Adagrad => {
                    moments.second = add(&moments.second, &mul(&grad, &grad, false), false);
                    scale(&div(&grad, &denominator(&moments.second), false), self.learning_rate)
                }
            };
            *param = sub(&*param, &delta, false);
        }
    }
}

fn scale(a: &Array<f64>, factor: f64) -> Array<f64> {
    mul(a, &constant(factor, a.dims()), false)
}

// sqrt(v) + epsilon
fn denominator(v: &Array<f64>) -> Array<f64> {
    add(&sqrt(v), &constant(EPSILON, v.dims()), false)
}

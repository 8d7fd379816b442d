use arrayfire::*;

use crate::error::TrainError;
use crate::metrics::ParameterHistogram;

/*  Sizing Notation:
   k - size of current layer (input activations)
   j - size of next layer    (output activations)
   m - size of mini-batch
*/

pub const DEFAULT_HIDDEN_UNITS: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub input_size: usize,
    pub hidden_units: usize,
    pub output_width: usize,
    pub dropout: f64,
    pub seed: u64,
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), TrainError> {
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainError::invalid(format!(
                "dropout rate must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.input_size == 0 {
            return Err(TrainError::invalid("input size must be at least 1"));
        }
        if self.hidden_units == 0 {
            return Err(TrainError::invalid("hidden layer needs at least one unit"));
        }
        if self.output_width == 0 {
            return Err(TrainError::invalid("output width must be at least 1"));
        }
        Ok(())
    }
}

/// One fully connected layer, `z = w·a + b`.
#[derive(Clone)]
pub(crate) struct Dense {
    pub(crate) weights: Array<f64>, // always (j, k) in size
    pub(crate) biases: Array<f64>,  // always (j, 1) in size
}

impl Dense {
    /// Glorot-uniform weights and zero biases.
    fn new(inputs: usize, outputs: usize, engine: &RandomEngine) -> Self {
        let limit = (6.0 / (inputs + outputs) as f64).sqrt();
        let dims = Dim4::new(&[outputs as u64, inputs as u64, 1, 1]);
        let unit = random_uniform::<f64>(dims, engine);
        // map [0, 1) onto [-limit, limit)
        let weights = sub(
            &mul(&unit, &constant(2.0 * limit, dims), false),
            &constant(limit, dims),
            false,
        );
        let biases = constant(0.0, Dim4::new(&[outputs as u64, 1, 1, 1]));
        Dense { weights, biases }
    }

    fn forward(&self, a: &Array<f64>) -> Array<f64> {
        add(
            &matmul(&self.weights, a, MatProp::NONE, MatProp::NONE),
            &self.biases,
            true,
        )
    }
}

/// Gradients for every parameter, in the same order as [`Classifier::parameters`].
pub(crate) struct Nabla {
    pub(crate) hidden_w: Array<f64>,
    pub(crate) hidden_b: Array<f64>,
    pub(crate) output_w: Array<f64>,
    pub(crate) output_b: Array<f64>,
}

/// Intermediate values of a training forward pass kept for backpropagation.
pub(crate) struct ForwardPass {
    inputs: Array<f64>,               // always (k, m) in size
    hidden_z: Array<f64>,             // always (hidden, m) in size
    hidden_a: Array<f64>,             // after dropout
    mask: Option<Array<f64>>,         // already scaled by 1 / (1 - rate)
    pub(crate) log_probs: Array<f64>, // always (classes, m) in size
}

/// Flatten → dense + ReLU → dropout → dense + softmax.
#[derive(Clone)]
pub struct Classifier {
    config: ClassifierConfig,
    pub(crate) hidden: Dense,
    pub(crate) output: Dense,
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, TrainError> {
        config.validate()?;

        let engine = RandomEngine::new(RandomEngineType::PHILOX_4X32_10, Some(config.seed));
        let hidden = Dense::new(config.input_size, config.hidden_units, &engine);
        let output = Dense::new(config.hidden_units, config.output_width, &engine);

        Ok(Classifier {
            config: config.clone(),
            hidden,
            output,
        })
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Class probabilities for a `(input_size, m)` batch, without dropout.
    pub fn predict(&self, inputs: &Array<f64>) -> Array<f64> {
        exp(&self.log_probabilities(inputs))
    }

    pub(crate) fn log_probabilities(&self, inputs: &Array<f64>) -> Array<f64> {
        let hidden = relu(&self.hidden.forward(inputs));
        log_softmax(&self.output.forward(&hidden))
    }

    /// Training forward pass with inverted dropout drawn from `engine`.
    pub(crate) fn forward_train(&self, inputs: Array<f64>, engine: &RandomEngine) -> ForwardPass {
        let hidden_z = self.hidden.forward(&inputs);
        let activated = relu(&hidden_z);

        let rate = self.config.dropout;
        let (hidden_a, mask) = if rate > 0.0 {
            let dims = activated.dims();
            let keep = ge(&random_uniform::<f64>(dims, engine), &constant(rate, dims), false);
            let mask = mul(
                &keep.cast::<f64>(),
                &constant(1.0 / (1.0 - rate), dims),
                false,
            );
            (mul(&activated, &mask, false), Some(mask))
        } else {
            (activated, None)
        };

        let log_probs = log_softmax(&self.output.forward(&hidden_a));
        ForwardPass {
            inputs,
            hidden_z,
            hidden_a,
            mask,
            log_probs,
        }
    }

    /// Gradients of the mean cross-entropy over the batch.
    pub(crate) fn backpropagate(&self, pass: &ForwardPass, one_hot: &Array<f64>) -> Nabla {
        let m = pass.inputs.dims()[1] as f64;

        // softmax + cross-entropy: dL/dz = (p - y) / m
        let probs = exp(&pass.log_probs);
        let delta = sub(&probs, one_hot, false);
        let delta = mul(&delta, &constant(1.0 / m, delta.dims()), false); // (classes, m)

        let output_w = matmul(&delta, &pass.hidden_a, MatProp::NONE, MatProp::TRANS);
        let output_b = sum(&delta, 1);

        let mut delta = matmul(&self.output.weights, &delta, MatProp::TRANS, MatProp::NONE);
        if let Some(mask) = &pass.mask {
            delta = mul(&delta, mask, false);
        }
        let delta = mul(&delta, &relu_prime(&pass.hidden_z), false); // (hidden, m)

        let hidden_w = matmul(&delta, &pass.inputs, MatProp::NONE, MatProp::TRANS);
        let hidden_b = sum(&delta, 1);

        Nabla {
            hidden_w,
            hidden_b,
            output_w,
            output_b,
        }
    }

    pub(crate) fn parameters_mut(&mut self) -> [&mut Array<f64>; 4] {
        [
            &mut self.hidden.weights,
            &mut self.hidden.biases,
            &mut self.output.weights,
            &mut self.output.biases,
        ]
    }

    /// Host copies of `[hidden weights, hidden biases, output weights, output biases]`.
    pub fn parameters(&self) -> Vec<Vec<f64>> {
        [
            &self.hidden.weights,
            &self.hidden.biases,
            &self.output.weights,
            &self.output.biases,
        ]
        .iter()
        .map(|p| to_host(p))
        .collect()
    }

    /// Value distribution of every parameter array over `bins` equal-width bins.
    pub fn histograms(&self, bins: u32) -> Vec<ParameterHistogram> {
        [
            ("hidden/weights", &self.hidden.weights),
            ("hidden/biases", &self.hidden.biases),
            ("output/weights", &self.output.weights),
            ("output/biases", &self.output.biases),
        ]
        .into_iter()
        .map(|(name, p)| distribution(name, p, bins))
        .collect()
    }
}

fn distribution(name: &'static str, p: &Array<f64>, bins: u32) -> ParameterHistogram {
    let bins = bins.max(1);
    let min = min_all(p).0;
    let max = max_all(p).0;
    let mut counts = vec![0u32; bins as usize];
    if max > min {
        histogram(p, bins, min, max).host(&mut counts);
    } else {
        // constant array, e.g. freshly zeroed biases
        counts[0] = p.elements() as u32;
    }
    ParameterHistogram {
        name,
        min,
        max,
        counts,
    }
}

impl Nabla {
    pub(crate) fn into_array(self) -> [Array<f64>; 4] {
        [self.hidden_w, self.hidden_b, self.output_w, self.output_b]
    }
}

pub(crate) fn to_host(a: &Array<f64>) -> Vec<f64> {
    let mut host = vec![0.0; a.elements()];
    a.host(&mut host);
    host
}

/// One-hot `(classes, m)` targets for a batch of labels.
pub(crate) fn one_hot(labels: &[u8], classes: usize) -> Array<f64> {
    let mut host = vec![0.0; labels.len() * classes];
    for (i, &label) in labels.iter().enumerate() {
        host[i * classes + label as usize] = 1.0;
    }
    Array::new(&host, Dim4::new(&[classes as u64, labels.len() as u64, 1, 1]))
}

fn relu(z: &Array<f64>) -> Array<f64> {
    maxof(z, &constant(0.0, z.dims()), false)
}

fn relu_prime(z: &Array<f64>) -> Array<f64> {
    gt(z, &constant(0.0, z.dims()), false).cast::<f64>()
}

// log p = z - max(z) - log(sum(exp(z - max(z)))), column-wise
fn log_softmax(z: &Array<f64>) -> Array<f64> {
    let shifted = sub(z, &max(z, 0), true);
    let log_sum = log(&sum(&exp(&shifted), 0));
    sub(&shifted, &log_sum, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dropout: f64) -> ClassifierConfig {
        ClassifierConfig {
            input_size: 16,
            hidden_units: 8,
            output_width: 10,
            dropout,
            seed: 7,
        }
    }

    fn inputs(m: u64) -> Array<f64> {
        let host: Vec<f64> = (0..16 * m).map(|i| ((i * 37) % 101) as f64 / 100.0).collect();
        Array::new(&host, Dim4::new(&[16, m, 1, 1]))
    }

    #[test]
    fn predictions_are_probability_distributions() {
        for dropout in [0.0, 0.2, 0.5, 0.99] {
            let model = Classifier::new(&config(dropout)).unwrap();
            let probs = to_host(&model.predict(&inputs(5)));
            for column in probs.chunks(10) {
                assert!(column.iter().all(|&p| p >= 0.0));
                let total: f64 = column.iter().sum();
                assert!((total - 1.0).abs() < 1e-9, "column sums to {}", total);
            }
        }
    }

    #[test]
    fn softmax_survives_large_logits() {
        let z = Array::new(&[1000.0, 0.0, -1000.0], Dim4::new(&[3, 1, 1, 1]));
        let p = to_host(&exp(&log_softmax(&z)));
        assert!(p.iter().all(|v| v.is_finite()));
        assert!((p[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_dropout_outside_unit_interval() {
        for dropout in [1.0, 1.5, -0.1, f64::NAN] {
            match Classifier::new(&config(dropout)) {
                Err(TrainError::InvalidConfiguration(_)) => {}
                _ => panic!("dropout {} should be rejected", dropout),
            }
        }
    }

    #[test]
    fn same_seed_same_parameters() {
        let a = Classifier::new(&config(0.2)).unwrap().parameters();
        let b = Classifier::new(&config(0.2)).unwrap().parameters();
        assert_eq!(a, b);

        let mut other = config(0.2);
        other.seed = 8;
        assert_ne!(a, Classifier::new(&other).unwrap().parameters());
    }

    #[test]
    fn weights_respect_glorot_limit() {
        let model = Classifier::new(&config(0.0)).unwrap();
        let params = model.parameters();
        let limit = (6.0f64 / 24.0).sqrt();
        assert!(params[0].iter().all(|w| w.abs() <= limit));
        assert!(params[1].iter().all(|&b| b == 0.0));
    }

    #[test]
    fn histograms_cover_every_parameter() {
        let model = Classifier::new(&config(0.0)).unwrap();
        let histograms = model.histograms(10);
        let names: Vec<&str> = histograms.iter().map(|h| h.name).collect();
        assert_eq!(
            names,
            ["hidden/weights", "hidden/biases", "output/weights", "output/biases"]
        );

        let sizes = [16 * 8, 8, 8 * 10, 10];
        for (h, size) in histograms.iter().zip(sizes) {
            assert_eq!(h.counts.len(), 10);
            assert_eq!(h.counts.iter().sum::<u32>(), size);
            assert!(h.min <= h.max);
        }
        // zero biases land in a single bin
        assert_eq!(histograms[1].counts[0], 8);
        assert_eq!((histograms[1].min, histograms[1].max), (0.0, 0.0));
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let model = Classifier::new(&config(0.0)).unwrap();
        let x = inputs(3);
        let labels = [1u8, 4, 9];
        let targets = one_hot(&labels, 10);
        let engine = RandomEngine::new(RandomEngineType::PHILOX_4X32_10, Some(1));

        let pass = model.forward_train(x.clone(), &engine);
        let analytic = to_host(&model.backpropagate(&pass, &targets).output_b);

        let loss = |m: &Classifier| {
            let lp = to_host(&m.log_probabilities(&x));
            -labels
                .iter()
                .enumerate()
                .map(|(i, &l)| lp[i * 10 + l as usize])
                .sum::<f64>()
                / 3.0
        };

        let eps = 1e-6;
        for class in [0usize, 4, 9] {
            let mut bumped = model.clone();
            let mut bias = to_host(&bumped.output.biases);
            bias[class] += eps;
            bumped.output.biases = Array::new(&bias, Dim4::new(&[10, 1, 1, 1]));
            let numeric = (loss(&bumped) - loss(&model)) / eps;
            assert!((numeric - analytic[class]).abs() < 1e-4);
        }
    }

    #[test]
    fn dropout_mask_is_scaled() {
        let model = Classifier::new(&config(0.5)).unwrap();
        let engine = RandomEngine::new(RandomEngineType::PHILOX_4X32_10, Some(3));
        let pass = model.forward_train(inputs(4), &engine);
        let mask = to_host(pass.mask.as_ref().unwrap());
        assert!(mask.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-12));
    }
}

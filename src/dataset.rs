use arrayfire::{lookup, Array, Dim4};

use crate::error::TrainError;

const IN_MEMORY: &str = "<in-memory>";

/// An immutable set of labelled image samples.
///
/// Images are stored one sample per column so that a batch of `m` samples is a
/// `(rows * cols, m)` array, which is the layout the network multiplies against.
#[derive(Clone)]
pub struct Partition {
    images: Array<f64>, // always (rows * cols, n) in size
    labels: Vec<u8>,
    rows: usize,
    cols: usize,
}

/// The training and held-out partitions of one dataset.
#[derive(Clone)]
pub struct Dataset {
    pub train: Partition,
    pub test: Partition,
}

impl Partition {
    /// Builds a partition from row-major pixels, `rows * cols` values per sample.
    ///
    /// Pixels must already be normalized into `[0, 1]`.
    pub fn new(
        pixels: Vec<f64>,
        labels: Vec<u8>,
        rows: usize,
        cols: usize,
    ) -> Result<Self, TrainError> {
        let sample_size = rows * cols;
        if sample_size == 0 {
            return Err(TrainError::data(IN_MEMORY, "image dimensions must be non-zero"));
        }
        if labels.is_empty() {
            return Err(TrainError::data(IN_MEMORY, "partition has no samples"));
        }
        if pixels.len() != labels.len() * sample_size {
            return Err(TrainError::data(
                IN_MEMORY,
                format!(
                    "{} pixels do not form {} images of {}x{}",
                    pixels.len(),
                    labels.len(),
                    rows,
                    cols
                ),
            ));
        }
        if let Some(bad) = pixels.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(TrainError::data(
                IN_MEMORY,
                format!("pixel value {} is outside [0, 1]", bad),
            ));
        }

        let images = Array::new(
            &pixels,
            Dim4::new(&[sample_size as u64, labels.len() as u64, 1, 1]),
        );
        Ok(Partition {
            images,
            labels,
            rows,
            cols,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of values in one flattened sample.
    pub fn sample_size(&self) -> usize {
        self.rows * self.cols
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Gathers the given samples into a `(sample_size, indices.len())` input matrix
    /// together with their labels, in the same order.
    pub(crate) fn batch(&self, indices: &[u32]) -> (Array<f64>, Vec<u8>) {
        let index_array = Array::new(indices, Dim4::new(&[indices.len() as u64, 1, 1, 1]));
        let inputs = lookup(&self.images, &index_array, 1);
        let labels = indices.iter().map(|&i| self.labels[i as usize]).collect();
        (inputs, labels)
    }
}

impl Dataset {
    pub fn new(train: Partition, test: Partition) -> Result<Self, TrainError> {
        if (train.rows, train.cols) != (test.rows, test.cols) {
            return Err(TrainError::data(
                IN_MEMORY,
                format!(
                    "training images are {}x{} but evaluation images are {}x{}",
                    train.rows, train.cols, test.rows, test.cols
                ),
            ));
        }
        Ok(Dataset { train, test })
    }
}

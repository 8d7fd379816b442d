use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use flate2::read::GzDecoder;
use std::{
    fs,
    io::{self, Cursor, Read},
    path::{Path, PathBuf},
};

use crate::dataset::{Dataset, Partition};
use crate::error::TrainError;

const LABELS_MAGIC: i32 = 2049;
const IMAGES_MAGIC: i32 = 2051;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug)]
struct IdxData {
    sizes: Vec<usize>,
    data: Vec<u8>,
}

impl IdxData {
    fn parse(bytes: &[u8]) -> Result<IdxData, io::Error> {
        let mut contents: Vec<u8> = Vec::new();
        if bytes.starts_with(&GZIP_MAGIC) {
            GzDecoder::new(bytes).read_to_end(&mut contents)?;
        } else {
            contents.extend_from_slice(bytes);
        }
        let mut r = Cursor::new(&contents);

        let magic_number = r.read_i32::<BigEndian>()?;
        let dimensions = match magic_number {
            LABELS_MAGIC => 1,
            IMAGES_MAGIC => 3,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown IDX magic number {}", other),
                ))
            }
        };

        let mut sizes: Vec<usize> = Vec::with_capacity(dimensions);
        for _ in 0..dimensions {
            let size = r.read_i32::<BigEndian>()?;
            let size = usize::try_from(size).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "negative IDX dimension")
            })?;
            sizes.push(size);
        }

        let mut data: Vec<u8> = Vec::new();
        r.read_to_end(&mut data)?;

        let expected = sizes
            .iter()
            .try_fold(1usize, |acc, &s| acc.checked_mul(s))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "IDX dimensions overflow"))?;
        if data.len() != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("expected {} bytes of IDX data, found {}", expected, data.len()),
            ));
        }

        Ok(IdxData { sizes, data })
    }

    fn read(path: &Path) -> Result<IdxData, TrainError> {
        let bytes = fs::read(path).map_err(|e| TrainError::data(path, e))?;
        IdxData::parse(&bytes).map_err(|e| TrainError::data(path, e))
    }
}

/// Picks `<stem>.gz` when present, otherwise the uncompressed `<stem>`.
fn locate(dir: &Path, stem: &str) -> PathBuf {
    let gz = dir.join(format!("{}.gz", stem));
    if gz.exists() {
        gz
    } else {
        let raw = dir.join(stem);
        if raw.exists() {
            raw
        } else {
            gz
        }
    }
}

/// Loads one IDX partition, `dataset_name` being `train` or `t10k` for MNIST.
pub fn load_partition(dir: &Path, dataset_name: &str) -> Result<Partition, TrainError> {
    let labels_path = locate(dir, &format!("{}-labels-idx1-ubyte", dataset_name));
    let label_data = IdxData::read(&labels_path)?;
    if label_data.sizes.len() != 1 {
        return Err(TrainError::data(&labels_path, "not an IDX label file"));
    }

    let images_path = locate(dir, &format!("{}-images-idx3-ubyte", dataset_name));
    let images_data = IdxData::read(&images_path)?;
    if images_data.sizes.len() != 3 {
        return Err(TrainError::data(&images_path, "not an IDX image file"));
    }

    let (count, rows, cols) = (
        images_data.sizes[0],
        images_data.sizes[1],
        images_data.sizes[2],
    );
    if count != label_data.sizes[0] {
        return Err(TrainError::data(
            &images_path,
            format!("{} images but {} labels", count, label_data.sizes[0]),
        ));
    }

    let pixels: Vec<f64> = images_data
        .data
        .into_iter()
        .map(|x| x as f64 / 255.)
        .collect();
    let partition = Partition::new(pixels, label_data.data, rows, cols)
        .map_err(|e| TrainError::data(&images_path, e))?;

    tracing::info!(
        name = dataset_name,
        samples = partition.len(),
        rows,
        cols,
        "loaded partition"
    );
    Ok(partition)
}

/// Loads the MNIST training (`train`) and evaluation (`t10k`) partitions from `dir`.
pub fn load_data(dir: &Path) -> Result<Dataset, TrainError> {
    let train = load_partition(dir, "train")?;
    let test = load_partition(dir, "t10k")?;
    Dataset::new(train, test)
}

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::TrainError;

const CSV_HEADER: &str = "epoch,train_loss,train_accuracy,val_loss,val_accuracy,elapsed_ms";
const HISTOGRAM_HEADER: &str = "epoch,parameter,min,max,counts";

/// Scalar metrics for one completed epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based, counted across every `fit` call on the same trainer.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub elapsed_ms: u64,
}

/// Equal-width bin counts of one parameter array between its `min` and `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterHistogram {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub counts: Vec<u32>,
}

/// Receives one record per epoch from the trainer.
pub trait MetricsSink {
    fn record(&mut self, metrics: &EpochMetrics) -> Result<(), TrainError>;

    /// Parameter distributions after `epoch`. Ignored unless the sink stores them.
    fn record_histograms(
        &mut self,
        _epoch: usize,
        _histograms: &[ParameterHistogram],
    ) -> Result<(), TrainError> {
        Ok(())
    }
}

impl MetricsSink for Vec<EpochMetrics> {
    fn record(&mut self, metrics: &EpochMetrics) -> Result<(), TrainError> {
        self.push(metrics.clone());
        Ok(())
    }
}

/// Name of the per-run log directory, `{run_id}_{YYYYmmdd-HHMMSS}`.
pub fn run_dir_name(run_id: &str, started: &DateTime<Local>) -> String {
    format!("{}_{}", run_id, started.format("%Y%m%d-%H%M%S"))
}

/// Appends epoch metrics as CSV rows to `metrics.csv` in a fresh run directory,
/// and parameter histograms to `histograms.csv` next to it.
pub struct CsvMetricsLogger {
    dir: PathBuf,
    writer: BufWriter<File>,
    histograms: BufWriter<File>,
}

impl CsvMetricsLogger {
    pub fn create(
        log_root: &Path,
        run_id: &str,
        started: &DateTime<Local>,
    ) -> Result<Self, TrainError> {
        let dir = log_root.join(run_dir_name(run_id, started));
        fs::create_dir_all(&dir)?;

        let mut writer = BufWriter::new(File::create(dir.join("metrics.csv"))?);
        writeln!(writer, "{}", CSV_HEADER)?;
        writer.flush()?;

        let mut histograms = BufWriter::new(File::create(dir.join("histograms.csv"))?);
        writeln!(histograms, "{}", HISTOGRAM_HEADER)?;
        histograms.flush()?;

        tracing::debug!(dir = %dir.display(), "created run log directory");
        Ok(CsvMetricsLogger {
            dir,
            writer,
            histograms,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stores the run's configuration next to its metrics as `config.json`.
    pub fn write_config<T: Serialize>(&self, config: &T) -> Result<(), TrainError> {
        let file = File::create(self.dir.join("config.json"))?;
        serde_json::to_writer_pretty(file, config).map_err(std::io::Error::from)?;
        Ok(())
    }
}

impl MetricsSink for CsvMetricsLogger {
    fn record(&mut self, m: &EpochMetrics) -> Result<(), TrainError> {
        writeln!(
            self.writer,
            "{},{:.6},{:.6},{:.6},{:.6},{}",
            m.epoch, m.train_loss, m.train_accuracy, m.val_loss, m.val_accuracy, m.elapsed_ms,
        )?;
        // flushed per epoch so an interrupted run keeps what it logged
        self.writer.flush()?;
        Ok(())
    }

    fn record_histograms(
        &mut self,
        epoch: usize,
        histograms: &[ParameterHistogram],
    ) -> Result<(), TrainError> {
        for h in histograms {
            let counts: Vec<String> = h.counts.iter().map(u32::to_string).collect();
            writeln!(
                self.histograms,
                "{},{},{:.6},{:.6},{}",
                epoch,
                h.name,
                h.min,
                h.max,
                counts.join(";")
            )?;
        }
        self.histograms.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(epoch: usize) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 0.5,
            train_accuracy: 0.75,
            val_loss: 0.4,
            val_accuracy: 0.8125,
            elapsed_ms: 1200,
        }
    }

    #[test]
    fn run_dir_is_named_after_run_and_start_time() {
        let started = Local.with_ymd_and_hms(2023, 9, 8, 14, 5, 9).unwrap();
        assert_eq!(run_dir_name("test1", &started), "test1_20230908-140509");
    }

    #[test]
    fn writes_header_and_one_row_per_epoch() {
        let root = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2023, 9, 8, 14, 5, 9).unwrap();
        let mut logger = CsvMetricsLogger::create(root.path(), "run", &started).unwrap();
        logger.record(&sample(1)).unwrap();
        logger.record(&sample(2)).unwrap();

        let csv = fs::read_to_string(logger.dir().join("metrics.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "1,0.500000,0.750000,0.400000,0.812500,1200");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn writes_one_histogram_row_per_parameter() {
        let root = tempfile::tempdir().unwrap();
        let mut logger = CsvMetricsLogger::create(root.path(), "hist", &Local::now()).unwrap();
        let histograms = [
            ParameterHistogram {
                name: "hidden/weights",
                min: -0.5,
                max: 0.25,
                counts: vec![3, 0, 7],
            },
            ParameterHistogram {
                name: "hidden/biases",
                min: 0.0,
                max: 0.0,
                counts: vec![4, 0, 0],
            },
        ];
        logger.record_histograms(2, &histograms).unwrap();

        let csv = fs::read_to_string(logger.dir().join("histograms.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], HISTOGRAM_HEADER);
        assert_eq!(lines[1], "2,hidden/weights,-0.500000,0.250000,3;0;7");
        assert_eq!(lines[2], "2,hidden/biases,0.000000,0.000000,4;0;0");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn writes_config_json() {
        let root = tempfile::tempdir().unwrap();
        let logger = CsvMetricsLogger::create(root.path(), "cfg", &Local::now()).unwrap();
        logger.write_config(&sample(1)).unwrap();

        let json = fs::read_to_string(logger.dir().join("config.json")).unwrap();
        let back: EpochMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample(1));
    }

    #[test]
    fn vec_sink_collects_records() {
        let mut sink: Vec<EpochMetrics> = Vec::new();
        sink.record(&sample(4)).unwrap();
        assert_eq!(sink, vec![sample(4)]);
    }
}

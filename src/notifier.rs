use std::time::Duration;

use chrono::{DateTime, Local};
use reqwest::blocking::Client;
use serde::Serialize;

use crate::error::TrainError;
use crate::trainer::TrainingSummary;

const TIMEOUT: Duration = Duration::from_secs(10);
// Discord rejects message content longer than this
const MAX_CONTENT_CHARS: usize = 2000;

/// Identifies a run in notifications.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub run_id: String,
    pub started: DateTime<Local>,
}

impl RunInfo {
    pub fn new(run_id: &str, started: DateTime<Local>) -> Self {
        RunInfo {
            run_id: run_id.to_string(),
            started,
        }
    }
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Posts run status to a chat webhook. Delivery is best effort: failures are
/// logged and never reach the caller.
pub struct Notifier {
    target: Option<(Client, String)>,
}

impl Notifier {
    pub fn disabled() -> Self {
        Notifier { target: None }
    }

    pub fn from_url(url: Option<String>) -> Self {
        let Some(url) = url else {
            tracing::debug!("no webhook configured, notifications disabled");
            return Notifier::disabled();
        };
        match Client::builder().timeout(TIMEOUT).build() {
            Ok(client) => Notifier {
                target: Some((client, url)),
            },
            Err(e) => {
                tracing::warn!(error = %e, "could not build HTTP client, notifications disabled");
                Notifier::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn started(&self, run: &RunInfo) {
        self.send(&start_message(run));
    }

    pub fn finished(&self, run: &RunInfo, outcome: &Result<TrainingSummary, TrainError>) {
        self.send(&finish_message(run, outcome, Local::now()));
    }

    fn send(&self, content: &str) {
        if let Err(e) = self.post(content) {
            tracing::warn!(stage = e.stage(), "{}", e);
        }
    }

    fn post(&self, content: &str) -> Result<(), TrainError> {
        let Some((client, url)) = &self.target else {
            return Ok(());
        };
        let content: String = content.chars().take(MAX_CONTENT_CHARS).collect();
        let response = client
            .post(url)
            .json(&WebhookMessage { content: &content })
            .send()
            .map_err(|e| TrainError::NotificationFailure(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(TrainError::NotificationFailure(format!(
                "webhook answered {}",
                response.status()
            )));
        }
        tracing::debug!("notification delivered");
        Ok(())
    }
}

pub fn start_message(run: &RunInfo) -> String {
    format!(
        "Your training has started 🎬\nRun: {}\nStarting date: {}",
        run.run_id,
        run.started.format("%Y-%m-%d %H:%M:%S")
    )
}

pub fn finish_message(
    run: &RunInfo,
    outcome: &Result<TrainingSummary, TrainError>,
    ended: DateTime<Local>,
) -> String {
    let duration = format_duration((ended - run.started).to_std().unwrap_or_default());
    let header = format!(
        "Run: {}\nStarting date: {}\nEnd date: {}\nTraining duration: {}",
        run.run_id,
        run.started.format("%Y-%m-%d %H:%M:%S"),
        ended.format("%Y-%m-%d %H:%M:%S"),
        duration
    );
    match outcome {
        Ok(summary) => {
            let result = match &summary.last {
                Some(m) => format!(
                    "Epochs: {}\nFinal loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
                    m.epoch, m.train_loss, m.train_accuracy, m.val_loss, m.val_accuracy
                ),
                None => "No epochs were run".to_string(),
            };
            format!("Your training is complete 🎉\n{}\n{}", header, result)
        }
        Err(e) => format!(
            "Your training has crashed ☠️\n{}\nFailed stage: {}\nHere's the error: {}",
            header,
            e.stage(),
            e
        ),
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

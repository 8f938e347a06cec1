//! Response-logging sink

use super::decoder::{Correctness, ResponseCode};
use chrono::{DateTime, Local};
use std::time::Duration;
use tracing::info;

/// One logged response as handed to the experiment's response store
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRecord {
    pub response: ResponseCode,
    /// Event time relative to the item onset
    pub response_time: Duration,
    pub correct: Correctness,
    pub item: String,
    pub feedback: bool,
    /// Wall-clock time the record was produced
    pub logged_at: DateTime<Local>,
}

/// One-way sink; the controller never reads records back
pub trait ResponseSink {
    fn add(&mut self, record: ResponseRecord);
}

/// Keeps records in memory and mirrors each one to the log
#[derive(Debug, Default)]
pub struct ResponseLog {
    records: Vec<ResponseRecord>,
}

impl ResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ResponseRecord] {
        &self.records
    }

    /// Share of scored responses that were correct, if any were scored
    pub fn accuracy(&self) -> Option<f64> {
        let scored: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.correct != Correctness::Indeterminate)
            .collect();
        if scored.is_empty() {
            return None;
        }
        let correct = scored
            .iter()
            .filter(|r| r.correct == Correctness::Correct)
            .count();
        Some(correct as f64 / scored.len() as f64)
    }
}

impl ResponseSink for ResponseLog {
    fn add(&mut self, record: ResponseRecord) {
        info!(
            "[{}] response={} rt={:.1}ms correct={:?} at {}",
            record.item,
            record.response,
            record.response_time.as_secs_f64() * 1000.0,
            record.correct,
            record.logged_at.format("%H:%M:%S.%3f")
        );
        self.records.push(record);
    }
}

//! Retained metric samples

use realtime_pipeline_types::MetricSample;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Samples of one metric, pruned to a retention window on every insert
#[derive(Debug, Clone)]
pub struct MetricHistory {
    retention: Duration,
    samples: VecDeque<(Instant, MetricSample)>,
}

impl MetricHistory {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            samples: VecDeque::new(),
        }
    }

    /// Append a sample and drop everything older than the retention window
    pub fn record(&mut self, value: f64) {
        let now = Instant::now();
        self.samples.push_back((now, MetricSample::new(value)));

        while let Some((recorded, _)) = self.samples.front() {
            if now.duration_since(*recorded) > self.retention {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Retained samples, oldest first
    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.iter().map(|(_, sample)| *sample).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

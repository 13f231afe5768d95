//! Upload progress reporting

use crate::logging::Logger;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Receives `(bytes_so_far, total_size, label)` after every uploaded chunk.
///
/// `total_size` is zero when the payload length is unknown. One callback may
/// be shared by several concurrent uploads, so implementations synchronize
/// their own state.
#[async_trait]
pub trait ProgressCallback: Send + Sync {
    async fn on_progress(&self, bytes_so_far: u64, total_size: u64, label: &str);
}

#[async_trait]
impl<F> ProgressCallback for F
where
    F: Fn(u64, u64, &str) + Send + Sync,
{
    async fn on_progress(&self, bytes_so_far: u64, total_size: u64, label: &str) {
        self(bytes_so_far, total_size, label)
    }
}

#[derive(Debug, Clone, Copy)]
struct LabelState {
    started: Instant,
    last_percent: u64,
}

/// Writes throttled progress lines through the [`Logger`]: one line per
/// ten percent per label, plus a completion line with the average speed
pub struct ProgressTracker {
    output: Logger,
    labels: Mutex<HashMap<String, LabelState>>,
}

impl ProgressTracker {
    pub fn new(output: Logger) -> Self {
        Self {
            output,
            labels: Mutex::new(HashMap::new()),
        }
    }

    fn report(&self, bytes_so_far: u64, total_size: u64, label: &str) {
        let Ok(mut labels) = self.labels.lock() else {
            return;
        };
        let state = labels.entry(label.to_string()).or_insert(LabelState {
            started: Instant::now(),
            last_percent: 0,
        });

        if total_size == 0 {
            self.output
                .detail(&format!("{} {}", label, self.output.format_size(bytes_so_far)));
            return;
        }

        let percent = bytes_so_far.saturating_mul(100) / total_size;
        if bytes_so_far >= total_size {
            let elapsed = state.started.elapsed();
            let speed = if elapsed.as_secs() > 0 {
                total_size / elapsed.as_secs()
            } else {
                total_size
            };
            self.output.progress(&format!(
                "{} 100% ({}) in {} ({})",
                label,
                self.output.format_size(total_size),
                self.output.format_duration(elapsed),
                self.output.format_speed(speed)
            ));
            labels.remove(label);
        } else if percent / 10 > state.last_percent / 10 {
            state.last_percent = percent;
            self.output.progress(&format!(
                "{} {}% ({}/{})",
                label,
                percent,
                self.output.format_size(bytes_so_far),
                self.output.format_size(total_size)
            ));
        }
    }
}

#[async_trait]
impl ProgressCallback for ProgressTracker {
    async fn on_progress(&self, bytes_so_far: u64, total_size: u64, label: &str) {
        self.report(bytes_so_far, total_size, label);
    }
}

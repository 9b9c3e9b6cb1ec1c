use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IngestError;

const DEFAULT_MAX_RETRIES: usize = 3;
const DEFAULT_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay_ms: DEFAULT_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay_ms: 0,
        }
    }

    pub fn run<T, F>(&self, label: &str, mut op: F) -> Result<T, IngestError>
    where
        F: FnMut() -> Result<T, IngestError>,
    {
        let mut attempt = 0usize;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt < self.max_retries && err.is_retryable() {
                        let delay = self.delay_ms * (attempt as u64 + 1);
                        warn!(
                            stage = label,
                            attempt = attempt + 1,
                            delay_ms = delay,
                            error = %err,
                            "retrying after failure"
                        );
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}

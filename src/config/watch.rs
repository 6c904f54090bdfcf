use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_CHANNEL_BUFFER;
use crate::constants::DEFAULT_MAX_WAIT_MS;
use crate::constants::DEFAULT_RETRY_DELAY_MS;
use crate::Error;
use crate::Result;

/// Long-poll behaviour shared by all watch loops
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchConfig {
    /// Upper bound the registry may hold a blocking query open (unit: milliseconds)
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,

    /// Pause before retrying after a 5xx (unit: milliseconds). 0 retries immediately.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Capacity of the observation and snapshot channels
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: default_max_wait_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_wait_ms == 0 {
            return Err(Error::InvalidConfig("watch.max_wait_ms must be greater than 0".into()));
        }
        if self.channel_buffer == 0 {
            return Err(Error::InvalidConfig(
                "watch.channel_buffer must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    /// `None` when server errors should be retried without pausing
    pub fn retry_delay(&self) -> Option<Duration> {
        (self.retry_delay_ms > 0).then(|| Duration::from_millis(self.retry_delay_ms))
    }
}

fn default_max_wait_ms() -> u64 {
    DEFAULT_MAX_WAIT_MS
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
fn default_channel_buffer() -> usize {
    DEFAULT_CHANNEL_BUFFER
}

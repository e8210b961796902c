use crate::common::{DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_SIZE};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// How `seek` is honoured.
///
/// 定义 `seek` 的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SeekMode {
    /// Cancel the source and reopen it at the target offset with a range request.
    ///
    /// 取消数据源并通过 Range 请求在目标偏移处重新打开。
    #[default]
    RangeRestart,
    /// Accept every seek but keep reading sequentially. For transports without
    /// range support; byte-accurate seeking is silently unavailable.
    ///
    /// 接受所有 seek 但继续顺序读取。适用于不支持 Range 的传输层。
    Streaming,
}

pub(crate) struct ConfigIndex {
    pub seek_mode: SeekMode,
    pub capacity: usize,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub stall_deadline: Option<Duration>,
    pub read_size: usize,
}

impl Default for ConfigIndex {
    fn default() -> Self {
        Self {
            seek_mode: SeekMode::RangeRestart,
            capacity: DEFAULT_QUEUE_CAPACITY,
            high_watermark: 0.8,
            low_watermark: 0.5,
            stall_deadline: None,
            read_size: DEFAULT_READ_SIZE,
        }
    }
}

/// Shared, immutable loader configuration.
#[derive(Clone, Default)]
pub struct LoaderConfig {
    index: Arc<ConfigIndex>,
}

impl LoaderConfig {
    pub fn seek_mode(&self) -> SeekMode {
        self.index.seek_mode
    }

    /// Queue capacity in bytes for the free-running producer.
    pub fn capacity(&self) -> usize {
        self.index.capacity
    }

    /// Occupancy in bytes at or above which ingestion pauses.
    pub fn high_watermark(&self) -> usize {
        (self.index.capacity as f64 * self.index.high_watermark) as usize
    }

    /// Occupancy in bytes below which paused ingestion resumes.
    pub fn low_watermark(&self) -> usize {
        (self.index.capacity as f64 * self.index.low_watermark) as usize
    }

    pub fn stall_deadline(&self) -> Option<Duration> {
        self.index.stall_deadline
    }

    pub fn read_size(&self) -> usize {
        self.index.read_size
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConfigBuilder {
    pub seek_mode: SeekMode,
    pub capacity: usize,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub stall_deadline: Option<Duration>,
    pub read_size: usize,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let defaults = ConfigIndex::default();
        Self {
            seek_mode: defaults.seek_mode,
            capacity: defaults.capacity,
            high_watermark: defaults.high_watermark,
            low_watermark: defaults.low_watermark,
            stall_deadline: defaults.stall_deadline,
            read_size: defaults.read_size,
        }
    }

    pub fn set_seek_mode(mut self, seek_mode: SeekMode) -> Self {
        self.seek_mode = seek_mode;
        self
    }

    pub fn set_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets both watermarks as fractions of the capacity.
    pub fn set_watermarks(mut self, low: f64, high: f64) -> Self {
        self.low_watermark = low;
        self.high_watermark = high;
        self
    }

    pub fn set_stall_deadline(mut self, deadline: Duration) -> Self {
        self.stall_deadline = Some(deadline);
        self
    }

    pub fn set_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size;
        self
    }

    pub fn build(self) -> Result<LoaderConfig> {
        if !(0.0 < self.low_watermark
            && self.low_watermark < self.high_watermark
            && self.high_watermark <= 1.0)
        {
            return Err(Error::Config(format!(
                "watermarks must satisfy 0 < low < high <= 1, got low={} high={}",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.capacity == 0 {
            return Err(Error::Config("queue capacity must be non-zero".into()));
        }
        if self.read_size == 0 {
            return Err(Error::Config("read size must be non-zero".into()));
        }

        let config = LoaderConfig {
            index: Arc::new(ConfigIndex {
                seek_mode: self.seek_mode,
                capacity: self.capacity,
                high_watermark: self.high_watermark,
                low_watermark: self.low_watermark,
                stall_deadline: self.stall_deadline,
                read_size: self.read_size,
            }),
        };
        // The gate works on whole bytes; tiny capacities round the marks together.
        let (low, high) = (config.low_watermark(), config.high_watermark());
        if !(0 < low && low < high) {
            return Err(Error::Config(format!(
                "capacity {} gives byte watermarks low={low} high={high}, need 0 < low < high",
                self.capacity
            )));
        }
        Ok(config)
    }
}

use crate::common::config::LoaderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Paused,
}

/// Hysteresis between two occupancy watermarks.
///
/// Ingestion pauses once occupancy reaches the high watermark and resumes
/// only after it has dropped below the low watermark.
///
/// 基于高低水位的滞回控制：占用达到高水位时暂停，降到低水位以下时恢复。
#[derive(Debug, Clone)]
pub struct BackpressureGate {
    low: usize,
    high: usize,
    paused: bool,
}

impl BackpressureGate {
    /// `low < high` is checked by [`ConfigBuilder::build`](crate::ConfigBuilder::build).
    pub fn new(low: usize, high: usize) -> Self {
        Self {
            low,
            high,
            paused: false,
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(config.low_watermark(), config.high_watermark())
    }

    /// Updates the gate with the current occupancy in bytes.
    pub fn observe(&mut self, occupancy: usize) -> GateState {
        if self.paused {
            if occupancy < self.low {
                self.paused = false;
            }
        } else if occupancy >= self.high {
            self.paused = true;
        }
        self.state()
    }

    pub fn state(&self) -> GateState {
        if self.paused {
            GateState::Paused
        } else {
            GateState::Open
        }
    }

    pub fn reset(&mut self) {
        self.paused = false;
    }
}

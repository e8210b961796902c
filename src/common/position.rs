/// The absolute raw read cursor of a stream.
///
/// Counts bytes consumed from the source, not bytes emitted to the consumer;
/// the two differ whenever data is parked in the alignment buffer.
///
/// 流的绝对原始读取游标。统计从数据源消费的字节数，而非交付给消费者的字节数。
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PositionTracker {
    position: u64,
}

impl PositionTracker {
    pub fn new(position: u64) -> Self {
        Self { position }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn advance(&mut self, n: u64) {
        self.position += n;
    }

    /// Moves the cursor to `to`. Only the seek protocol calls this.
    pub fn reset(&mut self, to: u64) {
        self.position = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_and_reset() {
        let mut tracker = PositionTracker::new(512);
        tracker.advance(300);
        tracker.advance(9000);
        assert_eq!(tracker.position(), 9812);

        tracker.reset(0);
        assert_eq!(tracker.position(), 0);
    }
}

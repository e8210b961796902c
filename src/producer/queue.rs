use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

use super::gate::{BackpressureGate, GateState};
use crate::error::{Error, Result};

#[derive(Default)]
struct QueueState {
    chunks: VecDeque<Bytes>,
    error: Option<Error>,
    occupancy: usize,
    closed: bool,
    generation: u64,
    reader: Option<Waker>,
}

impl QueueState {
    fn wake_reader(&mut self) {
        if let Some(waker) = self.reader.take() {
            waker.wake();
        }
    }
}

/// The byte queue between the producer task and the consumer.
///
/// Capacity is a soft bound enforced by the producer through its
/// [`BackpressureGate`]; pushes themselves never block or drop data.
///
/// 生产者任务与消费者之间的字节队列。容量由生产者通过水位门控来约束，入队本身从不阻塞也不丢弃数据。
pub struct BoundedQueue {
    state: Mutex<QueueState>,
    capacity: usize,
    drained: Notify,
}

impl BoundedQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity,
            drained: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently queued and not yet taken by the consumer.
    pub fn occupancy(&self) -> usize {
        self.lock().occupancy
    }

    pub fn usage_percent(&self) -> f64 {
        self.occupancy() as f64 * 100.0 / self.capacity as f64
    }

    /// Bumped by every [`reset`](Self::reset).
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub(crate) fn push(&self, chunk: Bytes) {
        let mut state = self.lock();
        state.occupancy += chunk.len();
        state.chunks.push_back(chunk);
        state.wake_reader();
    }

    /// Queues a terminal error behind the data already queued.
    pub(crate) fn fail(&self, err: Error) {
        let mut state = self.lock();
        state.error = Some(err);
        state.closed = true;
        state.wake_reader();
    }

    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.wake_reader();
    }

    /// Discards everything queued and starts a new generation.
    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        state.chunks.clear();
        state.error = None;
        state.occupancy = 0;
        state.closed = false;
        state.generation += 1;
        state.wake_reader();
        drop(state);
        self.drained.notify_one();
    }

    /// Takes the next chunk, the terminal error, or `None` at the end.
    pub fn poll_pop(&self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes>>> {
        let mut state = self.lock();
        if let Some(chunk) = state.chunks.pop_front() {
            state.occupancy -= chunk.len();
            drop(state);
            self.drained.notify_one();
            return Poll::Ready(Some(Ok(chunk)));
        }
        if let Some(err) = state.error.take() {
            return Poll::Ready(Some(Err(err)));
        }
        if state.closed {
            return Poll::Ready(None);
        }
        state.reader = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Waits until the gate reopens, or fails with `Stalled` once `deadline`
    /// has passed.
    pub(crate) async fn wait_for_room(
        &self,
        gate: &mut BackpressureGate,
        deadline: Option<Duration>,
    ) -> Result<()> {
        let wait = async {
            while gate.observe(self.occupancy()) == GateState::Paused {
                self.drained.notified().await;
            }
        };
        match deadline {
            None => {
                wait.await;
                Ok(())
            }
            Some(deadline) => tokio::time::timeout(deadline, wait)
                .await
                .map_err(|_| Error::Stalled { waited: deadline }),
        }
    }
}

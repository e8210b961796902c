//! Free-running mode: a background task pulls decrypted bytes from a loader
//! into a bounded queue ahead of the consumer.
//!
//! 自由运行模式：后台任务提前将加载器的解密数据拉入有界队列，供消费者读取。

pub mod gate;
pub mod queue;

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{ready, Stream};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::common::buffer::BufferPool;
use crate::common::config::LoaderConfig;
use crate::error::{Error, Result};
use crate::loader::Loader;

pub use gate::{BackpressureGate, GateState};
pub use queue::BoundedQueue;

enum Command {
    Seek {
        offset: u64,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Spawns the background task driving an opened [`Loader`].
pub struct Producer;

impl Producer {
    /// Moves `loader` onto a tokio task. Must be called inside a runtime.
    ///
    /// 将加载器移入 tokio 任务。必须在运行时内调用。
    pub fn spawn<L>(loader: L, config: LoaderConfig) -> (ProducerHandle, QueueReader)
    where
        L: Loader + 'static,
    {
        let queue = Arc::new(BoundedQueue::new(config.capacity()));
        let pool = Arc::new(BufferPool::new(config.read_size()));
        let (commands, receiver) = mpsc::channel(8);

        let worker = Worker {
            loader,
            queue: Arc::clone(&queue),
            pool: Arc::clone(&pool),
            gate: BackpressureGate::from_config(&config),
            commands: receiver,
            config,
            finished: false,
        };
        let task = tokio::spawn(worker.run());

        let handle = ProducerHandle {
            commands,
            queue: Arc::clone(&queue),
            task,
        };
        let reader = QueueReader {
            queue,
            pool,
            current: Bytes::new(),
            cursor: 0,
            generation: 0,
        };
        (handle, reader)
    }
}

struct Worker<L> {
    loader: L,
    queue: Arc<BoundedQueue>,
    pool: Arc<BufferPool>,
    gate: BackpressureGate,
    commands: mpsc::Receiver<Command>,
    config: LoaderConfig,
    finished: bool,
}

impl<L: Loader> Worker<L> {
    async fn run(mut self) {
        loop {
            // Commands take priority over ingestion.
            let command = if self.finished {
                match self.commands.recv().await {
                    Some(command) => command,
                    None => break,
                }
            } else {
                match self.commands.try_recv() {
                    Ok(command) => command,
                    Err(mpsc::error::TryRecvError::Disconnected) => break,
                    Err(mpsc::error::TryRecvError::Empty) => {
                        match self.ingest().await {
                            Some(command) => command,
                            None => continue,
                        }
                    }
                }
            };
            self.handle(command).await;
        }
        self.loader.stop();
        debug!("producer finished");
    }

    /// Reads one chunk into the queue, or waits for room when the gate is
    /// closed. Returns a command that arrived while waiting.
    async fn ingest(&mut self) -> Option<Command> {
        if self.gate.observe(self.queue.occupancy()) == GateState::Paused {
            debug!(occupancy = self.queue.occupancy(), "pausing ingestion");
            let deadline = self.config.stall_deadline();
            let waited = tokio::select! {
                biased;
                command = self.commands.recv() => return command,
                waited = self.queue.wait_for_room(&mut self.gate, deadline) => waited,
            };
            match waited {
                Ok(()) => debug!(occupancy = self.queue.occupancy(), "resuming ingestion"),
                Err(err) => {
                    warn!(%err, "consumer stalled, giving up");
                    self.queue.fail(err);
                    self.finished = true;
                }
            }
            return None;
        }

        let mut buf = self.pool.acquire();
        match self.loader.read(&mut buf).await {
            Ok(0) => {
                debug!("loader reached end of stream");
                self.queue.close();
                self.finished = true;
            }
            Ok(n) => {
                buf.truncate(n);
                self.queue.push(buf.freeze());
            }
            Err(err) => {
                warn!(%err, "loader read failed");
                self.queue.fail(err);
                self.finished = true;
            }
        }
        None
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Seek { offset, reply } => {
                let result = self.loader.seek(offset).await;
                self.queue.reset();
                self.gate.reset();
                self.finished = false;
                debug!(offset, ok = result.is_ok(), "producer seek");
                let _ = reply.send(result);
            }
        }
    }
}

/// Control side of a running producer.
///
/// Dropping the handle aborts the task, which releases the loader.
pub struct ProducerHandle {
    commands: mpsc::Sender<Command>,
    queue: Arc<BoundedQueue>,
    task: JoinHandle<()>,
}

impl ProducerHandle {
    /// Seeks the loader and discards everything queued before the seek.
    pub async fn seek(&self, offset: u64) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Seek { offset, reply })
            .await
            .map_err(|_| Error::Stopped)?;
        response.await.map_err(|_| Error::Stopped)?
    }

    pub fn occupancy(&self) -> usize {
        self.queue.occupancy()
    }

    pub fn usage_percent(&self) -> f64 {
        self.queue.usage_percent()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Aborts the task and waits until the loader has been dropped.
    pub async fn stop(&mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Consumer side of a running producer, readable as [`AsyncRead`] or as a
/// [`Stream`] of chunks.
///
/// 运行中生产者的消费端，可作为 `AsyncRead` 或数据块 `Stream` 读取。
pub struct QueueReader {
    queue: Arc<BoundedQueue>,
    pool: Arc<BufferPool>,
    current: Bytes,
    cursor: usize,
    generation: u64,
}

impl QueueReader {
    pub fn queue(&self) -> &BoundedQueue {
        &self.queue
    }

    /// Drops a partially read chunk that predates the latest seek.
    fn sync_generation(&mut self) {
        let generation = self.queue.generation();
        if generation != self.generation {
            self.generation = generation;
            self.current = Bytes::new();
            self.cursor = 0;
        }
    }

    fn recycle_current(&mut self) {
        let chunk = std::mem::take(&mut self.current);
        self.cursor = 0;
        self.pool.recycle(chunk);
    }
}

impl AsyncRead for QueueReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.sync_generation();

        while this.cursor >= this.current.len() {
            this.recycle_current();
            match ready!(this.queue.poll_pop(cx)) {
                Some(Ok(chunk)) => this.current = chunk,
                Some(Err(err)) => return Poll::Ready(Err(err.into())),
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = (this.current.len() - this.cursor).min(buf.remaining());
        buf.put_slice(&this.current[this.cursor..this.cursor + n]);
        this.cursor += n;
        if this.cursor == this.current.len() {
            this.recycle_current();
        }
        Poll::Ready(Ok(()))
    }
}

impl Stream for QueueReader {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.sync_generation();

        if this.cursor < this.current.len() {
            let rest = this.current.slice(this.cursor..);
            this.current = Bytes::new();
            this.cursor = 0;
            return Poll::Ready(Some(Ok(rest)));
        }
        this.queue.poll_pop(cx)
    }
}

use bytes::{Bytes, BytesMut};
use crossbeam_channel::{bounded, Receiver, Sender};

// Enough for a full queue of default-sized chunks to cycle without allocating.
const POOL_SIZE: usize = 16;

/// Recycles the chunk buffers the producer reads decrypted bytes into.
///
/// Chunks travel through the queue as frozen `Bytes`; once the consumer has
/// read a chunk completely and holds the only reference, its allocation comes
/// back here.
///
/// 回收生产者读取解密数据所用的块缓冲区。
pub struct BufferPool {
    free: Receiver<BytesMut>,
    returner: Sender<BytesMut>,
    chunk_size: usize,
}

impl BufferPool {
    pub fn new(chunk_size: usize) -> Self {
        let (returner, free) = bounded(POOL_SIZE);
        for _ in 0..POOL_SIZE {
            let _ = returner.try_send(BytesMut::with_capacity(chunk_size));
        }
        Self {
            free,
            returner,
            chunk_size,
        }
    }

    /// Takes a zero-filled buffer of `chunk_size` bytes, allocating when the
    /// pool is empty. Never blocks, since the caller is an async task.
    pub fn acquire(&self) -> BytesMut {
        let mut buf = self
            .free
            .try_recv()
            .unwrap_or_else(|_| BytesMut::with_capacity(self.chunk_size));
        buf.resize(self.chunk_size, 0);
        buf
    }

    /// Returns a fully consumed chunk if nobody else still references it.
    pub fn recycle(&self, chunk: Bytes) {
        let Ok(mut buf) = chunk.try_into_mut() else {
            return;
        };
        if buf.capacity() < self.chunk_size {
            return;
        }
        buf.clear();
        // A full pool lets the buffer go.
        let _ = self.returner.try_send(buf);
    }
}

use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use crate::data::batch::Minibatch;
use crate::data::stream::DataStream;
use crate::error::{Result, TrainError};

/// Runs an infinite stream on a worker thread, keeping up to `depth`
/// minibatches decoded ahead of the trainer.
///
/// The worker exits on its own once this handle is dropped (its next send
/// fails), so no explicit shutdown is needed.
pub struct PrefetchStream {
    rx: Receiver<Result<Minibatch>>,
    size: usize,
    worker: Option<JoinHandle<()>>,
}

impl PrefetchStream {
    pub fn spawn<S>(mut stream: S, depth: usize) -> Self
    where
        S: DataStream + Send + 'static,
    {
        let size = stream.size();
        let (tx, rx) = mpsc::sync_channel(depth.max(1));
        let worker = thread::Builder::new()
            .name("prefetch".into())
            .spawn(move || loop {
                let item = match stream.next_batch() {
                    Ok(Some(batch)) => Ok(batch),
                    Ok(None) => break,
                    Err(e) => Err(e),
                };
                let failed = item.is_err();
                if tx.send(item).is_err() || failed {
                    break;
                }
            })
            .ok();
        Self { rx, size, worker }
    }
}

impl DataStream for PrefetchStream {
    fn next_batch(&mut self) -> Result<Option<Minibatch>> {
        match self.rx.recv() {
            Ok(item) => item.map(Some),
            Err(_) if self.worker.is_none() => {
                Err(TrainError::dataset("prefetch worker could not be started"))
            }
            Err(_) => Ok(None),
        }
    }

    fn size(&self) -> usize {
        self.size
    }

    /// Prefetching is only used for looping training streams, which have no
    /// meaningful restart; this is a no-op.
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batch::ImageBatch;

    struct Counting {
        next: usize,
        limit: usize,
    }

    impl DataStream for Counting {
        fn next_batch(&mut self) -> Result<Option<Minibatch>> {
            if self.next == self.limit {
                return Ok(None);
            }
            self.next += 1;
            Ok(Some(Minibatch {
                labels: vec![self.next],
                images: ImageBatch::new(1, 1, 1, 1, vec![0.0]),
            }))
        }

        fn size(&self) -> usize {
            self.limit
        }

        fn reset(&mut self) {
            self.next = 0;
        }
    }

    #[test]
    fn preserves_order() {
        let mut stream = PrefetchStream::spawn(Counting { next: 0, limit: 5 }, 2);
        assert_eq!(stream.size(), 5);
        let mut labels = Vec::new();
        while let Some(b) = stream.next_batch().unwrap() {
            labels.extend(b.labels);
        }
        assert_eq!(labels, vec![1, 2, 3, 4, 5]);
    }
}

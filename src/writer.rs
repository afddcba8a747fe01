//! Sink writer
//!
//! Drains the sample queue to the output in arrival order. Keeps looping
//! until the producer has finished AND the queue is empty, so a stopped
//! session flushes everything the driver callback pushed. The producer flag
//! is separate from the running flag: a callback that saw `running` just
//! before it was cleared may still push one chunk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::{CaptureError, Result};
use crate::monitor::CaptureStats;
use crate::queue::SampleQueue;

/// Bounded wait per pop, so the loop notices the producer finishing.
pub const POP_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Writer<'a> {
    queue: &'a SampleQueue,
    stats: &'a CaptureStats,
    /// Cleared on a sink failure so the producer stops
    running: &'a AtomicBool,
    /// True until the driver callback can no longer push
    producing: &'a AtomicBool,
}

impl<'a> Writer<'a> {
    pub fn new(
        queue: &'a SampleQueue,
        stats: &'a CaptureStats,
        running: &'a AtomicBool,
        producing: &'a AtomicBool,
    ) -> Self {
        Self {
            queue,
            stats,
            running,
            producing,
        }
    }

    /// Open `path` and drain into it. Failing to open or write the file
    /// clears the running flag so the producer stops.
    pub fn run_to_file(&self, path: &Path) -> Result<u64> {
        let file = match File::create(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Cannot open output file {}: {}", path.display(), e);
                self.running.store(false, Ordering::Release);
                return Err(CaptureError::io(path, e));
            }
        };
        info!("Writing raw cu8 samples to {}", path.display());

        let mut sink = BufWriter::new(file);
        let written = self.drain_into(&mut sink, path)?;

        sink.flush().map_err(|e| {
            self.running.store(false, Ordering::Release);
            CaptureError::io(path, e)
        })?;
        Ok(written)
    }

    /// Drain loop over any sink. `label` names the sink in errors.
    pub fn drain_into<W: Write>(&self, sink: &mut W, label: &Path) -> Result<u64> {
        let mut written = 0u64;
        let mut chunks = 0u64;

        while self.producing.load(Ordering::Acquire) || self.queue.depth() > 0 {
            let Some(chunk) = self.queue.pop(POP_TIMEOUT) else {
                continue;
            };

            if let Err(e) = sink.write_all(chunk.as_bytes()) {
                error!("Write to {} failed: {}", label.display(), e);
                self.running.store(false, Ordering::Release);
                return Err(CaptureError::io(PathBuf::from(label), e));
            }

            written += chunk.len() as u64;
            chunks += 1;
            self.stats.record_written(chunk.len());
        }

        debug!("Writer drained {} chunks ({} bytes)", chunks, written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::SampleChunk;
    use std::io;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn chunks() -> Vec<Vec<u8>> {
        (0..50u8)
            .map(|i| (0..(i as usize * 7 + 1)).map(|j| i ^ j as u8).collect())
            .collect()
    }

    #[test]
    fn test_drains_queue_after_stop() {
        let queue = SampleQueue::default();
        let stats = CaptureStats::new();
        let running = AtomicBool::new(false);
        let producing = AtomicBool::new(false);
        let expected = chunks();
        for c in &expected {
            queue.push(SampleChunk::from_slice(c));
        }

        // producer already finished before the writer ever runs
        let writer = Writer::new(&queue, &stats, &running, &producing);
        let mut sink = Vec::new();
        let written = writer.drain_into(&mut sink, Path::new("memory")).unwrap();

        assert_eq!(sink, expected.concat());
        assert_eq!(written, sink.len() as u64);
        assert_eq!(stats.get_bytes_written(), written);
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn test_no_loss_with_concurrent_producer() {
        let queue = Arc::new(SampleQueue::new(4));
        let stats = CaptureStats::new();
        let running = AtomicBool::new(true);
        let producing = Arc::new(AtomicBool::new(true));
        let expected = chunks();

        let producer = {
            let queue = queue.clone();
            let producing = producing.clone();
            let expected = expected.clone();
            thread::spawn(move || {
                for c in &expected {
                    queue.push(SampleChunk::from_slice(c));
                    thread::sleep(Duration::from_millis(1));
                }
                producing.store(false, Ordering::Release);
            })
        };

        let writer = Writer::new(&queue, &stats, &running, &producing);
        let mut sink = Vec::new();
        writer.drain_into(&mut sink, Path::new("memory")).unwrap();
        producer.join().unwrap();

        assert_eq!(sink, expected.concat());
    }

    #[test]
    fn test_keeps_draining_after_running_clears() {
        let queue = SampleQueue::default();
        let stats = CaptureStats::new();
        let running = AtomicBool::new(false);
        let producing = AtomicBool::new(true);

        let sink = thread::scope(|s| {
            let handle = s.spawn(|| {
                let mut sink = Vec::new();
                Writer::new(&queue, &stats, &running, &producing)
                    .drain_into(&mut sink, Path::new("memory"))
                    .map(|_| sink)
            });
            // an empty queue with running cleared for several pop timeouts
            thread::sleep(POP_TIMEOUT * 3);
            queue.push(SampleChunk::from_slice(&[1, 2, 3, 4]));
            producing.store(false, Ordering::Release);
            handle.join().unwrap().unwrap()
        });

        assert_eq!(sink, vec![1, 2, 3, 4]);
        assert_eq!(stats.get_bytes_written(), 4);
    }

    #[test]
    fn test_exits_promptly_when_idle_and_finished() {
        let queue = SampleQueue::default();
        let stats = CaptureStats::new();
        let running = AtomicBool::new(true);
        let producing = AtomicBool::new(true);

        thread::scope(|s| {
            let handle = s.spawn(|| {
                Writer::new(&queue, &stats, &running, &producing)
                    .drain_into(&mut io::sink(), Path::new("null"))
            });
            thread::sleep(Duration::from_millis(50));
            let stopped = Instant::now();
            producing.store(false, Ordering::Release);
            handle.join().unwrap().unwrap();
            assert!(stopped.elapsed() < Duration::from_millis(500));
        });
    }

    #[test]
    fn test_write_failure_stops_session() {
        let queue = SampleQueue::default();
        let stats = CaptureStats::new();
        let running = AtomicBool::new(true);
        let producing = AtomicBool::new(true);
        queue.push(SampleChunk::from_slice(&[1, 2, 3, 4]));

        let err = Writer::new(&queue, &stats, &running, &producing)
            .drain_into(&mut FailingSink, Path::new("/dev/full"))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Io { .. }));
        assert!(!running.load(Ordering::Acquire));
    }

    #[test]
    fn test_run_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let queue = SampleQueue::default();
        let stats = CaptureStats::new();
        let running = AtomicBool::new(false);
        let producing = AtomicBool::new(false);
        queue.push(SampleChunk::from_slice(&[10, 20, 30, 40]));
        queue.push(SampleChunk::from_slice(&[50, 60]));

        let written = Writer::new(&queue, &stats, &running, &producing)
            .run_to_file(&path)
            .unwrap();
        assert_eq!(written, 6);
        assert_eq!(std::fs::read(&path).unwrap(), vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_unopenable_sink_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("capture.bin");
        let queue = SampleQueue::default();
        let stats = CaptureStats::new();
        let running = AtomicBool::new(true);
        let producing = AtomicBool::new(true);

        let err = Writer::new(&queue, &stats, &running, &producing)
            .run_to_file(&path)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Io { .. }));
        assert!(!running.load(Ordering::Acquire));
    }
}

//! Background reader
//!
//! One thread per connection pulls lines off the read half of the link,
//! decodes them and files them in the [`ResponseRegistry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::Span;

use super::frame::decode_reply;
use super::{LineReader, ResponseRegistry, Transport};

/// Handle on the running reader thread
pub struct ReaderTask {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReaderTask {
    /// Start reading. `poll_interval` bounds how long a stop request can go
    /// unnoticed.
    pub fn spawn(
        reader: LineReader,
        transport: Arc<Transport>,
        registry: Arc<ResponseRegistry>,
        poll_interval: Duration,
        span: Span,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = thread::Builder::new()
            .name("isotope-reader".to_string())
            .spawn(move || run(reader, &transport, &registry, &flag, poll_interval, &span))?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait for it. No insert happens after this returns.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    mut reader: LineReader,
    transport: &Transport,
    registry: &ResponseRegistry,
    stop: &AtomicBool,
    poll_interval: Duration,
    span: &Span,
) {
    tracing::debug!(parent: span, "reader started");

    while !stop.load(Ordering::SeqCst) {
        match reader.read_line(poll_interval) {
            Ok(Some(line)) => {
                if line.is_empty() {
                    continue;
                }
                tracing::trace!(parent: span, "Incoming << {}", line);
                match decode_reply(&line) {
                    Some(reply) => {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        registry.insert(reply);
                    }
                    None => {
                        tracing::warn!(parent: span, "Response is not a valid JSON format: {}", line)
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                if !transport.is_open() {
                    break;
                }
                tracing::warn!(parent: span, "read failed: {}", e);
                // The link may stay broken; do not spin on it
                thread::sleep(poll_interval);
            }
        }
    }

    tracing::debug!(parent: span, "reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ReplyStatus;
    use crate::sim::SimulatedBoard;
    use std::time::Instant;

    fn start() -> (
        Arc<Transport>,
        Arc<ResponseRegistry>,
        ReaderTask,
        crate::sim::SimulatedBoardHandle,
    ) {
        let transport = Arc::new(Transport::new(Span::none()));
        let (board, handle) = SimulatedBoard::new();
        transport
            .attach(Box::new(board), Duration::from_millis(5))
            .unwrap();
        let registry = Arc::new(ResponseRegistry::new());
        let task = ReaderTask::spawn(
            transport.take_reader().unwrap(),
            transport.clone(),
            registry.clone(),
            Duration::from_millis(5),
            Span::none(),
        )
        .unwrap();
        (transport, registry, task, handle)
    }

    #[test]
    fn test_reader_files_replies() {
        let (_transport, registry, mut task, handle) = start();
        handle.inject_raw("{\"seq\":12,\"payload\":\"7\",\"error\":\"SUC\"}\n");
        handle.inject_raw("{\"seq\":13,\"payload\":\"\"}\n");
        handle.inject_raw("garbage\n");

        let reply = registry.take_blocking(12, Duration::from_secs(1)).unwrap();
        assert_eq!(reply.payload_int(), Some(7));
        let malformed = registry.take_blocking(13, Duration::from_secs(1)).unwrap();
        assert_eq!(malformed.status, ReplyStatus::MalformedFrame);

        task.stop();
        assert!(!task.is_running());
    }

    #[test]
    fn test_stop_is_prompt_and_final() {
        let (transport, registry, mut task, handle) = start();
        assert!(task.is_running());

        let start = Instant::now();
        task.stop();
        assert!(start.elapsed() < Duration::from_millis(500));

        handle.inject_raw("{\"seq\":1,\"payload\":\"\",\"error\":\"SUC\"}\n");
        std::thread::sleep(Duration::from_millis(30));
        assert!(registry.is_empty());

        // Stopping twice is harmless
        task.stop();
        transport.close();
    }
}

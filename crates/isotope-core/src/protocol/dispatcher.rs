//! Command dispatch
//!
//! Allocates sequence numbers, writes commands and (optionally) waits for the
//! reply carrying the same sequence.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::Span;

use super::frame::encode_command;
use super::{Command, Reply, ReplyStatus, ResponseRegistry, Result, Section, Transport};

/// Sends commands to the board and correlates replies
pub struct Dispatcher {
    transport: Arc<Transport>,
    registry: Arc<ResponseRegistry>,
    sequence: AtomicU16,
    response_timeout: Duration,
    last_sent: Mutex<Option<Instant>>,
    span: Span,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<Transport>,
        registry: Arc<ResponseRegistry>,
        response_timeout: Duration,
        span: Span,
    ) -> Self {
        Self {
            transport,
            registry,
            sequence: AtomicU16::new(0),
            response_timeout,
            last_sent: Mutex::new(None),
            span,
        }
    }

    /// Write a command without waiting, returning its sequence number.
    ///
    /// The reply (or replies) can be collected later with
    /// [`try_take`](Self::try_take) or [`take`](Self::take).
    pub fn send(&self, command: &Command) -> Result<u16> {
        let sequence = self.transport.write_line_with(|| {
            // Wraps to 0 after 65535
            let seq = self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
            // A wrapped number may still carry state from its last use
            self.registry.arm(seq);
            (seq, encode_command(seq, command))
        })?;

        if let Ok(mut last) = self.last_sent.lock() {
            *last = Some(Instant::now());
        }
        Ok(sequence)
    }

    /// Write a command whose reply nobody will read (heartbeats)
    pub fn send_unacknowledged(&self, command: &Command) -> Result<u16> {
        let sequence = self.send(command)?;
        self.registry.ignore(sequence);
        Ok(sequence)
    }

    /// Write a command and block for its first reply.
    ///
    /// Waits at most the response timeout. A missing reply comes back as an
    /// `Errored(Timeout)` reply, not as an error; only link failures are `Err`.
    pub fn request(&self, command: &Command) -> Result<Reply> {
        let sequence = self.send(command)?;
        let reply = match self.registry.take_blocking(sequence, self.response_timeout) {
            Some(reply) => reply,
            None => {
                self.registry.ignore(sequence);
                Reply::timeout(sequence)
            }
        };
        self.report(command.section, command.item, &reply);
        Ok(reply)
    }

    /// Non-blocking take of whatever arrived for `sequence`
    pub fn try_take(&self, sequence: u16) -> Option<Reply> {
        self.registry.try_take(sequence)
    }

    /// Blocking take with an explicit timeout
    pub fn take(&self, sequence: u16, timeout: Duration) -> Option<Reply> {
        self.registry.take_blocking(sequence, timeout)
    }

    /// Stop tracking `sequence`; its replies are dropped until it is reused
    pub fn forget(&self, sequence: u16) {
        self.registry.ignore(sequence);
    }

    /// Log a reply that did not succeed, keyed off its status code
    pub fn report(&self, section: Section, item: usize, reply: &Reply) {
        let section = section.tag();
        match &reply.status {
            ReplyStatus::Succeeded | ReplyStatus::Acknowledged | ReplyStatus::Aborted => {}
            ReplyStatus::Errored(kind) if kind == &super::ErrorKind::Timeout => {
                tracing::warn!(
                    parent: &self.span,
                    seq = reply.sequence,
                    section,
                    item,
                    "{}",
                    kind.message()
                );
            }
            ReplyStatus::Errored(kind) => {
                tracing::error!(
                    parent: &self.span,
                    seq = reply.sequence,
                    section,
                    item,
                    code = kind.code(),
                    "{}",
                    kind.message()
                );
            }
            ReplyStatus::MalformedFrame => {
                tracing::error!(
                    parent: &self.span,
                    seq = reply.sequence,
                    section,
                    item,
                    "Incoming message error - Response is not a valid JSON format"
                );
            }
        }
    }

    /// Time since the last command went out, `None` if nothing was sent yet
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_sent
            .lock()
            .ok()
            .and_then(|last| last.map(|at| at.elapsed()))
    }

    /// Sequence number the next command will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence.load(Ordering::SeqCst).wrapping_add(1)
    }

    /// Restart numbering so the next command carries `last + 1`
    pub fn reset_sequence(&self, last: u16) {
        self.sequence.store(last, Ordering::SeqCst);
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_open()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorKind, ReaderTask};
    use crate::sim::{SimulatedBoard, SimulatedBoardHandle};
    use std::thread;

    struct Rig {
        dispatcher: Dispatcher,
        handle: SimulatedBoardHandle,
        _reader: ReaderTask,
    }

    fn rig(timeout: Duration) -> Rig {
        let transport = Arc::new(Transport::new(Span::none()));
        let (board, handle) = SimulatedBoard::new();
        transport
            .attach(Box::new(board), Duration::from_millis(5))
            .unwrap();
        let registry = Arc::new(ResponseRegistry::new());
        let reader = ReaderTask::spawn(
            transport.take_reader().unwrap(),
            transport.clone(),
            registry.clone(),
            Duration::from_millis(5),
            Span::none(),
        )
        .unwrap();
        Rig {
            dispatcher: Dispatcher::new(transport, registry, timeout, Span::none()),
            handle,
            _reader: reader,
        }
    }

    #[test]
    fn test_first_sequence_is_one() {
        let rig = rig(Duration::from_secs(1));
        assert_eq!(rig.dispatcher.idle_for(), None);
        let seq = rig
            .dispatcher
            .send(&Command::set(Section::Heartbeat, 0, 0))
            .unwrap();
        assert_eq!(seq, 1);
        assert!(rig.dispatcher.idle_for().is_some());
    }

    #[test]
    fn test_sequence_wraps() {
        let rig = rig(Duration::from_secs(1));
        rig.dispatcher.reset_sequence(65534);
        let cmd = Command::set(Section::Heartbeat, 0, 0);
        assert_eq!(rig.dispatcher.send(&cmd).unwrap(), 65535);
        assert_eq!(rig.dispatcher.send(&cmd).unwrap(), 0);
        assert_eq!(rig.dispatcher.send(&cmd).unwrap(), 1);
    }

    #[test]
    fn test_request_returns_matching_reply() {
        let rig = rig(Duration::from_secs(1));
        let reply = rig
            .dispatcher
            .request(&Command::set(Section::PowerOutput, 1, 512))
            .unwrap();
        assert_eq!(reply.sequence, 1);
        assert!(reply.is_succeeded());
    }

    #[test]
    fn test_request_times_out_with_synthetic_reply() {
        let rig = rig(Duration::from_millis(150));
        rig.handle.set_muted(true);

        let start = Instant::now();
        let reply = rig
            .dispatcher
            .request(&Command::get(Section::AnalogInput, 0))
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(reply.status, ReplyStatus::Errored(ErrorKind::Timeout));
        assert_eq!(reply.sequence, 1);
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[test]
    fn test_reused_sequence_after_timeout_gets_its_reply() {
        let rig = rig(Duration::from_millis(100));
        rig.handle.set_muted(true);
        let cmd = Command::get(Section::AnalogInput, 0);
        assert!(rig.dispatcher.request(&cmd).unwrap().is_timeout());

        rig.handle.set_muted(false);
        rig.dispatcher.reset_sequence(0);
        let reply = rig.dispatcher.request(&cmd).unwrap();
        assert_eq!(reply.sequence, 1);
        assert!(reply.is_succeeded(), "{}", reply.status);
    }

    #[test]
    fn test_stale_reply_is_not_handed_to_the_next_user() {
        let rig = rig(Duration::from_secs(1));
        // Unconsumed ACK left behind by an earlier use of sequence 1
        rig.handle
            .inject_reply(&Reply::new(1, "", ReplyStatus::Acknowledged));
        thread::sleep(Duration::from_millis(30));

        let reply = rig
            .dispatcher
            .request(&Command::get(Section::AnalogInput, 0))
            .unwrap();
        assert_eq!(reply.sequence, 1);
        assert_eq!(reply.status, ReplyStatus::Succeeded);
    }

    #[test]
    fn test_device_error_is_a_reply() {
        let rig = rig(Duration::from_secs(1));
        rig.handle.force_status(Section::PwmOutput, "ERR4");
        let reply = rig
            .dispatcher
            .request(&Command::set_values(Section::PwmOutput, 0, vec![2000, 0]))
            .unwrap();
        assert_eq!(
            reply.status,
            ReplyStatus::Errored(ErrorKind::ValueOutOfRange)
        );
    }

    #[test]
    fn test_write_failure_is_an_error() {
        let rig = rig(Duration::from_secs(1));
        rig.handle.set_fail_writes(true);
        let result = rig.dispatcher.request(&Command::get(Section::WhoIAm, 0));
        assert!(result.unwrap_err().is_transport());
    }
}

//! Temperature inputs (TEMP 0..2)
//!
//! A conversion takes a few milliseconds on the board, so reading is two
//! phase: the request is acknowledged at once and the value arrives later
//! under the same sequence number.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{Capability, Port, PortLink};
use crate::protocol::{Command, Dispatcher, IsotopeError, Reply, ReplyStatus, Result, Section};

/// How long [`TempInputPort::wait_and_retrieve_value`] waits by default
pub const DEFAULT_READING_TIMEOUT: Duration = Duration::from_secs(1);

const RETRIEVE_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reading {
    Idle,
    /// Acknowledged, value will arrive under this sequence
    Pending(u16),
    /// Board answered the request directly, degrees Celsius
    Ready(f64),
}

pub struct TempInputPort {
    link: PortLink,
    reading: Reading,
    reading_timeout: Duration,
}

impl TempInputPort {
    pub fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            link: PortLink::new(id, dispatcher),
            reading: Reading::Idle,
            reading_timeout: DEFAULT_READING_TIMEOUT,
        }
    }

    pub fn reading_timeout(&self) -> Duration {
        self.reading_timeout
    }

    pub fn set_reading_timeout(&mut self, timeout: Duration) {
        self.reading_timeout = timeout;
    }

    /// Whether a reading was requested and not yet retrieved
    pub fn is_requested(&self) -> bool {
        self.reading != Reading::Idle
    }

    /// Sequence the pending value will arrive under
    pub fn pending_sequence(&self) -> Option<u16> {
        match self.reading {
            Reading::Pending(sequence) => Some(sequence),
            _ => None,
        }
    }

    /// Ask the board to start a conversion
    pub fn request_reading(&mut self) -> Result<bool> {
        tracing::debug!(
            parent: self.link.dispatcher().span(),
            "Requesting value from temperature port {}",
            self.link.id()
        );
        if let Reading::Pending(previous) = self.reading {
            self.link.dispatcher().forget(previous);
        }
        self.reading = Reading::Idle;

        let reply = self
            .link
            .request(&Command::get(Section::TempSensor, self.link.id()))?;
        match reply.status {
            ReplyStatus::Acknowledged => {
                self.reading = Reading::Pending(reply.sequence);
                Ok(true)
            }
            ReplyStatus::Succeeded => match self.parse_reading(&reply) {
                Some(value) => {
                    self.reading = Reading::Ready(value);
                    Ok(true)
                }
                None => Ok(false),
            },
            _ => Ok(false),
        }
    }

    /// The requested value if it has arrived, without blocking
    pub fn retrieve_value(&mut self) -> Result<Option<f64>> {
        match self.reading {
            Reading::Idle => Err(IsotopeError::InvalidOperation(
                "value not requested, call request_reading first".to_string(),
            )),
            Reading::Ready(value) => {
                self.reading = Reading::Idle;
                Ok(Some(value))
            }
            Reading::Pending(sequence) => {
                let Some(reply) = self.link.dispatcher().try_take(sequence) else {
                    return Ok(None);
                };
                match reply.status {
                    ReplyStatus::Succeeded => {
                        self.reading = Reading::Idle;
                        Ok(self.parse_reading(&reply))
                    }
                    ReplyStatus::Acknowledged => Ok(None),
                    _ => {
                        // The conversion failed; nothing more will come
                        self.link
                            .dispatcher()
                            .report(Section::TempSensor, self.link.id(), &reply);
                        self.reading = Reading::Idle;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Poll [`retrieve_value`](Self::retrieve_value) until the value arrives
    /// or the reading timeout passes
    pub fn wait_and_retrieve_value(&mut self) -> Result<Option<f64>> {
        let start = Instant::now();
        loop {
            if let Some(value) = self.retrieve_value()? {
                return Ok(Some(value));
            }
            if !self.is_requested() {
                return Ok(None);
            }
            if start.elapsed() >= self.reading_timeout {
                tracing::warn!(
                    parent: self.link.dispatcher().span(),
                    "Timeout waiting for value from temperature port {}",
                    self.link.id()
                );
                if let Reading::Pending(sequence) = self.reading {
                    self.link.dispatcher().forget(sequence);
                }
                self.reading = Reading::Idle;
                return Ok(None);
            }
            thread::sleep(RETRIEVE_INTERVAL);
        }
    }

    fn parse_reading(&self, reply: &Reply) -> Option<f64> {
        let value = reply.payload_float();
        if value.is_none() {
            tracing::warn!(
                parent: self.link.dispatcher().span(),
                seq = reply.sequence,
                "Temperature port {} answered with a non-numeric reading {:?}",
                self.link.id(),
                reply.payload
            );
        }
        value
    }

    /// Request a reading and wait for it
    pub fn value(&mut self) -> Result<Option<f64>> {
        if !self.request_reading()? {
            return Ok(None);
        }
        self.wait_and_retrieve_value()
    }
}

impl Port for TempInputPort {
    const CAPABILITY: Capability = Capability::TempInput;

    fn id(&self) -> usize {
        self.link.id()
    }
}

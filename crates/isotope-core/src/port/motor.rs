//! Stepper motor ports (MOT 0..3)
//!
//! A motion command is acknowledged at once (`ACK`) and reports completion
//! later (`SUC` or `ABT`) under the same sequence number. The port keeps that
//! sequence while the motor is busy and checks for the completion without
//! blocking. If the notification does not show up within the busy-poll delay,
//! the port asks the board directly with `GET Motor_busy`, in case the
//! notification was lost.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::{Capability, Port, PortLink};
use crate::protocol::{
    Command, Dispatcher, IsotopeError, ReplyStatus, Result, Section, DEFAULT_BUSY_POLL_DELAY_MS,
};

/// Refresh rate of [`MotorPort::wait_until_motion_completed`] when 0 is given
pub const DEFAULT_REFRESH_HZ: u32 = 100;

/// Speed used when none was configured
pub const DEFAULT_RPM: i64 = 100;

fn check_non_negative(name: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(IsotopeError::InvalidArgument(format!(
            "{} must be a positive value, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Motion in progress
#[derive(Debug, Clone, Copy)]
struct Motion {
    /// Sequence of the `Motor_step` command
    sequence: u16,
    /// Pending `Motor_busy` query, if one was sent
    busy_query: Option<u16>,
    last_busy_poll: Instant,
}

pub struct MotorPort {
    link: PortLink,
    /// Step angle in degrees
    resolution: i64,
    current_milliamps: i64,
    rpm: i64,
    configure_requested: bool,
    configured: bool,
    enabled: bool,
    motion: Option<Motion>,
    busy_poll_delay: Duration,
}

impl MotorPort {
    pub fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            link: PortLink::new(id, dispatcher),
            resolution: 0,
            current_milliamps: 0,
            rpm: DEFAULT_RPM,
            configure_requested: false,
            configured: false,
            enabled: false,
            motion: None,
            busy_poll_delay: Duration::from_millis(DEFAULT_BUSY_POLL_DELAY_MS),
        }
    }

    /// Grace period before the board is asked whether the motor is still busy
    pub fn with_busy_poll_delay(mut self, delay: Duration) -> Self {
        self.busy_poll_delay = delay;
        self
    }

    /// Set the motor parameters and push them to the board.
    ///
    /// A failed push does not fail the call: the parameters stay pending and
    /// [`enable`](Self::enable) retries them. Returns whether the push worked.
    pub fn configure(&mut self, resolution: i64, current_milliamps: i64, rpm: i64) -> Result<bool> {
        check_non_negative("Resolution", resolution)?;
        check_non_negative("Current", current_milliamps)?;
        check_non_negative("RPM", rpm)?;

        self.configured = false;
        self.configure_requested = true;
        self.resolution = resolution;
        self.current_milliamps = current_milliamps;
        self.rpm = rpm;

        match self.push_configuration() {
            Err(e) if e.is_transport() => {
                tracing::warn!(
                    parent: self.span(),
                    "Motor {} configuration deferred: {}",
                    self.link.id(),
                    e
                );
                Ok(false)
            }
            result => result,
        }
    }

    fn push_configuration(&mut self) -> Result<bool> {
        if !self.configure_requested {
            return Err(IsotopeError::InvalidOperation(
                "motor parameters are not set, call configure first".to_string(),
            ));
        }

        tracing::debug!(parent: self.span(), "Configuring motor {}", self.link.id());
        let ok = self.set_rpm(self.rpm)?
            && self.set_current(self.current_milliamps)?
            && self.set_resolution(self.resolution)?;
        if ok {
            self.configured = true;
            self.configure_requested = false;
        }
        tracing::debug!(
            parent: self.span(),
            "{} motor {}",
            if ok { "Successfully configured" } else { "Failed to configure" },
            self.link.id()
        );
        Ok(ok)
    }

    /// Energise the motor, configuring it first if that is still pending
    pub fn enable(&mut self) -> Result<bool> {
        tracing::debug!(parent: self.span(), "Enabling motor {}", self.link.id());
        if !self.configured {
            self.push_configuration()?;
        }
        self.set_enabled(true)
    }

    pub fn disable(&mut self) -> Result<bool> {
        tracing::debug!(parent: self.span(), "Disabling motor {}", self.link.id());
        self.set_enabled(false)
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<bool> {
        let ok = self.link.set(Section::MotorEnable, i64::from(enabled))?;
        if ok {
            self.enabled = enabled;
            // Stand-by and disable both stop any motion
            self.abandon_motion();
        }
        Ok(ok)
    }

    /// Start rotating by `steps` (negative turns the other way).
    ///
    /// Returns once the board accepted the command; use
    /// [`is_motion_completed`](Self::is_motion_completed) or
    /// [`wait_until_motion_completed`](Self::wait_until_motion_completed) to
    /// follow the motion.
    pub fn rotate_by_steps(&mut self, steps: i64) -> Result<bool> {
        if !self.enabled {
            return Err(IsotopeError::InvalidOperation(format!(
                "motor {} is not enabled",
                self.link.id()
            )));
        }

        tracing::debug!(
            parent: self.span(),
            "Rotating motor {} by {} steps",
            self.link.id(),
            steps
        );
        let reply = self
            .link
            .request(&Command::set(Section::MotorStep, self.link.id(), steps))?;
        match reply.status {
            ReplyStatus::Acknowledged => {
                self.abandon_motion();
                self.motion = Some(Motion {
                    sequence: reply.sequence,
                    busy_query: None,
                    last_busy_poll: Instant::now(),
                });
                Ok(true)
            }
            // Motion finished before the round trip did
            ReplyStatus::Succeeded => Ok(true),
            _ => Ok(false),
        }
    }

    /// Rotate by an angle, rounded to whole steps of the configured resolution
    pub fn rotate_by_degrees(&mut self, degrees: f64) -> Result<bool> {
        if !self.enabled {
            return Err(IsotopeError::InvalidOperation(format!(
                "motor {} is not enabled",
                self.link.id()
            )));
        }
        if self.resolution == 0 {
            return Err(IsotopeError::InvalidArgument(
                "step resolution is 0, configure the motor first".to_string(),
            ));
        }

        tracing::debug!(
            parent: self.span(),
            "Rotating motor {} by {} degrees",
            self.link.id(),
            degrees
        );
        let steps = (degrees / self.resolution as f64).round() as i64;
        self.rotate_by_steps(steps)
    }

    /// Whether the last motion has finished. Never blocks.
    pub fn is_motion_completed(&mut self) -> Result<bool> {
        let Some(mut motion) = self.motion else {
            return Ok(true);
        };
        let dispatcher = self.link.dispatcher();

        if let Some(reply) = dispatcher.try_take(motion.sequence) {
            if reply.is_completion() {
                if reply.status == ReplyStatus::Aborted {
                    tracing::debug!(parent: self.span(), "Motor {} motion aborted", self.link.id());
                }
                self.finish_motion(false);
                return Ok(true);
            }
            if !reply.is_acknowledged() {
                dispatcher.report(Section::MotorStep, self.link.id(), &reply);
            }
        }

        if let Some(query) = motion.busy_query {
            if let Some(reply) = dispatcher.try_take(query) {
                motion.busy_query = None;
                if reply.is_succeeded() && reply.payload_int() == Some(0) {
                    tracing::debug!(
                        parent: self.span(),
                        "Motor {} reported idle without a completion notification",
                        self.link.id()
                    );
                    self.finish_motion(true);
                    return Ok(true);
                }
            }
        }

        if motion.last_busy_poll.elapsed() > self.busy_poll_delay {
            if let Some(stale) = motion.busy_query.take() {
                dispatcher.forget(stale);
            }
            motion.busy_query =
                Some(dispatcher.send(&Command::get(Section::MotorBusy, self.link.id()))?);
            motion.last_busy_poll = Instant::now();
        }

        self.motion = Some(motion);
        Ok(false)
    }

    /// Poll [`is_motion_completed`](Self::is_motion_completed) `refresh_hz`
    /// times a second. `None` or a zero timeout waits for as long as it takes.
    ///
    /// Returns false if the timeout passed first.
    pub fn wait_until_motion_completed(
        &mut self,
        timeout: Option<Duration>,
        refresh_hz: u32,
    ) -> Result<bool> {
        let hz = if refresh_hz == 0 { DEFAULT_REFRESH_HZ } else { refresh_hz };
        let delay = Duration::from_secs(1) / hz;
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);

        loop {
            if self.is_motion_completed()? {
                return Ok(true);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            thread::sleep(delay);
        }
    }

    /// Drop tracking of the current motion; `late` replies for it are discarded
    fn finish_motion(&mut self, late: bool) {
        if let Some(motion) = self.motion.take() {
            let dispatcher = self.link.dispatcher();
            if late {
                dispatcher.forget(motion.sequence);
            }
            if let Some(query) = motion.busy_query {
                dispatcher.forget(query);
            }
        }
    }

    fn abandon_motion(&mut self) {
        self.finish_motion(true);
    }

    pub fn set_rpm(&mut self, value: i64) -> Result<bool> {
        check_non_negative("RPM", value)?;
        tracing::debug!(parent: self.span(), "Setting RPM to {}", value);
        let ok = self.link.set(Section::MotorRpmSpeed, value)?;
        if ok {
            self.rpm = value;
        }
        Ok(ok)
    }

    pub fn set_current(&mut self, milliamps: i64) -> Result<bool> {
        check_non_negative("Current", milliamps)?;
        tracing::debug!(parent: self.span(), "Setting current to {} mA", milliamps);
        let ok = self.link.set(Section::MotorCurrentMilliamps, milliamps)?;
        if ok {
            self.current_milliamps = milliamps;
        }
        Ok(ok)
    }

    pub fn set_resolution(&mut self, degrees: i64) -> Result<bool> {
        check_non_negative("Resolution", degrees)?;
        tracing::debug!(parent: self.span(), "Setting resolution to {} degrees", degrees);
        let ok = self.link.set(Section::MotorStepAngle, degrees)?;
        if ok {
            self.resolution = degrees;
        }
        Ok(ok)
    }

    pub fn rpm(&self) -> i64 {
        self.rpm
    }

    pub fn current_milliamps(&self) -> i64 {
        self.current_milliamps
    }

    pub fn resolution(&self) -> i64 {
        self.resolution
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a motion is being tracked
    pub fn is_busy(&self) -> bool {
        self.motion.is_some()
    }

    /// Sequence of the motion being tracked
    pub fn in_flight_sequence(&self) -> Option<u16> {
        self.motion.map(|m| m.sequence)
    }

    fn span(&self) -> &tracing::Span {
        self.link.dispatcher().span()
    }
}

impl Port for MotorPort {
    const CAPABILITY: Capability = Capability::Motor;

    fn id(&self) -> usize {
        self.link.id()
    }
}

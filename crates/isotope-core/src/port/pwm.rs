//! PWM outputs (PWM 0..3)
//!
//! Each output runs in standard mode (duty 0..=1024) or servo mode (pulse
//! width 0..=20 ms). All outputs share one enable switch, which lives on the
//! container.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{Capability, Port, PortContainer, PortLink};
use crate::protocol::{Command, Dispatcher, IsotopeError, Result, Section};

pub const MAX_DUTY: i64 = 1024;
pub const MAX_PULSE_MS: i64 = 20;

const MODE_STANDARD: i64 = 0;
const MODE_SERVO: i64 = 1;

/// Second element of a `PWM_output` value: how to read the first one
const VALUE_TYPE_PWM: i64 = 0;
const VALUE_TYPE_MS: i64 = 1;

pub struct PwmOutputPort {
    link: PortLink,
}

impl PwmOutputPort {
    pub fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            link: PortLink::new(id, dispatcher),
        }
    }

    pub fn set_standard_mode(&self) -> Result<bool> {
        self.set_mode(MODE_STANDARD)
    }

    pub fn set_servo_mode(&self) -> Result<bool> {
        self.set_mode(MODE_SERVO)
    }

    fn set_mode(&self, mode: i64) -> Result<bool> {
        tracing::debug!(
            parent: self.link.dispatcher().span(),
            "Setting mode of PWM port {} to {}",
            self.link.id(),
            mode
        );
        self.link.set(Section::PwmMode, mode)
    }

    /// Duty cycle in standard mode
    pub fn set_pwm(&self, value: i64) -> Result<bool> {
        if !(0..=MAX_DUTY).contains(&value) {
            return Err(IsotopeError::InvalidArgument(format!(
                "PWM value must be between 0 and {}, got {}",
                MAX_DUTY, value
            )));
        }
        self.link
            .set_values(Section::PwmOutput, vec![value, VALUE_TYPE_PWM])
    }

    /// Pulse width in milliseconds, servo mode
    pub fn set_ms(&self, value: i64) -> Result<bool> {
        if !(0..=MAX_PULSE_MS).contains(&value) {
            return Err(IsotopeError::InvalidArgument(format!(
                "PWM value must be between 0 and {} ms, got {}",
                MAX_PULSE_MS, value
            )));
        }
        self.link
            .set_values(Section::PwmOutput, vec![value, VALUE_TYPE_MS])
    }

    /// Control value last sent to the port, as the board reports it
    pub fn control_value(&self) -> Result<Option<i64>> {
        self.link.get_int(Section::PwmOutput)
    }
}

impl Port for PwmOutputPort {
    const CAPABILITY: Capability = Capability::PwmOutput;

    fn id(&self) -> usize {
        self.link.id()
    }
}

/// The PWM outputs plus their shared enable switch
pub struct PwmOutput {
    ports: PortContainer<PwmOutputPort>,
    dispatcher: Arc<Dispatcher>,
}

impl PwmOutput {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            ports: PortContainer::new(|id| PwmOutputPort::new(id, dispatcher.clone())),
            dispatcher,
        }
    }

    pub fn enable(&self) -> Result<bool> {
        tracing::debug!(parent: self.dispatcher.span(), "Enabling PWM outputs");
        self.set_enable(1)
    }

    pub fn disable(&self) -> Result<bool> {
        tracing::debug!(parent: self.dispatcher.span(), "Disabling PWM outputs");
        self.set_enable(0)
    }

    fn set_enable(&self, value: i64) -> Result<bool> {
        let reply = self
            .dispatcher
            .request(&Command::set(Section::PwmEnable, 0, value))?;
        Ok(reply.is_succeeded())
    }

    pub fn is_enabled(&self) -> Result<bool> {
        let reply = self
            .dispatcher
            .request(&Command::get(Section::PwmEnable, 0))?;
        Ok(reply.is_succeeded() && reply.payload_int() == Some(1))
    }
}

impl Deref for PwmOutput {
    type Target = PortContainer<PwmOutputPort>;

    fn deref(&self) -> &Self::Target {
        &self.ports
    }
}

impl DerefMut for PwmOutput {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ports
    }
}

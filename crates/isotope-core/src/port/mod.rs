//! Board ports
//!
//! Typed views over the board's fixed sets of ports. Each port turns a domain
//! operation into one or more dispatcher calls; containers give bounds-checked
//! access by port ID.

mod adc;
mod motor;
mod power;
mod pwm;
mod temp;

pub use adc::AdcInputPort;
pub use motor::MotorPort;
pub use power::PowerOutputPort;
pub use pwm::{PwmOutput, PwmOutputPort};
pub use temp::{TempInputPort, DEFAULT_READING_TIMEOUT};

use std::fmt;
use std::sync::Arc;

use crate::protocol::{Command, Dispatcher, IsotopeError, Reply, Result, Section};

/// Kind of port on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Motor,
    PowerOutput,
    PwmOutput,
    AdcInput,
    TempInput,
}

impl Capability {
    /// Number of ports of this kind on the board
    pub const fn port_count(self) -> usize {
        match self {
            Capability::Motor => 4,
            Capability::PowerOutput => 3,
            Capability::PwmOutput => 4,
            Capability::AdcInput => 3,
            Capability::TempInput => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Capability::Motor => "motor",
            Capability::PowerOutput => "power output",
            Capability::PwmOutput => "PWM output",
            Capability::AdcInput => "ADC input",
            Capability::TempInput => "temperature input",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One addressable port
pub trait Port {
    const CAPABILITY: Capability;

    /// Port ID on the board
    fn id(&self) -> usize;
}

/// Fixed-size, bounds-checked collection of one kind of port
pub struct PortContainer<T: Port> {
    ports: Vec<T>,
}

impl<T: Port> PortContainer<T> {
    /// Build one port per ID
    pub fn new(build: impl FnMut(usize) -> T) -> Self {
        Self {
            ports: (0..T::CAPABILITY.port_count()).map(build).collect(),
        }
    }

    pub fn capability(&self) -> Capability {
        T::CAPABILITY
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&T> {
        let len = self.ports.len();
        self.ports.get(index).ok_or(IsotopeError::PortOutOfRange {
            capability: T::CAPABILITY,
            index,
            len,
        })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.ports.len();
        self.ports.get_mut(index).ok_or(IsotopeError::PortOutOfRange {
            capability: T::CAPABILITY,
            index,
            len,
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.ports.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.ports.iter_mut()
    }
}

impl<'a, T: Port> IntoIterator for &'a PortContainer<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.ports.iter()
    }
}

impl<'a, T: Port> IntoIterator for &'a mut PortContainer<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.ports.iter_mut()
    }
}

/// Shared plumbing of the port drivers
#[derive(Clone)]
pub(crate) struct PortLink {
    id: usize,
    dispatcher: Arc<Dispatcher>,
}

impl PortLink {
    pub(crate) fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        Self { id, dispatcher }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// SET `value` on this port; true only if the board answered `SUC`
    pub(crate) fn set(&self, section: Section, value: i64) -> Result<bool> {
        self.set_values(section, vec![value])
    }

    pub(crate) fn set_values(&self, section: Section, values: Vec<i64>) -> Result<bool> {
        let reply = self
            .dispatcher
            .request(&Command::set_values(section, self.id, values))?;
        Ok(reply.is_succeeded())
    }

    /// GET an integer from this port; `None` unless the board answered `SUC`
    /// with a number
    pub(crate) fn get_int(&self, section: Section) -> Result<Option<i64>> {
        let reply = self.request(&Command::get(section, self.id))?;
        Ok(succeeded_int(&reply))
    }

    pub(crate) fn request(&self, command: &Command) -> Result<Reply> {
        self.dispatcher.request(command)
    }
}

fn succeeded_int(reply: &Reply) -> Option<i64> {
    if reply.is_succeeded() {
        reply.payload_int()
    } else {
        None
    }
}

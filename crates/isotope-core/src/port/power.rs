//! Power outputs (OUT 0..2), PWM-limited
use std::sync::Arc;

use super::{Capability, Port, PortLink};
use crate::protocol::{Dispatcher, IsotopeError, Result, Section};

/// Highest PWM value; 1024 means constant voltage
pub const MAX_PWM: i64 = 1024;

fn check_pwm(value: i64) -> Result<()> {
    if !(0..=MAX_PWM).contains(&value) {
        return Err(IsotopeError::InvalidArgument(format!(
            "PWM value must be between 0 and {}, got {}",
            MAX_PWM, value
        )));
    }
    Ok(())
}

pub struct PowerOutputPort {
    link: PortLink,
    default_pwm: i64,
    /// Last PWM value the board accepted
    current_pwm: i64,
}

impl PowerOutputPort {
    pub fn new(id: usize, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            link: PortLink::new(id, dispatcher),
            default_pwm: MAX_PWM,
            current_pwm: 0,
        }
    }

    pub fn default_pwm(&self) -> i64 {
        self.default_pwm
    }

    /// PWM used by [`enable`](Self::enable) when none is given
    pub fn set_default_pwm(&mut self, value: i64) -> Result<()> {
        check_pwm(value)?;
        self.default_pwm = value;
        Ok(())
    }

    /// Switch the output on. `Some(0)` is the same as [`disable`](Self::disable).
    pub fn enable(&mut self, pwm: Option<i64>) -> Result<bool> {
        if let Some(value) = pwm {
            check_pwm(value)?;
        }
        let pwm = pwm.unwrap_or(self.default_pwm);
        if pwm == 0 {
            return self.disable();
        }

        tracing::debug!(
            parent: self.link.dispatcher().span(),
            "Enabling power output port {} with PWM value of {}",
            self.link.id(),
            pwm
        );
        let ok = self.link.set(Section::PowerOutput, pwm)?;
        if ok {
            self.current_pwm = pwm;
        }
        Ok(ok)
    }

    pub fn disable(&mut self) -> Result<bool> {
        tracing::debug!(
            parent: self.link.dispatcher().span(),
            "Disabling power output port {}",
            self.link.id()
        );
        let ok = self.link.set(Section::PowerOutput, 0)?;
        if ok {
            self.current_pwm = 0;
        }
        Ok(ok)
    }

    pub fn is_enabled(&self) -> bool {
        self.current_pwm > 0
    }

    pub fn pwm(&self) -> i64 {
        self.current_pwm
    }
}

impl Port for PowerOutputPort {
    const CAPABILITY: Capability = Capability::PowerOutput;

    fn id(&self) -> usize {
        self.link.id()
    }
}

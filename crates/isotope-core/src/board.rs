//! The Isotope board: one connection plus every port on it

use std::sync::Arc;

use crate::config::ConnectionConfig;
use crate::firmware::FirmwareVersion;
use crate::port::{
    AdcInputPort, MotorPort, PortContainer, PowerOutputPort, PwmOutput, TempInputPort,
};
use crate::protocol::{
    Command, CommunicationChannel, Connection, Dispatcher, Result, Section,
};

/// Clamp a colour channel to 0..=255
fn clamp_channel(value: i64) -> i64 {
    value.clamp(0, 255)
}

struct Ports {
    powers: PortContainer<PowerOutputPort>,
    motors: PortContainer<MotorPort>,
    pwms: PwmOutput,
    adcs: PortContainer<AdcInputPort>,
    temps: PortContainer<TempInputPort>,
}

impl Ports {
    fn new(dispatcher: &Arc<Dispatcher>, config: &ConnectionConfig) -> Self {
        Self {
            powers: PortContainer::new(|id| PowerOutputPort::new(id, dispatcher.clone())),
            motors: PortContainer::new(|id| {
                MotorPort::new(id, dispatcher.clone()).with_busy_poll_delay(config.busy_poll_delay())
            }),
            pwms: PwmOutput::new(dispatcher.clone()),
            adcs: PortContainer::new(|id| AdcInputPort::new(id, dispatcher.clone())),
            temps: PortContainer::new(|id| TempInputPort::new(id, dispatcher.clone())),
        }
    }
}

/// Host-side handle on an Isotope Breakout board
///
/// ```rust,ignore
/// use isotope_core::prelude::*;
///
/// let mut board = Isotope::new(ConnectionConfig::new("/dev/ttyACM0"));
/// board.connect()?;
/// let motor = board.motors_mut().get_mut(0)?;
/// motor.configure(2, 400, 100)?;
/// motor.enable()?;
/// motor.rotate_by_degrees(90.0)?;
/// motor.wait_until_motion_completed(None, 100)?;
/// board.disconnect();
/// ```
pub struct Isotope {
    connection: Connection,
    ports: Ports,
}

impl Isotope {
    pub fn new(config: ConnectionConfig) -> Self {
        let connection = Connection::new(config);
        let ports = Ports::new(connection.dispatcher(), connection.config());
        Self { connection, ports }
    }

    /// Connect to the configured address
    pub fn connect(&mut self) -> Result<FirmwareVersion> {
        let firmware = self.connection.connect()?;
        self.reset_ports();
        Ok(firmware)
    }

    /// Connect over an already open channel
    pub fn connect_with_channel(
        &mut self,
        channel: Box<dyn CommunicationChannel>,
    ) -> Result<FirmwareVersion> {
        let firmware = self.connection.connect_with_channel(channel)?;
        self.reset_ports();
        Ok(firmware)
    }

    /// Port state belongs to one connection
    fn reset_ports(&mut self) {
        self.ports = Ports::new(self.connection.dispatcher(), self.connection.config());
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Firmware reported by the board, once connected
    pub fn firmware(&self) -> Option<FirmwareVersion> {
        self.connection.firmware()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn powers(&self) -> &PortContainer<PowerOutputPort> {
        &self.ports.powers
    }

    pub fn powers_mut(&mut self) -> &mut PortContainer<PowerOutputPort> {
        &mut self.ports.powers
    }

    pub fn motors(&self) -> &PortContainer<MotorPort> {
        &self.ports.motors
    }

    pub fn motors_mut(&mut self) -> &mut PortContainer<MotorPort> {
        &mut self.ports.motors
    }

    pub fn pwms(&self) -> &PwmOutput {
        &self.ports.pwms
    }

    pub fn pwms_mut(&mut self) -> &mut PwmOutput {
        &mut self.ports.pwms
    }

    pub fn adcs(&self) -> &PortContainer<AdcInputPort> {
        &self.ports.adcs
    }

    pub fn temps(&self) -> &PortContainer<TempInputPort> {
        &self.ports.temps
    }

    pub fn temps_mut(&mut self) -> &mut PortContainer<TempInputPort> {
        &mut self.ports.temps
    }

    /// Set the on-board RGB LED; each channel is clamped to 0..=255.
    ///
    /// All three channels are always sent; true only if all succeeded.
    pub fn set_rgb_colour(&self, red: i64, green: i64, blue: i64) -> Result<bool> {
        let dispatcher = self.connection.dispatcher();
        let mut ok = true;
        for (section, value) in [
            (Section::RgbRed, red),
            (Section::RgbGreen, green),
            (Section::RgbBlue, blue),
        ] {
            let reply = dispatcher.request(&Command::set(section, 0, clamp_channel(value)))?;
            ok &= reply.is_succeeded();
        }
        Ok(ok)
    }
}

impl Drop for Isotope {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_channel() {
        assert_eq!(clamp_channel(-5), 0);
        assert_eq!(clamp_channel(128), 128);
        assert_eq!(clamp_channel(300), 255);
    }

    #[test]
    fn test_ports_exist_before_connect() {
        let board = Isotope::new(ConnectionConfig::new("/dev/null-isotope"));
        assert!(!board.is_connected());
        assert_eq!(board.motors().len(), 4);
        assert_eq!(board.powers().len(), 3);
        assert_eq!(board.pwms().len(), 4);
        assert_eq!(board.adcs().len(), 3);
        assert_eq!(board.temps().len(), 3);
        assert!(board.firmware().is_none());
    }
}

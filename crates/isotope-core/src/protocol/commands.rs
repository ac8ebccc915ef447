//! Protocol commands
//!
//! Defines the command kinds and sections understood by the Isotope firmware.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Command type field of an outgoing frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Read a value from the board
    #[serde(rename = "GET")]
    Get,
    /// Write a value to the board
    #[serde(rename = "SET")]
    Set,
}

impl CommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Get => "GET",
            CommandKind::Set => "SET",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Board subsystem addressed by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    /// Board name and firmware version (handshake)
    #[serde(rename = "Who_I_am")]
    WhoIAm,
    /// Board ID, unused by the host
    #[serde(rename = "ID_value")]
    IdValue,
    /// Keep-alive
    #[serde(rename = "HeartBeat")]
    Heartbeat,
    #[serde(rename = "Power_output")]
    PowerOutput,
    #[serde(rename = "Temp_sensor")]
    TempSensor,
    #[serde(rename = "PWM_output")]
    PwmOutput,
    #[serde(rename = "PWM_enable")]
    PwmEnable,
    #[serde(rename = "PWM_mode")]
    PwmMode,
    #[serde(rename = "Analog_input")]
    AnalogInput,
    #[serde(rename = "RGB_red")]
    RgbRed,
    #[serde(rename = "RGB_green")]
    RgbGreen,
    #[serde(rename = "RGB_blue")]
    RgbBlue,
    /// Number of steps to rotate (long-running, ACK then SUC/ABT)
    #[serde(rename = "Motor_step")]
    MotorStep,
    #[serde(rename = "Motor_rpm_speed")]
    MotorRpmSpeed,
    #[serde(rename = "Motor_step_angle")]
    MotorStepAngle,
    #[serde(rename = "Motor_current_milliamps")]
    MotorCurrentMilliamps,
    #[serde(rename = "Motor_enable")]
    MotorEnable,
    /// Whether a motor is still in motion
    #[serde(rename = "Motor_busy")]
    MotorBusy,
}

impl Section {
    /// Stable wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            Section::WhoIAm => "Who_I_am",
            Section::IdValue => "ID_value",
            Section::Heartbeat => "HeartBeat",
            Section::PowerOutput => "Power_output",
            Section::TempSensor => "Temp_sensor",
            Section::PwmOutput => "PWM_output",
            Section::PwmEnable => "PWM_enable",
            Section::PwmMode => "PWM_mode",
            Section::AnalogInput => "Analog_input",
            Section::RgbRed => "RGB_red",
            Section::RgbGreen => "RGB_green",
            Section::RgbBlue => "RGB_blue",
            Section::MotorStep => "Motor_step",
            Section::MotorRpmSpeed => "Motor_rpm_speed",
            Section::MotorStepAngle => "Motor_step_angle",
            Section::MotorCurrentMilliamps => "Motor_current_milliamps",
            Section::MotorEnable => "Motor_enable",
            Section::MotorBusy => "Motor_busy",
        }
    }

    /// Sections whose SET completes asynchronously (ACK first, SUC/ABT later)
    pub fn is_long_running(&self) -> bool {
        matches!(self, Section::MotorStep | Section::TempSensor)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A command addressed to one port of the board.
///
/// The sequence number is assigned by the dispatcher when the command is
/// written, so it is not part of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub section: Section,
    pub item: usize,
    pub values: Vec<i64>,
}

impl Command {
    pub fn new(kind: CommandKind, section: Section, item: usize, values: Vec<i64>) -> Self {
        Self {
            kind,
            section,
            item,
            values,
        }
    }

    /// GET command; the firmware ignores the value, a single 0 is sent
    pub fn get(section: Section, item: usize) -> Self {
        Self::new(CommandKind::Get, section, item, vec![0])
    }

    /// SET command carrying a single scalar value
    pub fn set(section: Section, item: usize, value: i64) -> Self {
        Self::new(CommandKind::Set, section, item, vec![value])
    }

    /// SET command carrying several values
    pub fn set_values(section: Section, item: usize, values: Vec<i64>) -> Self {
        Self::new(CommandKind::Set, section, item, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_tags_match_serde_names() {
        let all = [
            Section::WhoIAm,
            Section::IdValue,
            Section::Heartbeat,
            Section::PowerOutput,
            Section::TempSensor,
            Section::PwmOutput,
            Section::PwmEnable,
            Section::PwmMode,
            Section::AnalogInput,
            Section::RgbRed,
            Section::RgbGreen,
            Section::RgbBlue,
            Section::MotorStep,
            Section::MotorRpmSpeed,
            Section::MotorStepAngle,
            Section::MotorCurrentMilliamps,
            Section::MotorEnable,
            Section::MotorBusy,
        ];
        for section in all {
            let json = serde_json::to_string(&section).unwrap();
            assert_eq!(json, format!("\"{}\"", section.tag()));
        }
    }

    #[test]
    fn test_scalar_wrapped_into_list() {
        let cmd = Command::set(Section::PowerOutput, 1, 512);
        assert_eq!(cmd.values, vec![512]);
        assert_eq!(cmd.kind, CommandKind::Set);

        let cmd = Command::get(Section::AnalogInput, 2);
        assert_eq!(cmd.values, vec![0]);
        assert_eq!(cmd.kind.as_str(), "GET");
    }

    #[test]
    fn test_long_running_sections() {
        assert!(Section::MotorStep.is_long_running());
        assert!(Section::TempSensor.is_long_running());
        assert!(!Section::PowerOutput.is_long_running());
        assert!(!Section::MotorEnable.is_long_running());
    }
}

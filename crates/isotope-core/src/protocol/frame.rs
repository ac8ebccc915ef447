//! Frame encoding/decoding
//!
//! Every frame is one line of JSON terminated by `\n`.
//!
//! Outgoing: `{"seq":7,"type":"SET","section":"Power_output","item":1,"value":[512]}`
//! Incoming: `{"seq":7,"payload":"","error":"SUC"}`
//!
//! Scalar values are always wrapped into a one-element list so the wire
//! format is uniform.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{Command, CommandKind, IsotopeError, Section};

/// Wire code of an acknowledged long-running command
pub const RES_ACK: &str = "ACK";
/// Wire code of a succeeded command
pub const RES_SUC: &str = "SUC";
/// Wire code of an aborted long-running command
pub const RES_ABT: &str = "ABT";
/// Host-local code for a reply that could not be parsed (never on the wire)
pub const INC_ERR_NON_JSON_RESPONSE: &str = "ERRINC1";
/// Host-local code for a reply that never arrived (never on the wire)
pub const INC_ERR_RESPONSE_TIMEOUT: &str = "ERRINC2";

/// Error kinds carried by an errored reply
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `ERR`
    General,
    /// `ERR0`
    WrongJsonFormat,
    /// `ERR1`
    WrongType,
    /// `ERR2`
    UnknownSection,
    /// `ERR3`
    InvalidItem,
    /// `ERR4`
    ValueOutOfRange,
    /// `ERR5`
    Hardware,
    /// No reply within the response window (host-local)
    Timeout,
    /// Any other code the firmware sent
    Unknown(String),
}

impl ErrorKind {
    pub fn code(&self) -> &str {
        match self {
            ErrorKind::General => "ERR",
            ErrorKind::WrongJsonFormat => "ERR0",
            ErrorKind::WrongType => "ERR1",
            ErrorKind::UnknownSection => "ERR2",
            ErrorKind::InvalidItem => "ERR3",
            ErrorKind::ValueOutOfRange => "ERR4",
            ErrorKind::Hardware => "ERR5",
            ErrorKind::Timeout => INC_ERR_RESPONSE_TIMEOUT,
            ErrorKind::Unknown(code) => code,
        }
    }

    /// Human readable description used in logs
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::General => "Error Response from Isotope Board - General error",
            ErrorKind::WrongJsonFormat => "Error Response from Isotope Board - Wrong JSON format string",
            ErrorKind::WrongType => "Error Response from Isotope Board - Wrong command Type",
            ErrorKind::UnknownSection => "Error Response from Isotope Board - Unknown command Section",
            ErrorKind::InvalidItem => {
                "Error Response from Isotope Board - Wrong command Item for the Section"
            }
            ErrorKind::ValueOutOfRange => "Error Response from Isotope Board - Value out of range",
            ErrorKind::Hardware => "Error Response from Isotope Board - Hardware error",
            ErrorKind::Timeout => {
                "Incoming message error - Timeout when waiting for serial response"
            }
            ErrorKind::Unknown(_) => "Error Response from Isotope Board - Unknown error code",
        }
    }
}

/// Status of a reply, either sent by the board or synthesised locally
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    /// Accepted, completion is reported later under the same sequence
    Acknowledged,
    Succeeded,
    Aborted,
    Errored(ErrorKind),
    /// The line could not be parsed (host-local)
    MalformedFrame,
}

impl ReplyStatus {
    /// Map a wire status code
    pub fn from_code(code: &str) -> Self {
        match code {
            RES_ACK => ReplyStatus::Acknowledged,
            RES_SUC => ReplyStatus::Succeeded,
            RES_ABT => ReplyStatus::Aborted,
            "ERR" => ReplyStatus::Errored(ErrorKind::General),
            "ERR0" => ReplyStatus::Errored(ErrorKind::WrongJsonFormat),
            "ERR1" => ReplyStatus::Errored(ErrorKind::WrongType),
            "ERR2" => ReplyStatus::Errored(ErrorKind::UnknownSection),
            "ERR3" => ReplyStatus::Errored(ErrorKind::InvalidItem),
            "ERR4" => ReplyStatus::Errored(ErrorKind::ValueOutOfRange),
            "ERR5" => ReplyStatus::Errored(ErrorKind::Hardware),
            other => ReplyStatus::Errored(ErrorKind::Unknown(other.to_string())),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ReplyStatus::Acknowledged => RES_ACK,
            ReplyStatus::Succeeded => RES_SUC,
            ReplyStatus::Aborted => RES_ABT,
            ReplyStatus::Errored(kind) => kind.code(),
            ReplyStatus::MalformedFrame => INC_ERR_NON_JSON_RESPONSE,
        }
    }
}

impl fmt::Display for ReplyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A reply correlated to a command by its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub sequence: u16,
    pub payload: String,
    pub status: ReplyStatus,
}

impl Reply {
    pub fn new(sequence: u16, payload: impl Into<String>, status: ReplyStatus) -> Self {
        Self {
            sequence,
            payload: payload.into(),
            status,
        }
    }

    /// Synthetic reply for a request that got no answer in time
    pub fn timeout(sequence: u16) -> Self {
        Self::new(sequence, "", ReplyStatus::Errored(ErrorKind::Timeout))
    }

    /// Synthetic reply for a line that could not be parsed
    pub fn malformed(sequence: u16) -> Self {
        Self::new(sequence, "", ReplyStatus::MalformedFrame)
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == ReplyStatus::Succeeded
    }

    pub fn is_acknowledged(&self) -> bool {
        self.status == ReplyStatus::Acknowledged
    }

    /// Second-phase reply of a long-running command
    pub fn is_completion(&self) -> bool {
        matches!(self.status, ReplyStatus::Succeeded | ReplyStatus::Aborted)
    }

    pub fn is_timeout(&self) -> bool {
        self.status == ReplyStatus::Errored(ErrorKind::Timeout)
    }

    /// Payload parsed as an integer, if it is one
    pub fn payload_int(&self) -> Option<i64> {
        self.payload.trim().parse().ok()
    }

    /// Payload parsed as a decimal number (sensor readings), if it is one
    pub fn payload_float(&self) -> Option<f64> {
        self.payload
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
    }
}

#[derive(Serialize)]
struct CommandFrameOut<'a> {
    seq: u16,
    #[serde(rename = "type")]
    kind: CommandKind,
    section: Section,
    item: usize,
    value: &'a [i64],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueField {
    List(Vec<i64>),
    Scalar(i64),
}

#[derive(Deserialize)]
struct CommandFrameIn {
    seq: u16,
    #[serde(rename = "type")]
    kind: CommandKind,
    section: Section,
    item: usize,
    #[serde(default)]
    value: Option<ValueField>,
}

#[derive(Serialize)]
struct ReplyFrameOut<'a> {
    seq: u16,
    payload: &'a str,
    error: &'a str,
}

/// Encode a command as one newline-terminated line
pub fn encode_command(sequence: u16, command: &Command) -> String {
    let frame = CommandFrameOut {
        seq: sequence,
        kind: command.kind,
        section: command.section,
        item: command.item,
        value: &command.values,
    };
    // Serialising plain integers and strings into a String cannot fail
    let mut line = serde_json::to_string(&frame).unwrap_or_default();
    line.push('\n');
    line
}

/// Decode an outgoing command line (used by the simulated board)
pub fn decode_command(line: &str) -> Result<(u16, Command), IsotopeError> {
    let frame: CommandFrameIn = serde_json::from_str(line.trim())
        .map_err(|e| IsotopeError::InvalidArgument(format!("bad command frame: {}", e)))?;
    let values = match frame.value {
        Some(ValueField::List(values)) => values,
        Some(ValueField::Scalar(value)) => vec![value],
        None => Vec::new(),
    };
    Ok((
        frame.seq,
        Command::new(frame.kind, frame.section, frame.item, values),
    ))
}

/// Encode a reply as one newline-terminated line (used by the simulated board)
pub fn encode_reply(reply: &Reply) -> String {
    let frame = ReplyFrameOut {
        seq: reply.sequence,
        payload: &reply.payload,
        error: reply.status.code(),
    };
    let mut line = serde_json::to_string(&frame).unwrap_or_default();
    line.push('\n');
    line
}

/// Decode an incoming reply line.
///
/// Returns `None` when not even a sequence number can be recovered, since such
/// a line cannot be correlated to any request. A line that carries a valid
/// sequence but is otherwise broken decodes to a
/// [`ReplyStatus::MalformedFrame`] reply under that sequence.
pub fn decode_reply(line: &str) -> Option<Reply> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let object = value.as_object()?;
    let sequence = object
        .get("seq")
        .and_then(Value::as_u64)
        .and_then(|seq| u16::try_from(seq).ok())?;

    let payload = match object.get("payload") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Some(Reply::malformed(sequence)),
    };
    let status = match object.get("error") {
        Some(Value::String(code)) => ReplyStatus::from_code(code),
        _ => return Some(Reply::malformed(sequence)),
    };

    Some(Reply {
        sequence,
        payload,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_command_layout() {
        let line = encode_command(7, &Command::set(Section::PowerOutput, 1, 512));
        assert_eq!(
            line,
            "{\"seq\":7,\"type\":\"SET\",\"section\":\"Power_output\",\"item\":1,\"value\":[512]}\n"
        );
    }

    #[test]
    fn test_decode_reply() {
        let reply = decode_reply("{\"seq\":42,\"payload\":\"180\",\"error\":\"SUC\"}\r\n").unwrap();
        assert_eq!(reply.sequence, 42);
        assert_eq!(reply.payload, "180");
        assert_eq!(reply.status, ReplyStatus::Succeeded);
        assert_eq!(reply.payload_int(), Some(180));
        assert_eq!(reply.payload_float(), Some(180.0));
    }

    #[test]
    fn test_decode_numeric_payload() {
        let reply = decode_reply("{\"seq\":3,\"payload\":25,\"error\":\"SUC\"}").unwrap();
        assert_eq!(reply.payload, "25");
    }

    #[test]
    fn test_decode_error_codes() {
        let cases = [
            ("ACK", ReplyStatus::Acknowledged),
            ("ABT", ReplyStatus::Aborted),
            ("ERR", ReplyStatus::Errored(ErrorKind::General)),
            ("ERR0", ReplyStatus::Errored(ErrorKind::WrongJsonFormat)),
            ("ERR1", ReplyStatus::Errored(ErrorKind::WrongType)),
            ("ERR2", ReplyStatus::Errored(ErrorKind::UnknownSection)),
            ("ERR3", ReplyStatus::Errored(ErrorKind::InvalidItem)),
            ("ERR4", ReplyStatus::Errored(ErrorKind::ValueOutOfRange)),
            ("ERR5", ReplyStatus::Errored(ErrorKind::Hardware)),
            ("ERR9", ReplyStatus::Errored(ErrorKind::Unknown("ERR9".into()))),
        ];
        for (code, expected) in cases {
            let line = format!("{{\"seq\":1,\"payload\":\"\",\"error\":\"{}\"}}", code);
            assert_eq!(decode_reply(&line).unwrap().status, expected);
        }
    }

    #[test]
    fn test_malformed_with_sequence() {
        let reply = decode_reply("{\"seq\":9,\"payload\":\"x\"}").unwrap();
        assert_eq!(reply, Reply::malformed(9));
        assert_eq!(reply.payload, "");
    }

    #[test]
    fn test_garbage_is_dropped() {
        assert!(decode_reply("not json at all").is_none());
        assert!(decode_reply("{\"payload\":\"\",\"error\":\"SUC\"}").is_none());
        assert!(decode_reply("{\"seq\":70000,\"payload\":\"\",\"error\":\"SUC\"}").is_none());
        assert!(decode_reply("[1,2,3]").is_none());
    }

    #[test]
    fn test_command_decodes_scalar_value() {
        let (seq, cmd) = decode_command(
            "{\"seq\":5,\"type\":\"SET\",\"section\":\"Motor_enable\",\"item\":2,\"value\":1}",
        )
        .unwrap();
        assert_eq!(seq, 5);
        assert_eq!(cmd, Command::set(Section::MotorEnable, 2, 1));
    }

    #[test]
    fn test_reply_encoding_matches_decoder() {
        let reply = Reply::new(65535, "name=Isotope Board,firmware=1.0.0", ReplyStatus::Succeeded);
        let line = encode_reply(&reply);
        assert!(line.ends_with('\n'));
        assert_eq!(decode_reply(&line).unwrap(), reply);
    }

    #[test]
    fn test_local_codes() {
        assert_eq!(Reply::timeout(1).status.code(), INC_ERR_RESPONSE_TIMEOUT);
        assert_eq!(Reply::malformed(1).status.code(), INC_ERR_NON_JSON_RESPONSE);
        assert!(Reply::timeout(1).is_timeout());
    }

    #[test]
    fn test_payload_float() {
        let reading = Reply::new(3, " 23.5 ", ReplyStatus::Succeeded);
        assert_eq!(reading.payload_int(), None);
        assert_eq!(reading.payload_float(), Some(23.5));
        assert_eq!(Reply::new(3, "warm", ReplyStatus::Succeeded).payload_float(), None);
        assert_eq!(Reply::new(3, "NaN", ReplyStatus::Succeeded).payload_float(), None);
    }
}

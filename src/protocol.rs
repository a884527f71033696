//! Wire protocol of the DT14xx high-voltage supplies.
//!
//! Requests are single ASCII lines of the form
//! `$BD:<0-31>,CMD:<MON|SET>[,CH:<0-8>],PAR:<name>[,VAL:<value>]` terminated
//! by CRLF. Field order is fixed; there is no escaping, so parameter and
//! value text must not contain commas or line breaks. Responses are free-text
//! lines; an answer is successful iff it contains `OK`, and for MONITOR
//! commands the value is whatever follows the last `VAL:` token.

use std::fmt;

use bitflags::bitflags;

use crate::error::{CaenError, Result};

/// Substring that marks a successful response, per the instrument manual.
pub const SUCCESS_MARKER: &str = "OK";
const VALUE_MARKER: &str = "VAL:";

pub const MAX_BOARD: u8 = 31;
pub const MAX_CHANNEL: u8 = 8;

/// The two command families of the instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Monitor,
    Set,
}

impl CommandKind {
    fn mnemonic(self) -> &'static str {
        match self {
            CommandKind::Monitor => "MON",
            CommandKind::Set => "SET",
        }
    }
}

/// A parameter value, typed late: integer if the text is all digits, float
/// if parseable, otherwise left as text (polarity sign, board name).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Coerce monitored value text the way the instrument conventions
    /// require: `"5"` is an integer, `"5.5"` a float, `"+"` stays text.
    pub fn parse(text: &str) -> Value {
        if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = text.parse::<i64>() {
                return Value::Int(n);
            }
        }
        if let Ok(f) = text.parse::<f64>() {
            return Value::Float(f);
        }
        Value::Text(text.to_owned())
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Int(n)
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Value {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Value {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Text(s.to_owned())
    }
}

/// A validated request. Construction checks the address domains before any
/// I/O happens; encoding cannot fail afterwards.
#[derive(Clone, Debug)]
pub struct Command {
    board: u8,
    kind: CommandKind,
    channel: Option<u8>,
    parameter: String,
    value: Option<Value>,
}

impl Command {
    pub fn new(
        board: u8,
        kind: CommandKind,
        channel: Option<u8>,
        parameter: &str,
        value: Option<Value>,
    ) -> Result<Command> {
        if board > MAX_BOARD {
            return Err(CaenError::InvalidAddress {
                kind: "board",
                value: board as i64,
                max: MAX_BOARD as i64,
            });
        }
        if let Some(ch) = channel {
            if ch > MAX_CHANNEL {
                return Err(CaenError::InvalidAddress {
                    kind: "channel",
                    value: ch as i64,
                    max: MAX_CHANNEL as i64,
                });
            }
        }
        check_field_text(parameter)?;
        if let Some(val) = &value {
            check_field_text(&val.to_string())?;
        }
        Ok(Command {
            board,
            kind,
            channel,
            parameter: parameter.to_owned(),
            value,
        })
    }

    pub fn monitor(board: u8, channel: Option<u8>, parameter: &str) -> Result<Command> {
        Command::new(board, CommandKind::Monitor, channel, parameter, None)
    }

    pub fn set(
        board: u8,
        channel: Option<u8>,
        parameter: &str,
        value: Option<Value>,
    ) -> Result<Command> {
        Command::new(board, CommandKind::Set, channel, parameter, value)
    }

    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Encode the request as a CRLF-terminated wire line.
    pub fn to_wire(&self) -> String {
        let mut line = format!("$BD:{},CMD:{}", self.board, self.kind.mnemonic());
        if let Some(ch) = self.channel {
            line.push_str(&format!(",CH:{}", ch));
        }
        line.push_str(&format!(",PAR:{}", self.parameter));
        if let Some(val) = &self.value {
            line.push_str(&format!(",VAL:{}", val));
        }
        line.push_str("\r\n");
        line
    }
}

// The wire format has no escaping; a comma or line break inside a field would
// desynchronise the instrument's parser.
fn check_field_text(text: &str) -> Result<()> {
    if text.contains(',') || text.contains('\r') || text.contains('\n') {
        return Err(CaenError::Configuration(format!(
            "field text {:?} may not contain commas or line breaks",
            text
        )));
    }
    Ok(())
}

/// One decoded response line, line terminators already stripped.
#[derive(Clone, Debug)]
pub struct Response(String);

impl Response {
    pub fn new(text: impl Into<String>) -> Response {
        Response(text.into())
    }

    pub fn text(&self) -> &str {
        &self.0
    }

    pub fn into_text(self) -> String {
        self.0
    }

    /// A response is successful iff it contains the success marker, whatever
    /// the command kind. An empty line (the silent-failure behaviour of an
    /// absent daisy-chain board) is therefore a failure, not an exception.
    pub fn is_success(&self) -> bool {
        self.0.contains(SUCCESS_MARKER)
    }

    /// Text following the last `VAL:` token, if any. No further structure is
    /// assumed; typing is deferred to the caller via [`Value::parse`].
    pub fn value_text(&self) -> Option<&str> {
        self.0
            .rfind(VALUE_MARKER)
            .map(|idx| &self.0[idx + VALUE_MARKER.len()..])
    }
}

bitflags! {
    /// Channel status word, a 16-bit field transmitted LSB-first.
    pub struct ChannelStatus: u16 {
        /// Output is on.
        const OUTPUT_ON = 1 << 0;
        /// Channel is ramping up.
        const RAMPING_UP = 1 << 1;
        /// Channel is ramping down.
        const RAMPING_DOWN = 1 << 2;
        /// Overcurrent condition has latched.
        const OVERCURRENT = 1 << 3;
    }
}

impl ChannelStatus {
    pub fn is_ramping(self) -> bool {
        self.intersects(ChannelStatus::RAMPING_UP | ChannelStatus::RAMPING_DOWN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn request_grammar() {
        let cmd = Command::monitor(0, Some(0), "VSET").unwrap();
        assert_eq!(cmd.to_wire(), "$BD:0,CMD:MON,CH:0,PAR:VSET\r\n");

        let cmd = Command::set(31, Some(8), "ISET", Some(Value::Int(50))).unwrap();
        assert_eq!(cmd.to_wire(), "$BD:31,CMD:SET,CH:8,PAR:ISET,VAL:50\r\n");

        // board-level command: no CH field at all
        let cmd = Command::monitor(2, None, "BDNAME").unwrap();
        assert_eq!(cmd.to_wire(), "$BD:2,CMD:MON,PAR:BDNAME\r\n");

        // SET with no value: field is simply absent
        let cmd = Command::set(0, Some(3), "ON", None).unwrap();
        assert_eq!(cmd.to_wire(), "$BD:0,CMD:SET,CH:3,PAR:ON\r\n");
    }

    #[test]
    fn address_domains() {
        assert_matches!(
            Command::monitor(32, Some(0), "VSET"),
            Err(CaenError::InvalidAddress { kind: "board", value: 32, .. })
        );
        assert_matches!(
            Command::monitor(0, Some(9), "VSET"),
            Err(CaenError::InvalidAddress { kind: "channel", value: 9, .. })
        );
        assert!(Command::monitor(31, Some(8), "VSET").is_ok());
        assert!(Command::monitor(0, None, "BDNAME").is_ok());
    }

    #[test]
    fn field_text_rejects_separators() {
        assert_matches!(
            Command::monitor(0, Some(0), "VS,ET"),
            Err(CaenError::Configuration(_))
        );
        assert_matches!(
            Command::set(0, Some(0), "VSET", Some(Value::Text("1\r\n2".into()))),
            Err(CaenError::Configuration(_))
        );
    }

    #[test]
    fn success_predicate() {
        assert!(Response::new("#BD:00,CMD:OK,VAL:42").is_success());
        assert!(Response::new("...OK...").is_success());
        assert!(!Response::new("#BD:00,CMD:ERR").is_success());
        assert!(!Response::new("").is_success());
        assert!(!Response::new("   ").is_success());
    }

    #[test]
    fn value_extraction_takes_last_marker() {
        let resp = Response::new("#BD:00,CMD:OK,VAL:12.5");
        assert_eq!(resp.value_text(), Some("12.5"));

        // only the text after the *last* VAL: counts
        let resp = Response::new("VAL:bogus,CMD:OK,VAL:7");
        assert_eq!(resp.value_text(), Some("7"));

        assert_eq!(Response::new("#BD:00,CMD:OK").value_text(), None);
    }

    #[test]
    fn value_coercion() {
        assert_eq!(Value::parse("5"), Value::Int(5));
        assert_eq!(Value::parse("5.5"), Value::Float(5.5));
        assert_eq!(Value::parse("+"), Value::Text("+".into()));
        assert_eq!(Value::parse("-"), Value::Text("-".into()));
        assert_eq!(Value::parse("-5"), Value::Float(-5.0));
        assert_eq!(Value::parse("DT1471ET"), Value::Text("DT1471ET".into()));
        assert_eq!(Value::parse(""), Value::Text("".into()));
    }

    #[test]
    fn value_display_round_trips_on_the_wire() {
        assert_eq!(Value::Int(50).to_string(), "50");
        assert_eq!(Value::Float(5.5).to_string(), "5.5");
        assert_eq!(Value::Text("+".into()).to_string(), "+");
    }

    #[test]
    fn status_bit_decode() {
        let status = ChannelStatus::from_bits_truncate(0b0001);
        assert!(status.contains(ChannelStatus::OUTPUT_ON));
        assert!(!status.contains(ChannelStatus::RAMPING_UP));
        assert!(!status.contains(ChannelStatus::RAMPING_DOWN));
        assert!(!status.contains(ChannelStatus::OVERCURRENT));
        assert!(!status.is_ramping());

        let status = ChannelStatus::from_bits_truncate(0b0010);
        assert!(!status.contains(ChannelStatus::OUTPUT_ON));
        assert!(status.contains(ChannelStatus::RAMPING_UP));
        assert!(status.is_ramping());
    }
}

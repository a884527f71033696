//! Session object for one DT14xx desktop high-voltage power supply (or a
//! daisy chain of them behind one link).

use std::time::Duration;

use crate::channel::SupplyChannel;
use crate::error::{CaenError, Result};
use crate::protocol::{ChannelStatus, Command, CommandKind, Response, Value};
use crate::transport::Transport;

/// Connection parameters for [`PowerSupply::open`]. Exactly one of `port`
/// (USB serial device node) and `host` (Ethernet address) must be given.
#[derive(Clone, Debug)]
pub struct SupplyConfig {
    pub port: Option<String>,
    pub host: Option<String>,
    /// When set, commands with no explicit board id address board 0. When
    /// unset the board id must always be supplied (multi-board daisy chains).
    pub default_board: bool,
    /// Window for the single blocking read that follows each command.
    pub timeout: Duration,
}

impl Default for SupplyConfig {
    fn default() -> SupplyConfig {
        SupplyConfig {
            port: None,
            host: None,
            default_board: true,
            timeout: Duration::from_secs(1),
        }
    }
}

/// An open session with a power supply. Owns its transport exclusively; the
/// connection is closed when the session is dropped.
pub struct PowerSupply {
    link: Transport,
    default_board: bool,
    timeout: Duration,
    // Board identity is immutable, fetched once on first access.
    model: Option<String>,
    serial_number: Option<String>,
}

impl std::fmt::Debug for PowerSupply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerSupply")
            .field("default_board", &self.default_board)
            .field("timeout", &self.timeout)
            .field("model", &self.model)
            .field("serial_number", &self.serial_number)
            .finish_non_exhaustive()
    }
}

impl PowerSupply {
    pub fn open(config: &SupplyConfig) -> Result<PowerSupply> {
        let link = match (&config.port, &config.host) {
            (Some(_), Some(_)) => {
                return Err(CaenError::Configuration(
                    "both a serial port and a network address were given; specify only one".into(),
                ))
            }
            (None, None) => {
                return Err(CaenError::Configuration(
                    "specify a serial port or a network address for the instrument".into(),
                ))
            }
            (Some(port), None) => Transport::open_serial(port, config.timeout)?,
            (None, Some(host)) => Transport::open_tcp(host, config.timeout)?,
        };
        Ok(PowerSupply {
            link,
            default_board: config.default_board,
            timeout: config.timeout,
            model: None,
            serial_number: None,
        })
    }

    /// Open over the USB serial line with default settings.
    pub fn open_serial(port: &str) -> Result<PowerSupply> {
        PowerSupply::open(&SupplyConfig {
            port: Some(port.to_owned()),
            ..SupplyConfig::default()
        })
    }

    /// Open over Ethernet with default settings.
    pub fn open_tcp(host: &str) -> Result<PowerSupply> {
        PowerSupply::open(&SupplyConfig {
            host: Some(host.to_owned()),
            ..SupplyConfig::default()
        })
    }

    /// View of one channel on the default board.
    pub fn channel(&mut self, channel: u8) -> SupplyChannel<'_> {
        SupplyChannel::new(self, None, channel)
    }

    /// View of one channel on an explicit board of the daisy chain.
    pub fn channel_on_board(&mut self, board: u8, channel: u8) -> SupplyChannel<'_> {
        SupplyChannel::new(self, Some(board), channel)
    }

    fn board_or_default(&self, board: Option<u8>) -> Result<u8> {
        match board {
            Some(bd) => Ok(bd),
            None if self.default_board => Ok(0),
            None => Err(CaenError::Configuration(
                "no board id given and the session was opened with default_board = false".into(),
            )),
        }
    }

    /// Send one command and perform the single bounded read of its answer.
    ///
    /// Whether the answer means success is for the caller to judge through
    /// [`Response::is_success`]; an empty response (absent board) is
    /// deliberately not an error here.
    pub fn query(&mut self, command: &Command) -> Result<Response> {
        let wire = command.to_wire();
        log::debug!("--> {}", wire.trim_end());
        self.link.send(wire.as_bytes())?;
        let text = self.link.read_line(self.timeout)?;
        log::debug!("<-- {:?}", text);
        Ok(Response::new(text))
    }

    fn checked_query(&mut self, command: &Command) -> Result<Response> {
        let response = self.query(command)?;
        if !response.is_success() {
            let kind = match command.kind() {
                CommandKind::Monitor => "MON",
                CommandKind::Set => "SET",
            };
            return Err(CaenError::Device(format!(
                "{} {} failed, response was {:?}",
                kind,
                command.parameter(),
                response.text()
            )));
        }
        Ok(response)
    }

    fn value_of(response: &Response, parameter: &str) -> Result<Value> {
        match response.value_text() {
            Some(text) => Ok(Value::parse(text)),
            None => Err(CaenError::UnexpectedValue {
                parameter: parameter.to_owned(),
                value: response.text().to_owned(),
            }),
        }
    }

    /// MONITOR a channel parameter, coerced to a late-typed scalar.
    pub fn get_channel_parameter(
        &mut self,
        parameter: &str,
        channel: u8,
        board: Option<u8>,
    ) -> Result<Value> {
        let bd = self.board_or_default(board)?;
        let cmd = Command::monitor(bd, Some(channel), parameter)?;
        let response = self.checked_query(&cmd)?;
        Self::value_of(&response, parameter)
    }

    /// SET a channel parameter.
    pub fn set_channel_parameter(
        &mut self,
        parameter: &str,
        channel: u8,
        value: impl Into<Value>,
        board: Option<u8>,
    ) -> Result<()> {
        let bd = self.board_or_default(board)?;
        let cmd = Command::set(bd, Some(channel), parameter, Some(value.into()))?;
        self.checked_query(&cmd)?;
        Ok(())
    }

    /// SET a valueless channel command (`ON`, `OFF`, ...).
    pub fn apply_channel_command(
        &mut self,
        parameter: &str,
        channel: u8,
        board: Option<u8>,
    ) -> Result<()> {
        let bd = self.board_or_default(board)?;
        let cmd = Command::set(bd, Some(channel), parameter, None)?;
        self.checked_query(&cmd)?;
        Ok(())
    }

    /// MONITOR a board-level parameter (`BDNAME`, `BDSNUM`, ...).
    pub fn get_board_parameter(&mut self, parameter: &str, board: Option<u8>) -> Result<Value> {
        let bd = self.board_or_default(board)?;
        let cmd = Command::monitor(bd, None, parameter)?;
        let response = self.checked_query(&cmd)?;
        Self::value_of(&response, parameter)
    }

    /// Channel status word decoded as a 16-bit flag field.
    pub fn channel_status(&mut self, channel: u8, board: Option<u8>) -> Result<ChannelStatus> {
        let value = self.get_channel_parameter("STAT", channel, board)?;
        match value {
            Value::Int(raw) if (0..=u16::MAX as i64).contains(&raw) => {
                Ok(ChannelStatus::from_bits_truncate(raw as u16))
            }
            other => Err(CaenError::UnexpectedValue {
                parameter: "STAT".into(),
                value: other.to_string(),
            }),
        }
    }

    /// Model name of the default board, fetched once and cached.
    pub fn model_name(&mut self) -> Result<String> {
        if let Some(name) = &self.model {
            return Ok(name.clone());
        }
        let name = self.get_board_parameter("BDNAME", None)?.to_string();
        self.model = Some(name.clone());
        Ok(name)
    }

    /// Serial number of the default board, fetched once and cached.
    pub fn serial_number(&mut self) -> Result<String> {
        if let Some(serial) = &self.serial_number {
            return Ok(serial.clone());
        }
        let serial = self.get_board_parameter("BDSNUM", None)?.to_string();
        self.serial_number = Some(serial.clone());
        Ok(serial)
    }
}

//! Convenience view over one output channel of one board.

use crate::error::{CaenError, Result};
use crate::protocol::{ChannelStatus, Value};
use crate::ramp::{self, RampOptions};
use crate::supply::PowerSupply;

// Currents travel the wire in microamps.
const AMPS_PER_WIRE_UNIT: f64 = 1e-6;

/// Output polarity of a channel, factory-set on these supplies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub fn sign(self) -> f64 {
        match self {
            Polarity::Positive => 1.0,
            Polarity::Negative => -1.0,
        }
    }
}

/// A non-owning view binding a session to one `(board, channel)` address.
/// Every accessor forwards to the session's get/set operations.
pub struct SupplyChannel<'a> {
    supply: &'a mut PowerSupply,
    board: Option<u8>,
    channel: u8,
}

impl<'a> SupplyChannel<'a> {
    pub(crate) fn new(
        supply: &'a mut PowerSupply,
        board: Option<u8>,
        channel: u8,
    ) -> SupplyChannel<'a> {
        SupplyChannel {
            supply,
            board,
            channel,
        }
    }

    pub fn channel_id(&self) -> u8 {
        self.channel
    }

    /// Monitored value of an arbitrary channel parameter.
    pub fn parameter(&mut self, parameter: &str) -> Result<Value> {
        self.supply
            .get_channel_parameter(parameter, self.channel, self.board)
    }

    /// Write an arbitrary channel parameter.
    pub fn set_parameter(&mut self, parameter: &str, value: impl Into<Value>) -> Result<()> {
        self.supply
            .set_channel_parameter(parameter, self.channel, value, self.board)
    }

    fn parameter_f64(&mut self, parameter: &str) -> Result<f64> {
        let value = self.parameter(parameter)?;
        value.as_f64().ok_or_else(|| CaenError::UnexpectedValue {
            parameter: parameter.to_owned(),
            value: value.to_string(),
        })
    }

    /// Programmed output voltage (VSET), in volts.
    pub fn vset(&mut self) -> Result<f64> {
        self.parameter_f64("VSET")
    }

    pub fn set_vset(&mut self, volts: f64) -> Result<()> {
        self.set_parameter("VSET", volts)
    }

    /// Output polarity as reported by the instrument. Anything other than
    /// `+` or `-` violates the assumed domain.
    pub fn polarity(&mut self) -> Result<Polarity> {
        match self.parameter("POL")? {
            Value::Text(sign) if sign == "+" => Ok(Polarity::Positive),
            Value::Text(sign) if sign == "-" => Ok(Polarity::Negative),
            other => Err(CaenError::UnexpectedPolarity(other.to_string())),
        }
    }

    /// Monitored output voltage (VMON) with the polarity sign applied; the
    /// instrument itself only reports the magnitude.
    pub fn vmon(&mut self) -> Result<f64> {
        let sign = self.polarity()?.sign();
        let magnitude = self.parameter_f64("VMON")?;
        Ok(sign * magnitude)
    }

    /// Monitored output current (IMON), in amperes.
    pub fn imon(&mut self) -> Result<f64> {
        Ok(self.parameter_f64("IMON")? * AMPS_PER_WIRE_UNIT)
    }

    /// Programmed current compliance (ISET), in amperes.
    pub fn iset(&mut self) -> Result<f64> {
        Ok(self.parameter_f64("ISET")? * AMPS_PER_WIRE_UNIT)
    }

    /// Program the current compliance, given in amperes.
    pub fn set_current_compliance(&mut self, amperes: f64) -> Result<()> {
        self.set_parameter("ISET", amperes / AMPS_PER_WIRE_UNIT)
    }

    /// Decoded channel status word.
    pub fn status(&mut self) -> Result<ChannelStatus> {
        self.supply.channel_status(self.channel, self.board)
    }

    /// Switch the output on.
    pub fn turn_on(&mut self) -> Result<()> {
        self.supply
            .apply_channel_command("ON", self.channel, self.board)
    }

    /// Switch the output off.
    pub fn turn_off(&mut self) -> Result<()> {
        self.supply
            .apply_channel_command("OFF", self.channel, self.board)
    }

    /// Ramp VSET to `target` volts at a bounded rate and return once the
    /// hardware reports it has stopped ramping. See [`ramp::ramp_voltage`].
    pub fn ramp_voltage(&mut self, target: f64, options: &RampOptions) -> Result<()> {
        ramp::ramp_voltage(self, target, options)
    }
}

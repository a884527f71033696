//! Time-bounded voltage transitions.
//!
//! The ramp-rate configuration of the channel is treated as a scoped
//! resource: it is overwritten on entry and restored on every exit path,
//! including timeouts and communication failures mid-ramp.

use std::time::{Duration, Instant};

use crate::channel::SupplyChannel;
use crate::error::{CaenError, Result};
use crate::protocol::Value;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Parameters of a [`ramp_voltage`] run.
#[derive(Clone, Debug)]
pub struct RampOptions {
    /// Ramp rate in volts per second, applied to both RUP and RDW for the
    /// duration of the transition.
    pub rate: f64,
    /// Slack allowed past the lower-bound ETA `|target - current| / rate`
    /// before the run fails with [`CaenError::RampTimeout`].
    pub timeout: Duration,
}

impl Default for RampOptions {
    fn default() -> RampOptions {
        RampOptions {
            rate: 5.0,
            timeout: Duration::from_secs(10),
        }
    }
}

// Transient record of what was overwritten, held only for the duration of
// one ramp operation.
struct RampState {
    original_up: Value,
    original_down: Value,
    target: f64,
    rate: f64,
}

impl RampState {
    /// Read and record the current RUP/RDW settings, then overwrite both
    /// with the requested rate.
    fn capture(channel: &mut SupplyChannel, rate: f64, target: f64) -> Result<RampState> {
        let original_up = channel.parameter("RUP")?;
        let original_down = channel.parameter("RDW")?;
        channel.set_parameter("RUP", rate)?;
        channel.set_parameter("RDW", rate)?;
        Ok(RampState {
            original_up,
            original_down,
            target,
            rate,
        })
    }

    /// Write the target and poll the status word once per second until the
    /// hardware reports both ramp flags clear. Fails with `RampTimeout` when
    /// the elapsed poll time exceeds the ETA plus the configured slack.
    fn watch(&self, channel: &mut SupplyChannel, slack: Duration) -> Result<()> {
        let current = channel.vset()?;
        // lower-bound ETA; settling takes a few extra seconds in practice
        let expected = Duration::from_secs_f64((self.target - current).abs() / self.rate);
        channel.set_vset(self.target)?;
        let started = Instant::now();
        loop {
            spin_sleep::sleep(POLL_INTERVAL);
            let status = channel.status()?;
            if !status.is_ramping() {
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed > expected + slack {
                return Err(CaenError::RampTimeout { elapsed, expected });
            }
        }
    }

    /// Put the original ramp-rate settings back. Runs on every exit path.
    fn restore(self, channel: &mut SupplyChannel) -> Result<()> {
        channel.set_parameter("RUP", self.original_up)?;
        channel.set_parameter("RDW", self.original_down)?;
        Ok(())
    }
}

/// Move VSET of `channel` to `target` volts at `options.rate` and block until
/// the hardware reports it has stopped ramping, not merely until the command
/// was accepted. The previous RUP/RDW configuration is restored regardless of
/// outcome.
pub fn ramp_voltage(
    channel: &mut SupplyChannel,
    target: f64,
    options: &RampOptions,
) -> Result<()> {
    if !(options.rate > 0.0) {
        return Err(CaenError::Configuration(format!(
            "ramp rate must be positive, got {}",
            options.rate
        )));
    }
    let state = RampState::capture(channel, options.rate, target)?;
    let outcome = state.watch(channel, options.timeout);
    let restored = state.restore(channel);
    match (outcome, restored) {
        (Err(ramp_err), Err(restore_err)) => {
            // the ramp failure is the primary diagnosis
            log::warn!("could not restore ramp rates: {}", restore_err);
            Err(ramp_err)
        }
        (Err(ramp_err), Ok(())) => Err(ramp_err),
        (Ok(()), Err(restore_err)) => Err(restore_err),
        (Ok(()), Ok(())) => Ok(()),
    }
}

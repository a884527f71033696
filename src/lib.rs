//! `caenkit` is a control library for CAEN desktop lab instruments: the
//! DT14xxET family of high-voltage power supplies, reached over their ASCII
//! command protocol on USB-serial or ethernet, and the DT5742 switched-
//! capacitor waveform digitizer, reached through the vendor's native
//! `CAENDigitizer` library.
//!
//! ## Power supplies
//!
//! A [`PowerSupply`] owns one serial or TCP link and turns typed requests
//! into protocol exchanges. Channel-level work goes through a
//! [`SupplyChannel`] view:
//!
//! ```no_run
//! use caenkit::{PowerSupply, RampOptions};
//!
//! fn main() -> caenkit::Result<()> {
//!     let mut supply = PowerSupply::open_serial("/dev/ttyACM0")?;
//!     let mut ch = supply.channel(0);
//!     ch.set_current_compliance(5e-6)?;
//!     ch.turn_on()?;
//!     ch.ramp_voltage(55.0, &RampOptions::default())?;
//!     println!("VMON = {} V, IMON = {} A", ch.vmon()?, ch.imon()?);
//!     Ok(())
//! }
//! ```
//!
//! The protocol layer ([`Command`], [`Response`], [`Value`]) is public so
//! callers can drive parameters this crate has no dedicated accessor for.
//!
//! ## Digitizers
//!
//! A [`Digitizer`] wraps an open native link and enforces the acquisition
//! lifecycle: configure, [`arm`](Digitizer::arm), read decoded waveforms,
//! [`disarm`](Digitizer::disarm). The native layer is reached through the
//! [`NativeDigitizer`] trait; the real FFI binding is compiled in with the
//! `hardware` feature, which links against `libCAENDigitizer`.

mod channel;
mod digitizer;
mod error;
mod event;
pub mod native;
mod protocol;
mod ramp;
mod supply;
mod transport;

pub use crate::channel::{Polarity, SupplyChannel};
pub use crate::digitizer::{
    AcquisitionMode, AcquisitionStatus, Digitizer, Drs4Frequency, TriggerEdge, TriggerMode,
};
pub use crate::error::{CaenError, Result};
pub use crate::event::{
    DecodedEvent, EventRecord, EventWaveforms, GroupData, WaveChannel, Waveform,
    CHANNELS_PER_GROUP, GROUPS_PER_EVENT, INPUTS_PER_GROUP,
};
pub use crate::native::{BoardInfo, NativeDigitizer, NativeStatus};
pub use crate::protocol::{
    ChannelStatus, Command, CommandKind, Response, Value, MAX_BOARD, MAX_CHANNEL,
};
pub use crate::ramp::{ramp_voltage, RampOptions};
pub use crate::supply::{PowerSupply, SupplyConfig};
pub use crate::transport::{Transport, SERIAL_BAUD, TCP_PORT};

#[cfg(feature = "hardware")]
pub use crate::native::CaenDigitizerLink;

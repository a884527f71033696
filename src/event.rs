//! Decoded digitizer events and their projection into per-channel waveforms.
//!
//! The DT5742 groups its inputs in clusters of 8 plus one replica of the TRn
//! fast-trigger signal, all sharing one acquisition clock. An event holds up
//! to four such groups; the user-facing view is one amplitude sequence per
//! enabled logical channel, optionally paired with a time axis derived from
//! the sampling frequency.

use std::collections::BTreeMap;
use std::fmt;

pub const GROUPS_PER_EVENT: usize = 4;
/// 8 inputs plus the trigger replica.
pub const CHANNELS_PER_GROUP: usize = 9;
pub const INPUTS_PER_GROUP: usize = 8;

// 12-bit converter: midscale and full count.
const ADC_MIDSCALE: f32 = 2048.0;
const ADC_MAX: f32 = 4095.0;
/// Input dynamic range of the DT5742, peak to peak.
pub const FULL_SCALE_VOLTS: f32 = 1.0;

/// Per-event bookkeeping reported by the vendor library, mirrored
/// field-for-field from `CAEN_DGTZ_EventInfo_t`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventRecord {
    pub event_size: u32,
    pub board_id: u32,
    pub pattern: u32,
    pub channel_mask: u32,
    pub event_counter: u32,
    pub trigger_time_tag: u32,
}

/// One decoded channel group: up to nine sample arrays plus the acquisition
/// timing metadata shared by the whole group.
#[derive(Clone, Debug, Default)]
pub struct GroupData {
    /// Sample arrays indexed by in-group channel number; index 8 is the
    /// trigger replica. Channels without data are empty.
    pub samples: Vec<Vec<f32>>,
    pub trigger_time_lag: u32,
    pub start_index_cell: u16,
}

/// One decoded event block. Groups the hardware did not ship are `None`.
#[derive(Clone, Debug, Default)]
pub struct DecodedEvent {
    pub groups: [Option<GroupData>; GROUPS_PER_EVENT],
}

/// Identity of a logical channel in the readout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WaveChannel {
    /// A regular input, numbered across groups (group g, in-group j maps to
    /// `Input(8 g + j)`).
    Input(u8),
    /// The digitized TRn replica of a group.
    Trigger(u8),
}

impl fmt::Display for WaveChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WaveChannel::Input(n) => write!(f, "CH{}", n),
            WaveChannel::Trigger(g) => write!(f, "TR{}", g),
        }
    }
}

/// Amplitude sequence of one channel in one event, in volts unless the
/// readout was asked for raw ADC units.
#[derive(Clone, Debug, Default)]
pub struct Waveform {
    pub samples: Vec<f32>,
    /// Sample times in seconds. All channels of an event share one clock, so
    /// equal-length waveforms carry identical axes.
    pub time: Option<Vec<f32>>,
}

/// The waveforms of one event, keyed by logical channel.
#[derive(Clone, Debug, Default)]
pub struct EventWaveforms {
    pub record: EventRecord,
    pub channels: BTreeMap<WaveChannel, Waveform>,
}

/// Convert one raw 12-bit sample to volts. Samples at the extreme ends of
/// the range are flagged by the hardware as overflow and become NaN so they
/// stay visible instead of silently wrong.
pub fn sample_to_volts(raw: f32) -> f32 {
    if raw <= 0.0 || raw >= ADC_MAX {
        f32::NAN
    } else {
        (raw - ADC_MIDSCALE) * FULL_SCALE_VOLTS / ADC_MAX
    }
}

/// Time axis for an `n`-sample waveform at the given sampling frequency.
pub fn time_axis(n: usize, frequency_hz: f64) -> Vec<f32> {
    (0..n).map(|i| (i as f64 / frequency_hz) as f32).collect()
}
